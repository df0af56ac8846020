//! Translation of one hypothesis into one backend query.
//!
//! The backend speaks a Solr-style boolean field query language. Each hint
//! that is set contributes one clause; clauses are ANDed. The translator is
//! the only place query syntax lives.

use crate::ResolverConfig;
use crate::hypothesis::Hypothesis;

/// Fields requested from the backend for every query.
pub const RESULT_FIELDS: &[&str] = &[
    "bibcode",
    "author",
    "year",
    "volume",
    "page",
    "pub",
    "title",
    "doi",
    "identifier",
    "doctype",
];

/// One ready-to-send backend request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub q: String,
    pub rows: usize,
    pub fields: &'static [&'static str],
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', ""))
}

/// Alternatives for a page with one uncertain digit: the literal page plus
/// every single-position wildcard of it.
pub fn page_variants(page: &str) -> Vec<String> {
    let mut variants = vec![page.to_string()];
    if page.chars().all(|c| c.is_ascii_alphanumeric()) && page.len() > 1 {
        for i in 0..page.len() {
            let mut v: Vec<char> = page.chars().collect();
            v[i] = '?';
            variants.push(v.into_iter().collect());
        }
    }
    variants
}

/// Build the backend query for one hypothesis.
pub fn translate(hypothesis: &Hypothesis, config: &ResolverConfig) -> SearchQuery {
    let hints = &hypothesis.hints;
    let mut clauses: Vec<String> = Vec::new();

    if let Some(doi) = &hints.doi {
        clauses.push(format!("doi:{}", quote(doi)));
    }
    if let Some(arxiv) = &hints.arxiv {
        clauses.push(format!("arxiv:{}", quote(arxiv)));
    }
    if let Some(ascl) = &hints.ascl {
        clauses.push(format!("ascl:{}", quote(ascl)));
    }

    if !hints.bibcode_keys.is_empty() {
        // Wildcarded keys must stay unquoted for the backend to expand them.
        clauses.push(format!("bibcode:({})", hints.bibcode_keys.join(" OR ")));
    }

    if let Some(first) = &hints.first_author {
        let anchored = format!("^{first}");
        if hints.fuzzy_first_author {
            clauses.push(format!("author:{}~2", quote(&anchored)));
        } else {
            clauses.push(format!("author:{}", quote(&anchored)));
        }
    }
    for author in &hints.other_authors {
        clauses.push(format!("author:{}", quote(author)));
    }

    if let Some(year) = hints.year {
        match hints.year_window {
            Some(window) => clauses.push(format!(
                "year:[{} TO {}]",
                year - window as i32,
                year + window as i32
            )),
            None => clauses.push(format!("year:{year}")),
        }
    }

    if let Some(volume) = &hints.volume {
        clauses.push(format!("volume:{}", quote(volume)));
    }

    if let Some(page) = &hints.page {
        if hints.page_uncertain {
            clauses.push(format!("page:({})", page_variants(page).join(" OR ")));
        } else {
            clauses.push(format!("page:{}", quote(page)));
        }
    }

    if let Some(bibstem) = &hints.bibstem {
        clauses.push(format!("bibstem:{}", quote(bibstem.trim_matches('.'))));
    }

    if let Some(title) = &hints.title {
        clauses.push(format!("title:{}~3", quote(title)));
    }

    SearchQuery {
        q: clauses.join(" AND "),
        rows: config.row_cap,
        fields: RESULT_FIELDS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypothesis::{Details, QueryHints, Scoring};

    fn hyp(hints: QueryHints) -> Hypothesis {
        Hypothesis {
            name: "test",
            hints,
            scoring: Scoring::Fielded,
            details: Details::default(),
        }
    }

    fn q(hints: QueryHints) -> String {
        translate(&hyp(hints), &ResolverConfig::default()).q
    }

    #[test]
    fn first_author_is_anchored_and_quoted() {
        let query = q(QueryHints {
            first_author: Some("accomazzi".into()),
            other_authors: vec!["kurtz".into()],
            year: Some(2019),
            ..Default::default()
        });
        assert_eq!(
            query,
            "author:\"^accomazzi\" AND author:\"kurtz\" AND year:2019"
        );
    }

    #[test]
    fn fuzzy_author_and_year_window_operators() {
        let query = q(QueryHints {
            first_author: Some("accomazzi".into()),
            fuzzy_first_author: true,
            year: Some(2019),
            year_window: Some(5),
            ..Default::default()
        });
        assert_eq!(query, "author:\"^accomazzi\"~2 AND year:[2014 TO 2024]");
    }

    #[test]
    fn uncertain_page_expands_to_wildcard_disjunction() {
        let query = q(QueryHints {
            page: Some("45".into()),
            page_uncertain: true,
            ..Default::default()
        });
        assert_eq!(query, "page:(45 OR ?5 OR 4?)");
    }

    #[test]
    fn bibcode_keys_stay_unquoted() {
        let query = q(QueryHints {
            bibcode_keys: vec![
                "2019AAS...23320704A".into(),
                "2019AAS...23320704?".into(),
            ],
            ..Default::default()
        });
        assert_eq!(
            query,
            "bibcode:(2019AAS...23320704A OR 2019AAS...23320704?)"
        );
    }

    #[test]
    fn identifiers_quoted_verbatim() {
        let query = q(QueryHints {
            doi: Some("10.1000/xyz".into()),
            ..Default::default()
        });
        assert_eq!(query, "doi:\"10.1000/xyz\"");
    }

    #[test]
    fn rows_and_fields_carried() {
        let config = ResolverConfig::default();
        let query = translate(&hyp(QueryHints::default()), &config);
        assert_eq!(query.rows, config.row_cap);
        assert!(query.fields.contains(&"bibcode"));
        assert!(query.fields.contains(&"pub"));
    }

    #[test]
    fn embedded_quotes_are_stripped() {
        let query = q(QueryHints {
            title: Some("An \"odd\" title".into()),
            ..Default::default()
        });
        assert_eq!(query, "title:\"An odd title\"~3");
    }
}
