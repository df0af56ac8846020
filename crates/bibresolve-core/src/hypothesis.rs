//! Hypothesis generation: the ordered ladder of query strategies.
//!
//! Each hypothesis is an immutable bundle of query hints, a bound scoring
//! mode, and the auxiliary details scoring needs. Hypotheses are emitted
//! strongest first and consumed in order by the solve loop; a stronger
//! hypothesis short-circuits everything after it.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use bibresolve_sourcematch::FuzzyNameIndex;

use crate::ResolverConfig;
use crate::reference::DigestedReference;

/// How candidates of a hypothesis are compared against the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scoring {
    /// Candidate's doi must equal the reference's, verbatim.
    IdentifierDoi,
    /// Candidate's arXiv id must equal the reference's.
    IdentifierArxiv,
    /// Candidate's ASCL id must equal the reference's.
    IdentifierAscl,
    /// Candidate's bibcode must be one of the reconstructed keys.
    BibcodeKeys,
    /// Full per-field evidence ledger.
    Fielded,
}

/// Query hints handed to the translator. Every field is optional; the
/// translator emits a clause only for the hints that are set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryHints {
    pub first_author: Option<String>,
    pub other_authors: Vec<String>,
    /// Translate the first author with the backend's fuzzy operator.
    pub fuzzy_first_author: bool,
    pub year: Option<i32>,
    /// Half-width of a year range; `None` means exact year.
    pub year_window: Option<u32>,
    pub volume: Option<String>,
    pub page: Option<String>,
    /// Expand the page into single-digit-wildcarded alternatives.
    pub page_uncertain: bool,
    pub bibstem: Option<String>,
    pub title: Option<String>,
    pub doi: Option<String>,
    pub arxiv: Option<String>,
    pub ascl: Option<String>,
    pub bibcode_keys: Vec<String>,
}

/// Auxiliary reference details a scoring function needs, frozen at
/// generation time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Details {
    pub surnames: Vec<String>,
    pub has_etal: bool,
    pub qualifier: Option<char>,
}

/// One named query strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub name: &'static str,
    pub hints: QueryHints,
    pub scoring: Scoring,
    pub details: Details,
}

/// Abstract-series venues cross-listed under sibling bibstems.
static ABSTRACT_CROSS_LIST: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("AAS", vec!["DPS", "DDA", "HEAD", "AHEAD"]);
    m.insert("DPS", vec!["AAS"]);
    m.insert("DDA", vec!["AAS"]);
    m.insert("HEAD", vec!["AAS"]);
    m
});

/// Characteristic venue-text substrings mapping to a conference stem.
static CONFERENCE_PATTERNS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("american astronomical society", "AAS"),
        ("division for planetary sciences", "DPS"),
        ("division on dynamical astronomy", "DDA"),
        ("high energy astrophysics division", "HEAD"),
        ("lunar and planetary science", "LPI"),
        ("iau symposium", "IAUS"),
        ("spie", "SPIE"),
        ("agu fall meeting", "AGUFM"),
    ]
});

/// Letters-journal variants of a parent journal stem.
static LETTERS_VARIANTS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![("ApJ", "ApJL"), ("PhRv", "PhRvL"), ("GeoJ", "GeoRL")]
});

static THESIS_WORDS: &[&str] = &["thesis", "dissertation", "ph.d", "phd", "masters"];

/// Deterministic fixed-width bibcode key(s) for the given fields.
///
/// Layout is `YYYY JJJJJ VVVV M PPPP A`: four-digit year, bibstem right
/// dot-padded to five, volume right-aligned in four with dot padding, one
/// qualifier slot, page right-aligned in four, first-author initial. A
/// missing field wildcards its slot with `?`; a page longer than four
/// digits spills its leading digit into the qualifier slot when no
/// qualifier is known. A collaboration author list additionally yields an
/// initial-wildcarded variant.
pub fn build_bibcode_keys(
    year: i32,
    bibstem: &str,
    volume: Option<&str>,
    page: Option<&str>,
    qualifier: Option<char>,
    first_initial: Option<char>,
    collaboration: bool,
) -> Vec<String> {
    let mut stem: String = bibstem.trim_matches('.').chars().take(5).collect();
    while stem.len() < 5 {
        stem.push('.');
    }

    let volume_slot = match volume {
        Some(v) if !v.is_empty() => {
            let v: String = v.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("{v:.>4}")
        }
        _ => "????".to_string(),
    };

    let (qualifier_slot, page_slot) = match page {
        Some(p) if !p.is_empty() => {
            let digits: String = p.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
            if digits.len() > 4 && qualifier.is_none() {
                let spill = digits.chars().next().unwrap_or('?');
                let rest: String = digits.chars().skip(digits.len() - 4).collect();
                (spill, rest)
            } else {
                let tail: String = digits
                    .chars()
                    .rev()
                    .take(4)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                (qualifier.unwrap_or('.'), format!("{tail:.>4}"))
            }
        }
        _ => (qualifier.unwrap_or('?'), "????".to_string()),
    };

    let initial = first_initial
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('?');

    let key = format!("{year:04}{stem}{volume_slot}{qualifier_slot}{page_slot}{initial}");
    let mut keys = vec![key];
    if collaboration && initial != '?' {
        let mut wild = keys[0].clone();
        wild.pop();
        wild.push('?');
        keys.push(wild);
    }
    keys
}

/// True when any slot of any key is wildcarded, which forces fielded
/// scoring instead of exact key comparison.
pub fn keys_have_wildcard(keys: &[String]) -> bool {
    keys.iter().any(|k| k.contains('?'))
}

fn details_of(reference: &DigestedReference) -> Details {
    Details {
        surnames: reference.surnames.clone(),
        has_etal: reference.has_etal,
        qualifier: reference.qualifier,
    }
}

fn author_hints(reference: &DigestedReference) -> (Option<String>, Vec<String>) {
    let mut it = reference.surnames.iter();
    let first = it.next().cloned();
    (first, it.cloned().collect())
}

fn fielded(
    name: &'static str,
    hints: QueryHints,
    reference: &DigestedReference,
) -> Hypothesis {
    Hypothesis {
        name,
        hints,
        scoring: Scoring::Fielded,
        details: details_of(reference),
    }
}

fn key_hypothesis(
    name: &'static str,
    reference: &DigestedReference,
    stem: &str,
) -> Hypothesis {
    let keys = build_bibcode_keys(
        reference.year.unwrap_or(0),
        stem,
        reference.volume.as_deref(),
        reference.page.as_deref(),
        reference.qualifier,
        reference.first_initial,
        reference.is_collaboration,
    );
    let scoring = if keys_have_wildcard(&keys) {
        Scoring::Fielded
    } else {
        Scoring::BibcodeKeys
    };
    Hypothesis {
        name,
        hints: QueryHints {
            bibcode_keys: keys,
            ..Default::default()
        },
        scoring,
        details: details_of(reference),
    }
}

fn looks_like_thesis(reference: &DigestedReference) -> bool {
    let haystack = format!(
        "{} {}",
        reference.refstr.to_lowercase(),
        reference.venue.as_deref().unwrap_or("").to_lowercase()
    );
    (reference.volume.is_none() && reference.page.is_none())
        || THESIS_WORDS.iter().any(|w| haystack.contains(w))
}

/// Emit every applicable hypothesis in strict priority order.
pub fn generate(
    reference: &DigestedReference,
    index: &FuzzyNameIndex,
    config: &ResolverConfig,
) -> Vec<Hypothesis> {
    let mut out = Vec::new();
    let (first_author, other_authors) = author_hints(reference);
    let has_author = first_author.is_some();

    // 1. Unique identifiers beat everything.
    if let Some(doi) = &reference.doi {
        out.push(Hypothesis {
            name: "doi",
            hints: QueryHints {
                doi: Some(doi.clone()),
                ..Default::default()
            },
            scoring: Scoring::IdentifierDoi,
            details: details_of(reference),
        });
    }
    if let Some(arxiv) = &reference.arxiv {
        out.push(Hypothesis {
            name: "arxiv",
            hints: QueryHints {
                arxiv: Some(arxiv.clone()),
                ..Default::default()
            },
            scoring: Scoring::IdentifierArxiv,
            details: details_of(reference),
        });
    }
    if let Some(ascl) = &reference.ascl {
        out.push(Hypothesis {
            name: "ascl",
            hints: QueryHints {
                ascl: Some(ascl.clone()),
                ..Default::default()
            },
            scoring: Scoring::IdentifierAscl,
            details: details_of(reference),
        });
    }

    // 2. Year + resolved venue give a deterministic reconstructed key.
    if let (Some(_), Some(stem)) = (reference.year, reference.bibstem.as_deref()) {
        out.push(key_hypothesis("bibcode-key", reference, stem));
    }

    // 3. Thesis-shaped references have no useful volume/page to query on.
    if has_author
        && reference.year.is_some()
        && !reference.refstr.is_empty()
        && looks_like_thesis(reference)
    {
        out.push(fielded(
            "thesis",
            QueryHints {
                first_author: first_author.clone(),
                year: reference.year,
                ..Default::default()
            },
            reference,
        ));
    }

    // 4. Book-shaped.
    if has_author
        && reference.year.is_some()
        && reference.volume.is_none()
        && (reference.venue.is_some() && reference.title.is_none()
            || reference.title.is_some())
    {
        out.push(fielded(
            "book",
            QueryHints {
                first_author: first_author.clone(),
                other_authors: other_authors.clone(),
                year: reference.year,
                title: reference.title.clone(),
                bibstem: reference.bibstem.clone(),
                ..Default::default()
            },
            reference,
        ));
    }

    // 5. Plain author + year.
    if has_author && reference.year.is_some() {
        out.push(fielded(
            "author-year",
            QueryHints {
                first_author: first_author.clone(),
                year: reference.year,
                ..Default::default()
            },
            reference,
        ));
    }

    // 6. The most complete fielded case.
    if has_author
        && reference.year.is_some()
        && reference.volume.is_some()
        && reference.page.is_some()
    {
        out.push(fielded(
            "author-year-volume-page",
            QueryHints {
                first_author: first_author.clone(),
                other_authors: other_authors.clone(),
                year: reference.year,
                volume: reference.volume.clone(),
                page: reference.page.clone(),
                page_uncertain: true,
                ..Default::default()
            },
            reference,
        ));
    }

    // 7. Author + resolved venue + year.
    if has_author && reference.year.is_some() && reference.bibstem.is_some() {
        out.push(fielded(
            "author-venue-year",
            QueryHints {
                first_author: first_author.clone(),
                year: reference.year,
                bibstem: reference.bibstem.clone(),
                ..Default::default()
            },
            reference,
        ));
    }

    // 8. Author + year + fuzzy title.
    if has_author && reference.year.is_some() && reference.title.is_some() {
        out.push(fielded(
            "author-year-title",
            QueryHints {
                first_author: first_author.clone(),
                year: reference.year,
                title: reference.title.clone(),
                ..Default::default()
            },
            reference,
        ));
    }

    // 9. Venue-family extras.
    venue_family(reference, index, &first_author, &mut out);

    // 10. Single-anchor fallbacks.
    if has_author && reference.volume.is_some() {
        out.push(fielded(
            "author-volume",
            QueryHints {
                first_author: first_author.clone(),
                volume: reference.volume.clone(),
                ..Default::default()
            },
            reference,
        ));
    }
    if has_author && reference.page.is_some() {
        out.push(fielded(
            "author-page",
            QueryHints {
                first_author: first_author.clone(),
                page: reference.page.clone(),
                ..Default::default()
            },
            reference,
        ));
    }

    // 11. Fuzzy fallbacks.
    if has_author && reference.year.is_some() {
        out.push(fielded(
            "fuzzy-author-year",
            QueryHints {
                first_author: first_author.clone(),
                fuzzy_first_author: true,
                year: reference.year,
                ..Default::default()
            },
            reference,
        ));
        out.push(fielded(
            "author-year-window",
            QueryHints {
                first_author: first_author.clone(),
                year: reference.year,
                year_window: Some(config.fuzzy_year_window),
                ..Default::default()
            },
            reference,
        ));
    }

    // 12. Last resorts: drop the author, or drop the year.
    if reference.bibstem.is_some()
        && reference.year.is_some()
        && reference.volume.is_some()
        && reference.page.is_some()
    {
        out.push(fielded(
            "no-author",
            QueryHints {
                year: reference.year,
                volume: reference.volume.clone(),
                page: reference.page.clone(),
                bibstem: reference.bibstem.clone(),
                ..Default::default()
            },
            reference,
        ));
    }
    if has_author
        && reference.bibstem.is_some()
        && reference.volume.is_some()
        && reference.page.is_some()
    {
        out.push(fielded(
            "no-year",
            QueryHints {
                first_author,
                volume: reference.volume.clone(),
                page: reference.page.clone(),
                bibstem: reference.bibstem.clone(),
                ..Default::default()
            },
            reference,
        ));
    }

    out
}

/// Extra hypotheses for venues with idiosyncratic cataloguing.
fn venue_family(
    reference: &DigestedReference,
    index: &FuzzyNameIndex,
    first_author: &Option<String>,
    out: &mut Vec<Hypothesis>,
) {
    let Some(year) = reference.year else { return };
    let venue_lower = reference
        .venue
        .as_deref()
        .unwrap_or("")
        .to_lowercase();

    // Abstract series cross-listed under sibling stems.
    if let Some(stem) = reference.bibstem.as_deref() {
        let clean = stem.trim_matches('.');
        if let Some(siblings) = ABSTRACT_CROSS_LIST.get(clean) {
            for sibling in siblings {
                out.push(key_hypothesis("abstract-cross-list", reference, sibling));
            }
        }
        // Letters-journal variant of a parent journal.
        for (parent, letters) in LETTERS_VARIANTS.iter() {
            if clean.eq_ignore_ascii_case(parent) {
                out.push(key_hypothesis("letters-variant", reference, letters));
            }
        }
    }

    // Conference series recognizable from the raw venue text, useful when
    // the authority lookup came up empty or picked a generic stem.
    for (pattern, stem) in CONFERENCE_PATTERNS.iter() {
        if venue_lower.contains(pattern)
            && reference.bibstem.as_deref().map(|s| s.trim_matches('.')) != Some(*stem)
        {
            out.push(key_hypothesis("conference-pattern", reference, stem));
        }
    }

    // Conference stems favour author + year over volume/page noise.
    if let Some(stem) = reference.bibstem.as_deref() {
        if index.is_conference(stem.trim_matches('.')) && first_author.is_some() {
            out.push(Hypothesis {
                name: "conference-author-year",
                hints: QueryHints {
                    first_author: first_author.clone(),
                    year: Some(year),
                    bibstem: Some(stem.to_string()),
                    ..Default::default()
                },
                scoring: Scoring::Fielded,
                details: details_of(reference),
            });
        }
    }
}
