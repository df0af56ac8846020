//! Digested reference: the normalized, immutable view of the fields the
//! upstream citation parser discovered.
//!
//! The input contract is a string-valued field mapping where absence is
//! distinguishable from the empty string ([`ReferenceFields`], all fields
//! `Option`). Digestion happens once per incoming reference: author names
//! are split and reduced to bare surnames, the page qualifier is detached,
//! the venue is resolved to a bibstem through the fuzzy name index, and the
//! result is discarded after one resolution.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use bibresolve_sourcematch::FuzzyNameIndex;

use crate::ResolverConfig;

/// Raw field mapping from the citation-parsing front-end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceFields {
    pub authors: Option<String>,
    pub year: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub page: Option<String>,
    pub title: Option<String>,
    /// Venue name; books arrive under the `book` key.
    #[serde(alias = "book")]
    pub journal: Option<String>,
    /// The original reference string, kept for audit and failure reporting.
    pub refstr: Option<String>,
    pub doi: Option<String>,
    pub arxiv: Option<String>,
    pub ascl: Option<String>,
    pub issn: Option<String>,
}

/// Normalized view of one reference, computed eagerly at construction.
#[derive(Debug, Clone)]
pub struct DigestedReference {
    pub refstr: String,
    pub authors_raw: Option<String>,
    /// Bare normalized surnames, citation order.
    pub surnames: Vec<String>,
    pub first_initial: Option<char>,
    pub has_etal: bool,
    pub is_collaboration: bool,
    pub year: Option<i32>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    /// Page or electronic id, qualifier detached and dots removed.
    pub page: Option<String>,
    pub qualifier: Option<char>,
    pub title: Option<String>,
    pub venue: Option<String>,
    /// Resolved once; ground truth for every subsequent query.
    pub bibstem: Option<String>,
    pub doi: Option<String>,
    pub arxiv: Option<String>,
    pub ascl: Option<String>,
    pub issn: Option<String>,
}

static ETAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)[,\s]*\bet\.?\s*al\.?").unwrap());
static COLLAB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(collaboration|consortium|team)\b").unwrap());
static AND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+and\s+|\s*&\s*").unwrap());
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(1[89]\d{2}|20\d{2})\b").unwrap());
static PAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]?)(\d[\d.]*)([A-Za-z]?)$").unwrap());
static SURNAME_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(van|von|de|del|della|di|da|le|la|mac|mc|o)$").unwrap());

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// ASCII-fold, lowercase, collapse hyphens. "Núñez-Pérez" -> "nunezperez".
pub fn normalize_surname(name: &str) -> String {
    name.nfkd()
        .filter(|c| c.is_ascii())
        .collect::<String>()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Extract the surname from one author name, handling both "Surname, I."
/// and "Given Surname" orders plus two-part surnames like "van Bavel".
pub fn surname_of(name: &str) -> String {
    let name = name.trim();
    if let Some((before, _)) = name.split_once(',') {
        return normalize_surname(before);
    }
    let parts: Vec<&str> = name.split_whitespace().collect();
    match parts.as_slice() {
        [] => String::new(),
        [only] => normalize_surname(only),
        rest => {
            let last = rest[rest.len() - 1];
            if rest.len() >= 2 && SURNAME_PREFIX_RE.is_match(rest[rest.len() - 2]) {
                normalize_surname(&format!("{} {}", rest[rest.len() - 2], last))
            } else {
                normalize_surname(last)
            }
        }
    }
}

/// Does a comma chunk look like bare initials ("A.", "M. J.", "J.-P.")?
fn looks_like_initials(chunk: &str) -> bool {
    let trimmed = chunk.trim();
    if trimmed.is_empty() {
        return false;
    }
    trimmed
        .split(|c: char| c == '.' || c == ' ' || c == '-')
        .filter(|p| !p.is_empty())
        .all(|p| p.len() <= 2 && p.chars().all(|c| c.is_ascii_uppercase()))
}

/// Split a free-text author list into individual full-name strings.
pub fn split_author_list(raw: &str) -> Vec<String> {
    let cleaned = ETAL_RE.replace_all(raw, "");
    if cleaned.contains(';') {
        return cleaned
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }

    let joined = AND_RE.replace_all(&cleaned, ";");
    let mut names: Vec<String> = Vec::new();
    for group in joined.split(';') {
        // Within a group, commas either separate authors or separate a
        // surname from its initials; initials chunks reattach to the
        // preceding surname.
        for chunk in group.split(',') {
            let chunk = chunk.trim();
            if chunk.is_empty() {
                continue;
            }
            if looks_like_initials(chunk) {
                if let Some(last) = names.last_mut() {
                    last.push_str(", ");
                    last.push_str(chunk);
                    continue;
                }
            }
            names.push(chunk.to_string());
        }
    }
    names
}

/// First author's first initial, used in the bibcode key's trailing slot.
fn first_initial_of(name: &str) -> Option<char> {
    let relevant = match name.split_once(',') {
        Some((_, after)) => after,
        None => name,
    };
    relevant
        .chars()
        .find(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
}

/// Detach an optional qualifier letter and strip dots from a page value.
/// "L123" -> ('L', "123"); "207.04" -> "20704"; "123-145" keeps "123".
pub fn digest_page(raw: &str) -> (Option<char>, Option<String>) {
    let first = raw
        .split(['-', '\u{2013}'])
        .next()
        .unwrap_or(raw)
        .trim()
        .replace(' ', "");
    if first.is_empty() {
        return (None, None);
    }
    if let Some(caps) = PAGE_RE.captures(&first) {
        let leading = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let trailing = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        let qualifier = leading
            .chars()
            .next()
            .or_else(|| trailing.chars().next())
            .map(|c| c.to_ascii_uppercase());
        let digits: String = caps[2].chars().filter(|c| c.is_ascii_digit()).collect();
        (qualifier, Some(digits))
    } else {
        // Electronic ids and anything else stay literal.
        (None, Some(first))
    }
}

fn strip_identifier_prefix<'a>(value: &'a str, prefix: &str) -> &'a str {
    let trimmed = value.trim();
    // get() rather than a byte slice: the value is caller input and may put
    // a multi-byte character where the prefix would end.
    match trimmed.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => {
            trimmed[prefix.len()..].trim_start_matches(':').trim()
        }
        _ => trimmed,
    }
}

impl DigestedReference {
    pub fn digest(
        fields: &ReferenceFields,
        index: &FuzzyNameIndex,
        config: &ResolverConfig,
    ) -> Self {
        let authors_raw = non_empty(&fields.authors).map(String::from);
        let (surnames, first_initial, has_etal, is_collaboration) = match &authors_raw {
            Some(raw) => {
                let names = split_author_list(raw);
                let surnames: Vec<String> = names
                    .iter()
                    .map(|n| surname_of(n))
                    .filter(|s| !s.is_empty())
                    .collect();
                let initial = names.first().and_then(|n| first_initial_of(n));
                (
                    surnames,
                    initial,
                    ETAL_RE.is_match(raw),
                    COLLAB_RE.is_match(raw),
                )
            }
            None => (Vec::new(), None, false, false),
        };

        let year = non_empty(&fields.year)
            .and_then(|y| YEAR_RE.find(y))
            .and_then(|m| m.as_str().parse::<i32>().ok());

        let (qualifier, page) = match non_empty(&fields.page) {
            Some(raw) => digest_page(raw),
            None => (None, None),
        };

        let venue = non_empty(&fields.journal).map(String::from);
        let bibstem = venue.as_deref().and_then(|v| {
            // A venue that is literally a known code needs no fuzzy pass.
            if !index.names_for(v).is_empty() {
                return Some(v.to_string());
            }
            index
                .best_code(v, config.bibstem_min_score)
                .map(|m| m.code)
        });

        let refstr = non_empty(&fields.refstr)
            .map(String::from)
            .unwrap_or_else(|| {
                [
                    fields.authors.as_deref(),
                    fields.year.as_deref(),
                    fields.journal.as_deref(),
                    fields.volume.as_deref(),
                    fields.page.as_deref(),
                    fields.title.as_deref(),
                ]
                .iter()
                .flatten()
                .copied()
                .collect::<Vec<_>>()
                .join(", ")
            });

        Self {
            refstr,
            authors_raw,
            surnames,
            first_initial,
            has_etal,
            is_collaboration,
            year,
            volume: non_empty(&fields.volume).map(String::from),
            issue: non_empty(&fields.issue).map(String::from),
            page,
            qualifier,
            title: non_empty(&fields.title).map(String::from),
            venue,
            bibstem,
            doi: non_empty(&fields.doi).map(|d| strip_identifier_prefix(d, "doi").to_string()),
            arxiv: non_empty(&fields.arxiv)
                .map(|a| strip_identifier_prefix(a, "arxiv").to_string()),
            ascl: non_empty(&fields.ascl).map(|a| strip_identifier_prefix(a, "ascl").to_string()),
            issn: non_empty(&fields.issn).map(String::from),
        }
    }

    pub fn has_identifier(&self) -> bool {
        self.doi.is_some() || self.arxiv.is_some() || self.ascl.is_some()
    }

    /// How many of the core bibliographic fields were discovered.
    pub fn field_count(&self) -> usize {
        [
            !self.surnames.is_empty(),
            self.venue.is_some(),
            self.title.is_some(),
            self.volume.is_some(),
            self.page.is_some(),
            self.year.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    pub fn volume_number(&self) -> Option<u32> {
        self.volume.as_deref().and_then(|v| v.trim().parse().ok())
    }
}
