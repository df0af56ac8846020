//! Pairwise field comparators.
//!
//! Each comparator scores one reference-side value against one
//! candidate-side value and returns a bounded [`Evidence`], or `None` to
//! abstain when there is nothing to compare. Comparators are pure: all
//! tunables come in through [`ResolverConfig`].

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::ResolverConfig;
use crate::evidence::{Evidence, Field};
use crate::reference::{digest_page, surname_of};

/// Venue stop-words ignored during word-coverage scoring.
static VENUE_STOP_WORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "of", "the", "and", "in", "on", "for", "a", "an", "to", "der", "die", "und", "dell",
        "della", "delle", "des", "du", "et", "la", "le",
    ]
});

/// Common venue abbreviations expanded before word-coverage scoring.
static VENUE_ABBREVIATIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("j", "journal");
    m.insert("astrophys", "astrophysical");
    m.insert("astron", "astronomical");
    m.insert("astr", "astronomical");
    m.insert("phys", "physical");
    m.insert("geophys", "geophysical");
    m.insert("rev", "review");
    m.insert("lett", "letters");
    m.insert("mon", "monthly");
    m.insert("not", "notices");
    m.insert("r", "royal");
    m.insert("roy", "royal");
    m.insert("soc", "society");
    m.insert("proc", "proceedings");
    m.insert("conf", "conference");
    m.insert("ser", "series");
    m.insert("ann", "annual");
    m.insert("intl", "international");
    m.insert("int", "international");
    m.insert("suppl", "supplement");
    m.insert("bull", "bulletin");
    m.insert("am", "american");
    m.insert("amer", "american");
    m.insert("nat", "nature");
    m
});

static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

fn clamp(score: f64, config: &ResolverConfig) -> f64 {
    score.clamp(config.evidence_min, config.evidence_max)
}

fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    rapidfuzz::distance::levenshtein::normalized_similarity(a.chars(), b.chars())
}

// ---------------------------------------------------------------------------
// Authors
// ---------------------------------------------------------------------------

/// Per-candidate-author match bookkeeping used by [`compare_authors`].
#[derive(Debug, Default, PartialEq)]
struct AuthorCounts {
    /// Candidate authors matched by some reference surname.
    matches: usize,
    /// Candidate authors the reference never names.
    missing: usize,
    /// Reference surnames the candidate lacks.
    extras: usize,
    first_author_missing: bool,
}

fn count_matching_authors(
    ref_surnames: &[String],
    candidate_surnames: &[String],
    fuzzy_threshold: f64,
) -> AuthorCounts {
    let mut counts = AuthorCounts::default();
    let mut ref_used = vec![false; ref_surnames.len()];

    for (pos, candidate) in candidate_surnames.iter().enumerate() {
        let hit = ref_surnames.iter().enumerate().find(|(i, name)| {
            !ref_used[*i]
                && (*name == candidate || levenshtein_similarity(name, candidate) > fuzzy_threshold)
        });
        match hit {
            Some((i, _)) => {
                ref_used[i] = true;
                counts.matches += 1;
            }
            None => {
                counts.missing += 1;
                if pos == 0 {
                    counts.first_author_missing = true;
                }
            }
        }
    }
    counts.extras = ref_used.iter().filter(|used| !**used).count();
    counts
}

/// Score the reference's author list against a candidate's.
///
/// A reference naming exactly one author that matches the candidate's
/// first author of three or more is the first-author-only citation
/// convention and earns the maximum. Otherwise the score is
/// `(matches - extras - first-author discount) / candidate count`; an
/// "et al."-style truncation additionally charges the candidate authors
/// missing from the reference, since an et-al claim against a list the
/// reference fully names is contradictory.
pub fn compare_authors(
    ref_surnames: &[String],
    has_etal: bool,
    candidate_authors: &[String],
    config: &ResolverConfig,
) -> Option<Evidence> {
    if ref_surnames.is_empty() || candidate_authors.is_empty() {
        return None;
    }

    let candidate_surnames: Vec<String> = candidate_authors
        .iter()
        .map(|a| surname_of(a))
        .filter(|s| !s.is_empty())
        .collect();
    if candidate_surnames.is_empty() {
        return None;
    }

    let counts = count_matching_authors(
        ref_surnames,
        &candidate_surnames,
        config.author_fuzzy_threshold,
    );

    let first_author_matched = !counts.first_author_missing;
    let truncated_list = ref_surnames.len() < candidate_surnames.len()
        && counts.extras == 0
        && candidate_surnames.len() >= 3;
    if first_author_matched && truncated_list && (has_etal || ref_surnames.len() == 1) {
        return Some(Evidence {
            score: config.evidence_max,
            label: Field::Author,
        });
    }

    let discount = if counts.first_author_missing {
        config.first_author_missing_discount
    } else {
        0.0
    };
    let mut numerator = counts.matches as f64 - counts.extras as f64 - discount;
    if has_etal {
        numerator -= counts.missing as f64;
    }
    let denominator = candidate_surnames.len() as f64;

    Some(Evidence {
        score: clamp(numerator / denominator, config),
        label: Field::Author,
    })
}

// ---------------------------------------------------------------------------
// Year
// ---------------------------------------------------------------------------

/// Exact year scores the maximum, off-by-one half credit, anything further
/// drops to a veto fast.
pub fn compare_year(
    ref_year: Option<i32>,
    candidate_year: Option<&str>,
    config: &ResolverConfig,
) -> Option<Evidence> {
    let ref_year = ref_year?;
    let candidate_year: i32 = candidate_year?.trim().parse().ok()?;
    let distance = (ref_year - candidate_year).abs() as f64;
    Some(Evidence {
        score: clamp(config.evidence_max - 0.5 * distance, config),
        label: Field::Year,
    })
}

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

fn hamming_one(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.chars().zip(b.chars()).filter(|(x, y)| x != y).count() == 1
}

/// Exact integer match scores the maximum; exactly one side present is
/// always a strong negative. Mismatches that look like transcription slips
/// (distance a multiple of ten, or a single wrong digit) get a weak
/// positive; anything else scales negative with magnitude distance.
pub fn compare_volume(
    ref_volume: Option<&str>,
    candidate_volume: Option<&str>,
    config: &ResolverConfig,
) -> Option<Evidence> {
    let (ref_volume, candidate_volume) = match (ref_volume, candidate_volume) {
        (None, None) => return None,
        (Some(r), Some(c)) => (r.trim(), c.trim()),
        _ => {
            return Some(Evidence {
                score: config.evidence_min,
                label: Field::Volume,
            });
        }
    };

    let score = match (
        ref_volume.parse::<u64>().ok(),
        candidate_volume.parse::<u64>().ok(),
    ) {
        (Some(r), Some(c)) if r == c => config.evidence_max,
        (Some(r), Some(c)) => {
            let distance = r.abs_diff(c);
            if distance % 10 == 0 || hamming_one(ref_volume, candidate_volume) {
                0.25
            } else {
                -(distance as f64 / r.max(c) as f64).min(1.0)
            }
        }
        // Non-numeric volumes fall back to edit distance.
        _ => {
            if ref_volume.eq_ignore_ascii_case(candidate_volume) {
                config.evidence_max
            } else {
                2.0 * levenshtein_similarity(
                    &ref_volume.to_lowercase(),
                    &candidate_volume.to_lowercase(),
                ) - 1.0
            }
        }
    };

    Some(Evidence {
        score: clamp(score, config),
        label: Field::Volume,
    })
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// Integer match scores the maximum, with a demerit (not a veto) when the
/// qualifier letters disagree. One-sided absence is neutral zero: many
/// citation styles legitimately omit pages. Electronic ids compare
/// literally with an edit-distance fallback.
pub fn compare_page(
    ref_page: Option<&str>,
    ref_qualifier: Option<char>,
    candidate_page: Option<&str>,
    config: &ResolverConfig,
) -> Option<Evidence> {
    let (ref_page, candidate_raw) = match (ref_page, candidate_page) {
        (None, None) => return None,
        (Some(r), Some(c)) => (r, c),
        _ => {
            return Some(Evidence {
                score: 0.0,
                label: Field::Page,
            });
        }
    };

    let (candidate_qualifier, candidate_page) = digest_page(candidate_raw);
    let Some(candidate_page) = candidate_page else {
        return Some(Evidence {
            score: 0.0,
            label: Field::Page,
        });
    };

    let score = match (ref_page.parse::<u64>().ok(), candidate_page.parse::<u64>().ok()) {
        (Some(r), Some(c)) if r == c => {
            let qualifiers_disagree = matches!(
                (ref_qualifier, candidate_qualifier),
                (Some(a), Some(b)) if a != b
            ) || (ref_qualifier.is_none() && candidate_qualifier.is_some())
                || (ref_qualifier.is_some() && candidate_qualifier.is_none());
            if qualifiers_disagree && (ref_qualifier.is_some() || candidate_qualifier.is_some()) {
                if ref_qualifier.is_some() && candidate_qualifier.is_some() {
                    0.5
                } else {
                    0.75
                }
            } else {
                config.evidence_max
            }
        }
        (Some(r), Some(c)) => {
            let distance = r.abs_diff(c);
            if distance <= 4 {
                // Interior-page citation of the same article.
                0.25
            } else {
                -(distance as f64 / r.max(c) as f64).min(1.0)
            }
        }
        _ => {
            if ref_page.eq_ignore_ascii_case(&candidate_page) {
                config.evidence_max
            } else {
                2.0 * levenshtein_similarity(
                    &ref_page.to_lowercase(),
                    &candidate_page.to_lowercase(),
                ) - 1.0
            }
        }
    };

    Some(Evidence {
        score: clamp(score, config),
        label: Field::Page,
    })
}

// ---------------------------------------------------------------------------
// Venue
// ---------------------------------------------------------------------------

fn venue_words(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    NON_ALNUM_RE
        .split(&lower)
        .filter(|w| !w.is_empty() && !VENUE_STOP_WORDS.iter().any(|stop| stop == w))
        .map(|w| VENUE_ABBREVIATIONS.get(w).copied().unwrap_or(w))
        .map(String::from)
        .collect()
}

/// Bibstem of a candidate bibcode: characters 4..9 with the dot padding
/// stripped ("2019AAS...23320704A" -> "AAS").
pub fn bibcode_stem(bibcode: &str) -> &str {
    // Backend rows are untrusted; a multi-byte character in the stem slot
    // must yield an empty stem, not a slicing panic.
    bibcode.get(4..9).map_or("", |stem| stem.trim_matches('.'))
}

/// If the reference's resolved bibstem sits inside the candidate's bibcode
/// (or the candidate's stem inside the reference venue text) the venues are
/// identical and score the maximum. Otherwise expand abbreviations, drop
/// stop-words, and score word coverage: a reference word missing from the
/// candidate costs twice what a present word earns.
pub fn compare_venue(
    ref_venue: Option<&str>,
    ref_bibstem: Option<&str>,
    candidate_venue: Option<&str>,
    candidate_bibcode: &str,
    config: &ResolverConfig,
) -> Option<Evidence> {
    let ref_venue = ref_venue?;
    let candidate_stem = bibcode_stem(candidate_bibcode);

    let identity = ref_bibstem.is_some_and(|stem| {
        !stem.is_empty() && candidate_stem.eq_ignore_ascii_case(stem.trim_matches('.'))
    }) || (!candidate_stem.is_empty()
        && candidate_stem.len() >= 3
        && ref_venue
            .to_lowercase()
            .contains(&candidate_stem.to_lowercase()));
    if identity {
        return Some(Evidence {
            score: config.evidence_max,
            label: Field::Venue,
        });
    }

    let ref_words = venue_words(ref_venue);
    if ref_words.is_empty() {
        return None;
    }
    let mut candidate_text = venue_words(candidate_venue.unwrap_or("")).join(" ");
    candidate_text.push(' ');
    candidate_text.push_str(&candidate_bibcode.to_lowercase());

    let present = ref_words
        .iter()
        .filter(|w| candidate_text.contains(w.as_str()))
        .count();
    let missing = ref_words.len() - present;
    let score = (present as f64 - 2.0 * missing as f64) / ref_words.len() as f64;

    Some(Evidence {
        score: clamp(score, config),
        label: Field::Venue,
    })
}

// ---------------------------------------------------------------------------
// Title
// ---------------------------------------------------------------------------

fn normalize_title(title: &str) -> String {
    use unicode_normalization::UnicodeNormalization;
    let folded: String = title.nfkd().filter(|c| c.is_ascii()).collect();
    folded
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Whole-string similarity over aggressively normalized titles. Abstains
/// when the reference carries no title.
pub fn compare_title(
    ref_title: Option<&str>,
    candidate_title: Option<&str>,
    config: &ResolverConfig,
) -> Option<Evidence> {
    let ref_title = normalize_title(ref_title?);
    let candidate_title = normalize_title(candidate_title?);
    if ref_title.is_empty() || candidate_title.is_empty() {
        return None;
    }
    let similarity = rapidfuzz::fuzz::ratio(ref_title.chars(), candidate_title.chars());
    Some(Evidence {
        score: clamp(2.0 * similarity - 1.0, config),
        label: Field::Title,
    })
}
