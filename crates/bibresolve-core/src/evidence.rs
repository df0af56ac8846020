//! Evidence ledger: the per-candidate accumulation of field scores.
//!
//! Each comparator contributes one bounded `(score, label)` pair; a ledger
//! collects them for one (hypothesis, candidate) pairing. The ledger's sum
//! drives acceptance (`sum >= min_score_per_evidence * len`), its mean is
//! the externally reported solution score, and any single score at or below
//! zero is a veto strong enough to block casual acceptance.

use std::fmt;

/// Which reference field an evidence score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Author,
    Year,
    Volume,
    Page,
    Venue,
    Title,
    Bibcode,
    Doi,
    Arxiv,
    Ascl,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Author => "author",
            Field::Year => "year",
            Field::Volume => "volume",
            Field::Page => "page",
            Field::Venue => "venue",
            Field::Title => "title",
            Field::Bibcode => "bibcode",
            Field::Doi => "doi",
            Field::Arxiv => "arxiv",
            Field::Ascl => "ascl",
        };
        f.write_str(name)
    }
}

/// One bounded comparator verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evidence {
    pub score: f64,
    pub label: Field,
}

impl Evidence {
    /// Build an evidence clamped into the configured score range.
    pub fn clamped(score: f64, label: Field, min: f64, max: f64) -> Self {
        Self {
            score: score.clamp(min, max),
            label,
        }
    }
}

/// Append-only ordered ledger of evidences for one candidate.
///
/// The sum is kept current on every push, so the aggregate is always
/// re-derivable from the items but never recomputed on read.
#[derive(Debug, Clone, Default)]
pub struct Evidences {
    items: Vec<Evidence>,
    sum: f64,
}

impl Evidences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, evidence: Evidence) {
        self.sum += evidence.score;
        self.items.push(evidence);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Evidence> {
        self.items.iter()
    }

    /// Cached aggregate score.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Per-evidence mean: the score reported with a solution.
    pub fn mean(&self) -> f64 {
        if self.items.is_empty() {
            0.0
        } else {
            self.sum / self.items.len() as f64
        }
    }

    /// Any evidence at or below zero signals doubt strong enough to block
    /// casual acceptance.
    pub fn has_veto(&self) -> bool {
        self.items.iter().any(|e| e.score <= 0.0)
    }

    /// True when exactly one evidence is non-positive and it carries the
    /// given label. Used to forgive one missing field (e.g. a page the
    /// reference never had).
    pub fn single_veto_from(&self, label: Field) -> bool {
        let mut vetoes = self.items.iter().filter(|e| e.score <= 0.0);
        match (vetoes.next(), vetoes.next()) {
            (Some(e), None) => e.label == label,
            _ => false,
        }
    }

    /// Strong-match shortcut: true when every field of at least one curated
    /// combination is present and individually at the maximum score.
    pub fn count_votes(&self, combinations: &[Vec<Field>], max_score: f64) -> bool {
        combinations.iter().any(|combo| {
            combo.iter().all(|field| {
                self.items
                    .iter()
                    .any(|e| e.label == *field && e.score >= max_score)
            })
        })
    }
}

impl PartialEq for Evidences {
    fn eq(&self, other: &Self) -> bool {
        self.sum == other.sum
    }
}

impl PartialOrd for Evidences {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.sum.total_cmp(&other.sum))
    }
}
