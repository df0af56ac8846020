//! Citation-to-bibcode resolution.
//!
//! The pipeline for one reference: digest the discovered fields, run the
//! normalization passes, generate the hypothesis ladder, then let the solve
//! loop attempt each hypothesis against the search backend until one
//! resolves or the ladder is exhausted. All tunables live in an explicit
//! [`ResolverConfig`] value threaded through every component; the fuzzy
//! name index is built once at startup and shared read-only.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub mod backend;
pub mod compare;
pub mod config_file;
pub mod evidence;
pub mod hypothesis;
pub mod normalize;
pub mod query;
pub mod reference;
pub mod solve;

// Re-export for convenience
pub use backend::{
    BackendError, CandidateRecord, MockBackend, MockResponse, SearchBackend, SearchResponse,
    SolrBackend,
};
pub use bibresolve_sourcematch::FuzzyNameIndex;
pub use evidence::{Evidence, Evidences, Field};
pub use hypothesis::{Hypothesis, Scoring};
pub use query::SearchQuery;
pub use reference::{DigestedReference, ReferenceFields};
pub use solve::{Attempt, Scored};

/// Every tunable of the resolution pipeline. Immutable once built; pass it
/// by reference, never stash it in a global.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Lower bound of the evidence score range.
    pub evidence_min: f64,
    /// Upper bound of the evidence score range; also "the maximum score".
    pub evidence_max: f64,
    /// A ledger is acceptable when its sum reaches this fraction of its
    /// evidence count. Empirically tuned; preserve the formula as is.
    pub min_score_per_evidence: f64,
    /// Normalized edit-distance similarity above which two surnames count
    /// as the same author.
    pub author_fuzzy_threshold: f64,
    /// Penalty applied when specifically the first author is missing.
    pub first_author_missing_discount: f64,
    /// Minimum similarity for a fuzzy venue-name to bibstem resolution.
    pub bibstem_min_score: f64,
    /// Half-width of the year range in the fuzzy-year fallback hypothesis.
    pub fuzzy_year_window: u32,
    /// Row cap per query; a hit count at or above it is overflow.
    pub row_cap: usize,
    /// Per-request backend timeout.
    pub backend_timeout: Duration,
    /// Field combinations that bypass normal thresholds when every member
    /// is individually at the maximum score.
    pub strong_combinations: Vec<Vec<Field>>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            evidence_min: -1.0,
            evidence_max: 1.0,
            min_score_per_evidence: 0.4,
            author_fuzzy_threshold: 0.7,
            first_author_missing_discount: 1.0,
            bibstem_min_score: 0.6,
            fuzzy_year_window: 5,
            row_cap: 30,
            backend_timeout: Duration::from_secs(10),
            strong_combinations: vec![
                vec![Field::Author, Field::Venue, Field::Volume, Field::Year],
                vec![Field::Author, Field::Year, Field::Page],
            ],
        }
    }
}

/// A positive resolution: the chosen record and how it was chosen.
#[derive(Debug, Clone)]
pub struct Solution {
    pub bibcode: String,
    /// Per-evidence mean of the winning ledger.
    pub score: f64,
    pub hypothesis: String,
    pub evidences: Evidences,
}

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("too few discovered fields to form any hypothesis")]
    Incomplete,
    #[error("no hypothesis produced an acceptable, unambiguous candidate")]
    NoSolution,
    #[error("{} comparably scored candidates could not be separated", candidates.len())]
    Undecidable { candidates: Vec<Scored> },
    #[error("backend failure: {0}")]
    Backend(#[from] BackendError),
}

/// Owns the configuration, the shared name index, and the backend handle.
/// Cheap to clone; one instance serves any number of concurrent
/// resolutions since nothing in it is mutable.
#[derive(Clone)]
pub struct Resolver {
    config: ResolverConfig,
    index: Arc<FuzzyNameIndex>,
    backend: Arc<dyn SearchBackend>,
}

impl Resolver {
    pub fn new(
        config: ResolverConfig,
        index: Arc<FuzzyNameIndex>,
        backend: Arc<dyn SearchBackend>,
    ) -> Self {
        Self {
            config,
            index,
            backend,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve one field mapping to a bibcode, or fail with a typed error.
    pub async fn resolve(&self, fields: &ReferenceFields) -> Result<Solution, ResolverError> {
        let mut reference = DigestedReference::digest(fields, &self.index, &self.config);
        normalize::apply_all(&mut reference);

        if !reference.has_identifier() && reference.field_count() < 3 {
            tracing::warn!(refstr = %reference.refstr, "too few fields to resolve");
            return Err(ResolverError::Incomplete);
        }

        let hypotheses = hypothesis::generate(&reference, &self.index, &self.config);
        if hypotheses.is_empty() {
            tracing::warn!(refstr = %reference.refstr, "no hypothesis applicable");
            return Err(ResolverError::Incomplete);
        }

        solve::solve(&reference, &hypotheses, self.backend.as_ref(), &self.config).await
    }
}
