//! The solve loop: attempt hypotheses in order until one resolves.
//!
//! Every hypothesis attempt ends in exactly one tagged outcome: accepted,
//! deferred (a tie worth revisiting), or unresolved. The loop branches on
//! the tag; there is no control-flow-by-error. Only a backend failure
//! aborts the whole resolution, since later hypotheses would fail the same
//! way.

use std::collections::HashMap;

use crate::backend::{CandidateRecord, SearchBackend};
use crate::compare;
use crate::evidence::{Evidence, Evidences, Field};
use crate::hypothesis::{Hypothesis, Scoring};
use crate::query;
use crate::reference::DigestedReference;
use crate::{ResolverConfig, ResolverError, Solution};

/// One scored candidate, kept for deferred ties and audit.
#[derive(Debug, Clone)]
pub struct Scored {
    pub candidate: CandidateRecord,
    pub evidences: Evidences,
    pub hypothesis: &'static str,
}

/// Outcome of one hypothesis attempt.
#[derive(Debug)]
pub enum Attempt {
    Accepted(Solution),
    /// Comparably scored, non-vetoed candidates worth revisiting after all
    /// hypotheses have run.
    Deferred(Vec<Scored>),
    Unresolved,
}

/// Score one candidate against the reference; each comparator either
/// contributes one evidence or abstains.
pub fn score_candidate(
    reference: &DigestedReference,
    hypothesis: &Hypothesis,
    candidate: &CandidateRecord,
    config: &ResolverConfig,
) -> Evidences {
    let details = &hypothesis.details;
    let mut ledger = Evidences::new();

    if let Some(e) =
        compare::compare_authors(&details.surnames, details.has_etal, &candidate.author, config)
    {
        ledger.push(e);
    }
    if let Some(e) = compare::compare_year(reference.year, candidate.year.as_deref(), config) {
        ledger.push(e);
    }
    if let Some(e) =
        compare::compare_volume(reference.volume.as_deref(), candidate.volume.as_deref(), config)
    {
        ledger.push(e);
    }
    if let Some(e) = compare::compare_page(
        reference.page.as_deref(),
        details.qualifier,
        candidate.first_page(),
        config,
    ) {
        ledger.push(e);
    }
    if let Some(e) = compare::compare_venue(
        reference.venue.as_deref(),
        reference.bibstem.as_deref(),
        candidate.venue.as_deref(),
        &candidate.bibcode,
        config,
    ) {
        ledger.push(e);
    }
    if let Some(e) =
        compare::compare_title(reference.title.as_deref(), candidate.first_title(), config)
    {
        ledger.push(e);
    }

    ledger
}

fn solution_of(scored: Scored) -> Solution {
    tracing::info!(
        bibcode = %scored.candidate.bibcode,
        hypothesis = scored.hypothesis,
        score = scored.evidences.mean(),
        "accepted candidate"
    );
    Solution {
        bibcode: scored.candidate.bibcode.clone(),
        score: scored.evidences.mean(),
        hypothesis: scored.hypothesis.to_string(),
        evidences: scored.evidences,
    }
}

fn accept(scored: Scored) -> Attempt {
    Attempt::Accepted(solution_of(scored))
}

/// Lowercase an identifier and drop a leading scheme tag, so that
/// `arXiv:1901.01234` and `1901.01234` compare equal.
fn canonical_identifier(id: &str) -> String {
    let lower = id.trim().to_lowercase();
    for scheme in ["doi:", "arxiv:", "ascl:"] {
        if let Some(rest) = lower.strip_prefix(scheme) {
            return rest.trim_start().to_string();
        }
    }
    lower
}

fn identifier_match(
    docs: &[CandidateRecord],
    wanted: &str,
    haystack: impl Fn(&CandidateRecord) -> Vec<String>,
) -> Option<usize> {
    // Identifiers match only on equality; one DOI being a prefix of a
    // longer, distinct DOI is not a hit.
    let wanted = canonical_identifier(wanted);
    docs.iter().position(|doc| {
        haystack(doc)
            .iter()
            .any(|id| canonical_identifier(id) == wanted)
    })
}

fn single_evidence(candidate: &CandidateRecord, label: Field, hypothesis: &'static str, config: &ResolverConfig) -> Scored {
    let mut evidences = Evidences::new();
    evidences.push(Evidence {
        score: config.evidence_max,
        label,
    });
    Scored {
        candidate: candidate.clone(),
        evidences,
        hypothesis,
    }
}

fn passes_threshold(scored: &Scored, config: &ResolverConfig) -> bool {
    !scored.evidences.is_empty()
        && scored.evidences.sum() >= config.min_score_per_evidence * scored.evidences.len() as f64
}

fn normalized_title(candidate: &CandidateRecord) -> String {
    candidate
        .first_title()
        .unwrap_or("")
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Decide a fielded hypothesis from its scored candidates.
fn fielded_decision(
    reference: &DigestedReference,
    hypothesis: &Hypothesis,
    docs: Vec<CandidateRecord>,
    config: &ResolverConfig,
) -> Attempt {
    let scored: Vec<Scored> = docs
        .into_iter()
        .map(|candidate| {
            let evidences = score_candidate(reference, hypothesis, &candidate, config);
            Scored {
                candidate,
                evidences,
                hypothesis: hypothesis.name,
            }
        })
        .collect();

    // Strong-match shortcut: a curated field combination entirely at the
    // maximum bypasses normal thresholds, but only when unambiguous.
    let mut strong = scored
        .iter()
        .filter(|s| {
            s.evidences
                .count_votes(&config.strong_combinations, config.evidence_max)
        })
        .collect::<Vec<_>>();
    if strong.len() == 1 {
        return accept(strong.remove(0).clone());
    }

    let mut survivors: Vec<&Scored> = scored
        .iter()
        .filter(|s| passes_threshold(s, config) && !s.evidences.has_veto())
        .collect();

    if survivors.is_empty() {
        // Forgive exactly one candidate whose only doubt is a page the
        // reference never carried.
        if reference.page.is_none() {
            let mut forgivable: Vec<&Scored> = scored
                .iter()
                .filter(|s| {
                    passes_threshold(s, config) && s.evidences.single_veto_from(Field::Page)
                })
                .collect();
            if forgivable.len() == 1 {
                return accept(forgivable.remove(0).clone());
            }
        }
        return Attempt::Unresolved;
    }

    if survivors.len() == 1 {
        return accept(survivors.remove(0).clone());
    }

    // Tie-breaking. Sort by aggregate, bibcode as a deterministic anchor.
    survivors.sort_by(|a, b| {
        b.evidences
            .sum()
            .total_cmp(&a.evidences.sum())
            .then_with(|| a.candidate.bibcode.cmp(&b.candidate.bibcode))
    });

    if survivors[0].evidences.len() > survivors[1].evidences.len() {
        return accept(survivors[0].clone());
    }

    if survivors.len() == 2 {
        // Duplicate-looking entries: a title that is a prefix of the
        // other's marks the canonical record.
        let first = normalized_title(&survivors[0].candidate);
        let second = normalized_title(&survivors[1].candidate);
        if !first.is_empty() && first.len() < second.len() && second.starts_with(&first) {
            return accept(survivors[0].clone());
        }
        if !second.is_empty() && second.len() < first.len() && first.starts_with(&second) {
            return accept(survivors[1].clone());
        }
    }

    tracing::warn!(
        refstr = %reference.refstr,
        hypothesis = hypothesis.name,
        candidates = survivors.len(),
        "deferring tied candidates"
    );
    Attempt::Deferred(
        scored
            .iter()
            .filter(|s| !s.evidences.has_veto())
            .cloned()
            .collect(),
    )
}

/// Run one hypothesis end to end.
async fn attempt_hypothesis(
    reference: &DigestedReference,
    hypothesis: &Hypothesis,
    backend: &dyn SearchBackend,
    config: &ResolverConfig,
) -> Result<Attempt, ResolverError> {
    let search = query::translate(hypothesis, config);
    tracing::debug!(hypothesis = hypothesis.name, query = %search.q, "attempting hypothesis");

    let response = backend.search(&search).await?;

    if response.num_found >= config.row_cap {
        tracing::warn!(
            refstr = %reference.refstr,
            hypothesis = hypothesis.name,
            num_found = response.num_found,
            "query too broad, skipping hypothesis"
        );
        return Ok(Attempt::Unresolved);
    }
    if response.docs.is_empty() {
        return Ok(Attempt::Unresolved);
    }

    let attempt = match hypothesis.scoring {
        Scoring::IdentifierDoi => {
            let wanted = hypothesis.hints.doi.as_deref().unwrap_or("");
            match identifier_match(&response.docs, wanted, |d| d.doi.clone()) {
                Some(i) => accept(single_evidence(
                    &response.docs[i],
                    Field::Doi,
                    hypothesis.name,
                    config,
                )),
                None => Attempt::Unresolved,
            }
        }
        Scoring::IdentifierArxiv => {
            let wanted = hypothesis.hints.arxiv.as_deref().unwrap_or("");
            match identifier_match(&response.docs, wanted, |d| d.identifier.clone()) {
                Some(i) => accept(single_evidence(
                    &response.docs[i],
                    Field::Arxiv,
                    hypothesis.name,
                    config,
                )),
                None => Attempt::Unresolved,
            }
        }
        Scoring::IdentifierAscl => {
            let wanted = hypothesis.hints.ascl.as_deref().unwrap_or("");
            match identifier_match(&response.docs, wanted, |d| d.identifier.clone()) {
                Some(i) => accept(single_evidence(
                    &response.docs[i],
                    Field::Ascl,
                    hypothesis.name,
                    config,
                )),
                None => Attempt::Unresolved,
            }
        }
        Scoring::BibcodeKeys => {
            let hit = response
                .docs
                .iter()
                .find(|d| hypothesis.hints.bibcode_keys.contains(&d.bibcode));
            match hit {
                Some(doc) => accept(single_evidence(doc, Field::Bibcode, hypothesis.name, config)),
                None => Attempt::Unresolved,
            }
        }
        Scoring::Fielded => fielded_decision(reference, hypothesis, response.docs, config),
    };
    Ok(attempt)
}

/// Consolidate deferred ties: best ledger per bibcode, then a single or
/// strictly best survivor wins.
fn consolidate(reference: &DigestedReference, stash: Vec<Scored>) -> Result<Solution, ResolverError> {
    if stash.is_empty() {
        tracing::warn!(refstr = %reference.refstr, "no hypothesis produced a candidate");
        return Err(ResolverError::NoSolution);
    }

    let mut best_per_bibcode: HashMap<String, Scored> = HashMap::new();
    for scored in stash {
        match best_per_bibcode.get(&scored.candidate.bibcode) {
            Some(existing) if existing.evidences.sum() >= scored.evidences.sum() => {}
            _ => {
                best_per_bibcode.insert(scored.candidate.bibcode.clone(), scored);
            }
        }
    }

    let mut finalists: Vec<Scored> = best_per_bibcode.into_values().collect();
    finalists.sort_by(|a, b| {
        b.evidences
            .sum()
            .total_cmp(&a.evidences.sum())
            .then_with(|| a.candidate.bibcode.cmp(&b.candidate.bibcode))
    });

    let decided = finalists.len() == 1
        || finalists[0].evidences.sum() > finalists[1].evidences.sum();
    if decided {
        Ok(solution_of(finalists.remove(0)))
    } else {
        tracing::warn!(
            refstr = %reference.refstr,
            candidates = finalists.len(),
            "tie could not be separated"
        );
        Err(ResolverError::Undecidable {
            candidates: finalists,
        })
    }
}

/// Drive the full hypothesis ladder for one reference.
pub async fn solve(
    reference: &DigestedReference,
    hypotheses: &[Hypothesis],
    backend: &dyn SearchBackend,
    config: &ResolverConfig,
) -> Result<Solution, ResolverError> {
    let mut stash: Vec<Scored> = Vec::new();

    for hypothesis in hypotheses {
        match attempt_hypothesis(reference, hypothesis, backend, config).await? {
            Attempt::Accepted(solution) => return Ok(solution),
            Attempt::Deferred(mut pairs) => stash.append(&mut pairs),
            Attempt::Unresolved => {}
        }
    }

    consolidate(reference, stash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockResponse};
    use crate::hypothesis::{Details, QueryHints};
    use crate::reference::ReferenceFields;
    use bibresolve_sourcematch::FuzzyNameIndex;

    fn digest(fields: ReferenceFields) -> DigestedReference {
        DigestedReference::digest(&fields, &FuzzyNameIndex::default(), &ResolverConfig::default())
    }

    fn fielded_hypothesis(reference: &DigestedReference) -> Hypothesis {
        Hypothesis {
            name: "author-year",
            hints: QueryHints::default(),
            scoring: Scoring::Fielded,
            details: Details {
                surnames: reference.surnames.clone(),
                has_etal: reference.has_etal,
                qualifier: reference.qualifier,
            },
        }
    }

    fn candidate(bibcode: &str, authors: &[&str], year: &str, volume: &str, page: &str) -> CandidateRecord {
        CandidateRecord {
            bibcode: bibcode.to_string(),
            author: authors.iter().map(|s| s.to_string()).collect(),
            year: Some(year.to_string()),
            volume: Some(volume.to_string()),
            page: vec![page.to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn overflow_skips_hypothesis_without_scoring() {
        let reference = digest(ReferenceFields {
            authors: Some("Smith, J.".into()),
            year: Some("2019".into()),
            ..Default::default()
        });
        let hypotheses = vec![fielded_hypothesis(&reference)];
        let backend = MockBackend::with_sequence(vec![MockResponse::Overflow { num_found: 5000 }]);

        let config = ResolverConfig::default();
        let result = solve(&reference, &hypotheses, &backend, &config).await;
        assert!(matches!(result, Err(ResolverError::NoSolution)));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn backend_error_is_fatal_immediately() {
        let reference = digest(ReferenceFields {
            authors: Some("Smith, J.".into()),
            year: Some("2019".into()),
            ..Default::default()
        });
        let hypotheses = vec![fielded_hypothesis(&reference), fielded_hypothesis(&reference)];
        let backend =
            MockBackend::with_sequence(vec![MockResponse::Error("boom".into())]);

        let config = ResolverConfig::default();
        let result = solve(&reference, &hypotheses, &backend, &config).await;
        assert!(matches!(result, Err(ResolverError::Backend(_))));
        // The second hypothesis is never tried.
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn single_survivor_is_accepted() {
        let reference = digest(ReferenceFields {
            authors: Some("Smith, J.".into()),
            year: Some("2019".into()),
            volume: Some("880".into()),
            page: Some("45".into()),
            ..Default::default()
        });
        let hypotheses = vec![fielded_hypothesis(&reference)];
        let backend = MockBackend::with_sequence(vec![MockResponse::Rows(vec![
            candidate("2019ApJ...880...45S", &["Smith, John"], "2019", "880", "45"),
            candidate("2010MNRAS.401...12Q", &["Quincy, R."], "2010", "401", "12"),
        ])]);

        let config = ResolverConfig::default();
        let solution = solve(&reference, &hypotheses, &backend, &config).await.unwrap();
        assert_eq!(solution.bibcode, "2019ApJ...880...45S");
        assert_eq!(solution.hypothesis, "author-year");
        assert!(solution.score > 0.9);
    }

    #[tokio::test]
    async fn missing_page_forgiveness_accepts_provisionally() {
        let reference = digest(ReferenceFields {
            authors: Some("Smith, J.".into()),
            year: Some("2019".into()),
            volume: Some("880".into()),
            ..Default::default()
        });
        let hypotheses = vec![fielded_hypothesis(&reference)];
        let backend = MockBackend::with_sequence(vec![MockResponse::Rows(vec![candidate(
            "2019ApJ...880...45S",
            &["Smith, John"],
            "2019",
            "880",
            "45",
        )])]);

        let config = ResolverConfig::default();
        let solution = solve(&reference, &hypotheses, &backend, &config).await.unwrap();
        assert_eq!(solution.bibcode, "2019ApJ...880...45S");
        // The neutral page veto drags the mean below a perfect score.
        assert!(solution.score < 1.0);
    }

    #[tokio::test]
    async fn more_evidence_wins_a_tie() {
        let reference = digest(ReferenceFields {
            authors: Some("Smith, J.".into()),
            year: Some("2019".into()),
            volume: Some("880".into()),
            page: Some("45".into()),
            title: Some("A survey of things".into()),
            ..Default::default()
        });
        let hypotheses = vec![fielded_hypothesis(&reference)];
        let mut with_title = candidate("2019ApJ...880...45S", &["Smith, John"], "2019", "880", "45");
        with_title.title = vec!["A survey of things".into()];
        // Same fields except no title: one less contributing evidence.
        let without_title = candidate("2019zzzz..880...45S", &["Smith, John"], "2019", "880", "45");
        let backend = MockBackend::with_sequence(vec![MockResponse::Rows(vec![
            without_title,
            with_title,
        ])]);

        let config = ResolverConfig::default();
        let solution = solve(&reference, &hypotheses, &backend, &config).await.unwrap();
        assert_eq!(solution.bibcode, "2019ApJ...880...45S");
    }

    #[tokio::test]
    async fn unbreakable_tie_is_undecidable() {
        let reference = digest(ReferenceFields {
            authors: Some("Smith, J.".into()),
            year: Some("2019".into()),
            volume: Some("880".into()),
            page: Some("45".into()),
            ..Default::default()
        });
        let hypotheses = vec![fielded_hypothesis(&reference)];
        let twin_a = candidate("2019AJ....880...45S", &["Smith, John"], "2019", "880", "45");
        let twin_b = candidate("2019ApJ...880...45S", &["Smith, John"], "2019", "880", "45");
        let backend =
            MockBackend::with_sequence(vec![MockResponse::Rows(vec![twin_a, twin_b])]);

        let config = ResolverConfig::default();
        let result = solve(&reference, &hypotheses, &backend, &config).await;
        match result {
            Err(ResolverError::Undecidable { candidates }) => {
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected Undecidable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn title_prefix_breaks_a_duplicate_tie() {
        let reference = digest(ReferenceFields {
            authors: Some("Smith, J.".into()),
            year: Some("2019".into()),
            volume: Some("880".into()),
            page: Some("45".into()),
            ..Default::default()
        });
        let hypotheses = vec![fielded_hypothesis(&reference)];
        let mut canonical = candidate("2019ApJ...880...45S", &["Smith, John"], "2019", "880", "45");
        canonical.title = vec!["A survey of things".into()];
        let mut duplicate = candidate("2019AJ....880...45S", &["Smith, John"], "2019", "880", "45");
        duplicate.title = vec!["A survey of things (erratum)".into()];
        let backend =
            MockBackend::with_sequence(vec![MockResponse::Rows(vec![duplicate, canonical])]);

        let config = ResolverConfig::default();
        let solution = solve(&reference, &hypotheses, &backend, &config).await.unwrap();
        assert_eq!(solution.bibcode, "2019ApJ...880...45S");
    }

    #[tokio::test]
    async fn bibcode_key_scoring_accepts_exact_key() {
        let reference = digest(ReferenceFields {
            authors: Some("Accomazzi, A.".into()),
            year: Some("2019".into()),
            ..Default::default()
        });
        let hypothesis = Hypothesis {
            name: "bibcode-key",
            hints: QueryHints {
                bibcode_keys: vec!["2019AAS...23320704A".into()],
                ..Default::default()
            },
            scoring: Scoring::BibcodeKeys,
            details: Details::default(),
        };
        let backend = MockBackend::with_sequence(vec![MockResponse::Rows(vec![candidate(
            "2019AAS...23320704A",
            &["Accomazzi, Alberto"],
            "2019",
            "233",
            "207.04",
        )])]);

        let config = ResolverConfig::default();
        let solution = solve(&reference, &[hypothesis], &backend, &config).await.unwrap();
        assert_eq!(solution.bibcode, "2019AAS...23320704A");
        assert_eq!(solution.score, config.evidence_max);
    }

    #[tokio::test]
    async fn longer_doi_is_not_a_match() {
        let reference = digest(ReferenceFields {
            doi: Some("10.1000/xyz".into()),
            ..Default::default()
        });
        let hypothesis = Hypothesis {
            name: "doi",
            hints: QueryHints {
                doi: Some("10.1000/xyz".into()),
                ..Default::default()
            },
            scoring: Scoring::IdentifierDoi,
            details: Details::default(),
        };
        let mut wrong = candidate("2019ApJ...880...45S", &["Smith, John"], "2019", "880", "45");
        wrong.doi = vec!["10.1000/xyz123".into()];
        let backend = MockBackend::with_sequence(vec![MockResponse::Rows(vec![wrong])]);

        let config = ResolverConfig::default();
        let result = solve(&reference, &[hypothesis], &backend, &config).await;
        assert!(matches!(result, Err(ResolverError::NoSolution)));
    }

    #[tokio::test]
    async fn scheme_tagged_identifier_matches_bare_id() {
        let reference = digest(ReferenceFields {
            arxiv: Some("1901.01234".into()),
            ..Default::default()
        });
        let hypothesis = Hypothesis {
            name: "arxiv",
            hints: QueryHints {
                arxiv: Some("1901.01234".into()),
                ..Default::default()
            },
            scoring: Scoring::IdentifierArxiv,
            details: Details::default(),
        };
        let mut hit = candidate("2019arXiv190101234S", &["Smith, John"], "2019", "", "");
        hit.identifier = vec!["arXiv:1901.01234".into()];
        let backend = MockBackend::with_sequence(vec![MockResponse::Rows(vec![hit])]);

        let config = ResolverConfig::default();
        let solution = solve(&reference, &[hypothesis], &backend, &config).await.unwrap();
        assert_eq!(solution.bibcode, "2019arXiv190101234S");
    }
}
