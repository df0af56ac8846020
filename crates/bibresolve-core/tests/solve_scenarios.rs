//! End-to-end resolution scenarios over a scripted mock backend.

use std::io::Cursor;
use std::sync::Arc;

use bibresolve_core::{
    CandidateRecord, FuzzyNameIndex, MockBackend, MockResponse, ReferenceFields, Resolver,
    ResolverConfig, ResolverError,
};

fn aas_target() -> CandidateRecord {
    CandidateRecord {
        bibcode: "2019AAS...23320704A".into(),
        author: vec![
            "Accomazzi, Alberto".into(),
            "Kurtz, Michael J.".into(),
            "Henneken, Edwin".into(),
            "Grant, Carolyn S.".into(),
            "Thompson, Donna M.".into(),
            "Chyla, Roman".into(),
            "McDonald, Steven".into(),
            "Shapurian, Golnaz".into(),
            "Hostetler, Timothy W.".into(),
            "Templeton, Matthew R.".into(),
            "Lockhart, Kelly E.".into(),
            "Bukovi, Kris".into(),
        ],
        year: Some("2019".into()),
        volume: Some("233".into()),
        page: vec!["207.04".into()],
        venue: Some("American Astronomical Society Meeting Abstracts #233".into()),
        title: vec!["The NASA Astrophysics Data System's Decadal Plan for the 2020s".into()],
        ..Default::default()
    }
}

fn decoy() -> CandidateRecord {
    CandidateRecord {
        bibcode: "2019ApJ...880...45B".into(),
        author: vec!["Burton, Gwen".into()],
        year: Some("2019".into()),
        volume: Some("880".into()),
        page: vec!["45".into()],
        venue: Some("The Astrophysical Journal".into()),
        title: vec!["An unrelated measurement".into()],
        ..Default::default()
    }
}

fn conference_index() -> FuzzyNameIndex {
    FuzzyNameIndex::from_reader(Cursor::new(
        "AAS\tC\tAAS Meeting\nAAS\tC\tAmerican Astronomical Society Meeting Abstracts\n",
    ))
    .expect("authority table")
}

fn resolver(index: FuzzyNameIndex, backend: Arc<MockBackend>) -> Resolver {
    Resolver::new(ResolverConfig::default(), Arc::new(index), backend)
}

#[tokio::test]
async fn scenario_full_fields_resolves_with_perfect_score() {
    let backend = Arc::new(MockBackend::with_sequence(vec![MockResponse::Rows(vec![
        aas_target(),
        decoy(),
    ])]));
    let resolver = resolver(FuzzyNameIndex::default(), backend.clone());

    let solution = resolver
        .resolve(&ReferenceFields {
            title: Some("The NASA Astrophysics Data System's Decadal Plan for the 2020s".into()),
            authors: Some("Accomazzi, A.".into()),
            volume: Some("233".into()),
            year: Some("2019".into()),
            page: Some("207.04".into()),
            ..Default::default()
        })
        .await
        .expect("resolves");

    assert_eq!(solution.bibcode, "2019AAS...23320704A");
    assert_eq!(solution.score, 1.0);
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn scenario_missing_page_resolves_at_point_eight() {
    let backend = Arc::new(MockBackend::with_sequence(vec![MockResponse::Rows(vec![
        aas_target(),
        decoy(),
    ])]));
    let resolver = resolver(conference_index(), backend);

    let solution = resolver
        .resolve(&ReferenceFields {
            authors: Some("Accomazzi, A.".into()),
            volume: Some("233".into()),
            year: Some("2019".into()),
            journal: Some("AAS233 Meeting".into()),
            ..Default::default()
        })
        .await
        .expect("resolves");

    assert_eq!(solution.bibcode, "2019AAS...23320704A");
    assert!((solution.score - 0.8).abs() < 1e-9);
    // One neutral page evidence in the ledger, nothing negative beyond it.
    assert_eq!(solution.evidences.len(), 5);
}

#[tokio::test]
async fn scenario_no_matching_candidates_fails_cleanly() {
    let backend = Arc::new(MockBackend::default());
    let resolver = resolver(FuzzyNameIndex::default(), backend);

    let result = resolver
        .resolve(&ReferenceFields {
            authors: Some("Nobody, X.".into()),
            volume: Some("999".into()),
            year: Some("1999".into()),
            ..Default::default()
        })
        .await;

    assert!(matches!(
        result,
        Err(ResolverError::NoSolution) | Err(ResolverError::Incomplete)
    ));
}

#[tokio::test]
async fn resolution_is_deterministic() {
    let fields = ReferenceFields {
        title: Some("The NASA Astrophysics Data System's Decadal Plan for the 2020s".into()),
        authors: Some("Accomazzi, A.".into()),
        volume: Some("233".into()),
        year: Some("2019".into()),
        page: Some("207.04".into()),
        ..Default::default()
    };

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let backend = Arc::new(MockBackend::with_sequence(vec![MockResponse::Rows(vec![
            aas_target(),
            decoy(),
        ])]));
        let resolver = resolver(FuzzyNameIndex::default(), backend);
        let solution = resolver.resolve(&fields).await.expect("resolves");
        outcomes.push((
            solution.bibcode,
            solution.score,
            solution.hypothesis,
            solution.evidences.sum(),
        ));
    }
    assert_eq!(outcomes[0], outcomes[1]);
}

#[tokio::test]
async fn overflow_falls_through_to_the_next_hypothesis() {
    let backend = Arc::new(MockBackend::with_sequence(vec![
        MockResponse::Overflow { num_found: 10_000 },
        MockResponse::Rows(vec![aas_target(), decoy()]),
    ]));
    let resolver = resolver(FuzzyNameIndex::default(), backend.clone());

    let solution = resolver
        .resolve(&ReferenceFields {
            title: Some("The NASA Astrophysics Data System's Decadal Plan for the 2020s".into()),
            authors: Some("Accomazzi, A.".into()),
            volume: Some("233".into()),
            year: Some("2019".into()),
            page: Some("207.04".into()),
            ..Default::default()
        })
        .await
        .expect("resolves");

    assert_eq!(solution.bibcode, "2019AAS...23320704A");
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn backend_failure_aborts_the_whole_resolution() {
    let backend = Arc::new(MockBackend::with_sequence(vec![MockResponse::Error(
        "connection refused".into(),
    )]));
    let resolver = resolver(FuzzyNameIndex::default(), backend.clone());

    let result = resolver
        .resolve(&ReferenceFields {
            authors: Some("Accomazzi, A.".into()),
            volume: Some("233".into()),
            year: Some("2019".into()),
            page: Some("207.04".into()),
            ..Default::default()
        })
        .await;

    assert!(matches!(result, Err(ResolverError::Backend(_))));
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn resolved_bibstem_drives_a_bibcode_key_query() {
    let backend = Arc::new(MockBackend::with_sequence(vec![MockResponse::Rows(vec![
        aas_target(),
    ])]));
    let resolver = resolver(conference_index(), backend.clone());

    resolver
        .resolve(&ReferenceFields {
            authors: Some("Accomazzi, A.".into()),
            volume: Some("233".into()),
            year: Some("2019".into()),
            page: Some("207.04".into()),
            journal: Some("AAS Meeting".into()),
            ..Default::default()
        })
        .await
        .expect("resolves");

    let queries = backend.queries();
    assert!(
        queries[0].starts_with("bibcode:(2019AAS...23320704A"),
        "first query should use the reconstructed key, got {:?}",
        queries[0]
    );
}
