//! End-to-end tests for batched enrichment
//!
//! Artist caching, per-record drops, genre tagging and resume.

mod common;

use common::{candidate, seed_genre, test_gateway, FakeCatalog};
use std::collections::HashSet;
use title_sampler::checkpoint::{CheckpointStore, RunRecord, SqliteCheckpointStore};
use title_sampler::config::EnrichmentSettings;
use title_sampler::models::{CandidateTrack, DropReason, Genre};
use title_sampler::pipeline::EnrichmentCollector;
use title_sampler::telemetry::PipelineTelemetry;
use title_sampler::PipelineError;

fn small_batches() -> EnrichmentSettings {
    EnrichmentSettings {
        batch_size: 2,
        concurrency: 2,
        checkpoint_every: 1,
    }
}

/// Five pop and five rock candidates, each with its own artist.
fn ten_candidates(catalog: &FakeCatalog) -> Vec<CandidateTrack> {
    let pop = [("p0", "pa0"), ("p1", "pa1"), ("p2", "pa2"), ("p3", "pa3"), ("p4", "pa4")];
    let rock = [("r0", "ra0"), ("r1", "ra1"), ("r2", "ra2"), ("r3", "ra3"), ("r4", "ra4")];
    seed_genre(catalog, Genre::Pop, &pop);
    seed_genre(catalog, Genre::Rock, &rock);
    pop.iter()
        .map(|(t, a)| candidate(t, Genre::Pop, a))
        .chain(rock.iter().map(|(t, a)| candidate(t, Genre::Rock, a)))
        .collect()
}

#[tokio::test]
async fn test_shared_artist_is_fetched_once() {
    let catalog = FakeCatalog::new();
    let tracks = [("t0", "a"), ("t1", "a"), ("t2", "a"), ("t3", "a"), ("t4", "a")];
    seed_genre(&catalog, Genre::Jazz, &tracks);
    let candidates: Vec<CandidateTrack> = tracks
        .iter()
        .map(|(t, a)| candidate(t, Genre::Jazz, a))
        .collect();
    let gateway = test_gateway(catalog.clone());
    let telemetry = PipelineTelemetry::silent();
    let settings = small_batches();

    let report = EnrichmentCollector::new(&gateway, &settings, &telemetry)
        .enrich(&candidates)
        .await
        .unwrap();

    assert_eq!(report.enriched.len(), 5);
    assert_eq!(catalog.artist_calls(), 1);
    assert!(report.enriched.iter().all(|t| t.artist_name == "Artist a"));
}

#[tokio::test]
async fn test_one_failed_detail_fetch_drops_one_track() {
    let catalog = FakeCatalog::new();
    let candidates = ten_candidates(&catalog);
    catalog.fail_track("r2");
    let gateway = test_gateway(catalog.clone());
    let telemetry = PipelineTelemetry::silent();
    let settings = small_batches();

    let report = EnrichmentCollector::new(&gateway, &settings, &telemetry)
        .enrich(&candidates)
        .await
        .unwrap();

    assert_eq!(report.enriched.len(), 9);
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].track_id, "r2");
    assert_eq!(report.dropped[0].reason, DropReason::DetailFetchFailed);

    // Genre labels come from discovery
    assert_eq!(
        report
            .enriched
            .iter()
            .filter(|t| t.genre == Genre::Pop)
            .count(),
        5
    );
    assert_eq!(
        report
            .enriched
            .iter()
            .filter(|t| t.genre == Genre::Rock)
            .count(),
        4
    );

    // Output keeps candidate order
    let ids: Vec<&str> = report.enriched.iter().map(|t| t.track_id.as_str()).collect();
    assert_eq!(ids, vec!["p0", "p1", "p2", "p3", "p4", "r0", "r1", "r3", "r4"]);
}

#[tokio::test]
async fn test_unknown_track_is_dropped() {
    let catalog = FakeCatalog::new();
    seed_genre(&catalog, Genre::Pop, &[("known", "a1")]);
    let candidates = vec![
        candidate("known", Genre::Pop, "a1"),
        candidate("ghost", Genre::Pop, "a1"),
    ];
    let gateway = test_gateway(catalog.clone());
    let telemetry = PipelineTelemetry::silent();
    let settings = small_batches();

    let report = EnrichmentCollector::new(&gateway, &settings, &telemetry)
        .enrich(&candidates)
        .await
        .unwrap();

    assert_eq!(report.enriched.len(), 1);
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].track_id, "ghost");
    assert_eq!(report.dropped[0].reason, DropReason::NotFound);
}

#[tokio::test]
async fn test_batches_respect_batch_size() {
    let catalog = FakeCatalog::new();
    let candidates = ten_candidates(&catalog);
    let gateway = test_gateway(catalog.clone());
    let telemetry = PipelineTelemetry::silent();
    let settings = EnrichmentSettings {
        batch_size: 4,
        concurrency: 1,
        checkpoint_every: 1,
    };

    EnrichmentCollector::new(&gateway, &settings, &telemetry)
        .enrich(&candidates)
        .await
        .unwrap();

    assert_eq!(catalog.track_calls(), 3);
    assert_eq!(catalog.requested_tracks().len(), 10);
}

#[tokio::test]
async fn test_fatal_error_aborts_and_resume_continues() {
    let catalog = FakeCatalog::new();
    let candidates = ten_candidates(&catalog);
    catalog.fatal_track("r0");
    let gateway = test_gateway(catalog.clone());
    let telemetry = PipelineTelemetry::silent();
    let store = SqliteCheckpointStore::in_memory().unwrap();
    store
        .create_run(&RunRecord::new("run-1", 5, vec![Genre::Pop, Genre::Rock]))
        .unwrap();
    let settings = EnrichmentSettings {
        batch_size: 2,
        concurrency: 1,
        checkpoint_every: 1,
    };

    let result = EnrichmentCollector::new(&gateway, &settings, &telemetry)
        .with_checkpoint(&store, "run-1")
        .enrich(&candidates)
        .await;
    assert!(matches!(result, Err(PipelineError::Fatal(_))));

    // Batches before the failure are persisted
    let persisted: HashSet<String> = store
        .load_enriched("run-1")
        .unwrap()
        .into_iter()
        .map(|t| t.track_id)
        .collect();
    let expected: HashSet<String> = ["p0", "p1", "p2", "p3"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(persisted, expected);

    catalog.clear_fatal_tracks();
    let requested_before = catalog.requested_tracks().len();
    let artists_before = catalog.artist_calls();

    let report = EnrichmentCollector::new(&gateway, &settings, &telemetry)
        .with_checkpoint(&store, "run-1")
        .enrich(&candidates)
        .await
        .unwrap();

    assert_eq!(report.enriched.len(), 10);
    let requested: HashSet<String> = catalog.requested_tracks()[requested_before..]
        .iter()
        .cloned()
        .collect();
    assert!(requested.is_disjoint(&expected));
    // Artists of persisted tracks come from the checkpoint
    assert_eq!(catalog.artist_calls() - artists_before, 6);
    assert_eq!(store.load_enriched("run-1").unwrap().len(), 10);
}

#[tokio::test]
async fn test_resume_retries_failed_fetches_but_not_unknown_tracks() {
    let catalog = FakeCatalog::new();
    let tracks = [("p0", "a0"), ("p1", "a1"), ("p2", "a2"), ("p3", "a3"), ("p4", "a4")];
    seed_genre(&catalog, Genre::Pop, &tracks);
    let mut candidates: Vec<CandidateTrack> = tracks
        .iter()
        .map(|(t, a)| candidate(t, Genre::Pop, a))
        .collect();
    candidates.push(candidate("ghost", Genre::Pop, "a0"));
    catalog.fail_track("p2");
    let gateway = test_gateway(catalog.clone());
    let telemetry = PipelineTelemetry::silent();
    let store = SqliteCheckpointStore::in_memory().unwrap();
    store
        .create_run(&RunRecord::new("run-1", 5, vec![Genre::Pop]))
        .unwrap();
    let settings = EnrichmentSettings {
        batch_size: 2,
        concurrency: 1,
        checkpoint_every: 1,
    };

    let first = EnrichmentCollector::new(&gateway, &settings, &telemetry)
        .with_checkpoint(&store, "run-1")
        .enrich(&candidates)
        .await
        .unwrap();
    assert_eq!(first.enriched.len(), 4);
    let mut reasons: Vec<(String, DropReason)> = store
        .load_dropped("run-1")
        .unwrap()
        .into_iter()
        .map(|d| (d.track_id, d.reason))
        .collect();
    reasons.sort();
    assert_eq!(
        reasons,
        vec![
            ("ghost".to_string(), DropReason::NotFound),
            ("p2".to_string(), DropReason::DetailFetchFailed),
        ]
    );

    catalog.clear_failing_tracks();
    let requested_before = catalog.requested_tracks().len();

    let second = EnrichmentCollector::new(&gateway, &settings, &telemetry)
        .with_checkpoint(&store, "run-1")
        .enrich(&candidates)
        .await
        .unwrap();

    assert_eq!(catalog.requested_tracks()[requested_before..], ["p2".to_string()]);
    let ids: Vec<&str> = second.enriched.iter().map(|t| t.track_id.as_str()).collect();
    assert_eq!(ids, vec!["p0", "p1", "p2", "p3", "p4"]);
    assert_eq!(second.dropped.len(), 1);
    assert_eq!(second.dropped[0].track_id, "ghost");

    // The cleared failure no longer counts as a drop
    let persisted = store.load_dropped("run-1").unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].reason, DropReason::NotFound);
    assert_eq!(store.load_enriched("run-1").unwrap().len(), 5);
}
