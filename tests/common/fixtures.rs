//! Fixture builders for catalogs, gateways and pipelines

use super::constants::*;
use super::fake_catalog::{hit, FakeCatalog};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use title_sampler::catalog::TrackDetail;
use title_sampler::checkpoint::{CheckpointStore, SqliteCheckpointStore};
use title_sampler::config::{
    AppConfig, ApiSettings, CollectionSettings, EnrichmentSettings, FeatureSettings,
    GatewaySettings, RunSettings, DEFAULT_QUERY_TEMPLATE,
};
use title_sampler::gateway::{NoOpThrottler, RateLimitedGateway, RecordingSleeper, RetryPolicy};
use title_sampler::models::{ArtistRecord, CandidateTrack, Genre, YearRange};
use title_sampler::pipeline::{Lexicon, Pipeline};
use title_sampler::telemetry::PipelineTelemetry;

/// The query issued for the bucket name itself in `year`.
pub fn bucket_query(genre: Genre, year: i32) -> String {
    DEFAULT_QUERY_TEMPLATE
        .replace("{term}", genre.as_str())
        .replace("{year}", &year.to_string())
}

/// Register `(track_id, artist_id)` pairs as hits of `query`, with matching
/// track details and artist records.
pub fn seed_query(catalog: &FakeCatalog, query: &str, tracks: &[(&str, &str)]) {
    catalog.add_search(
        query,
        tracks
            .iter()
            .map(|(track_id, artist_id)| hit(track_id, artist_id))
            .collect(),
    );
    for (track_id, artist_id) in tracks {
        catalog.add_track(TrackDetail {
            track_id: track_id.to_string(),
            title: format!("Love Song {}", track_id),
            duration_ms: TEST_DURATION_MS,
            explicit: false,
            release_year: Some(TEST_YEAR),
            popularity: TEST_POPULARITY,
            preview_available: true,
            artist_id: Some(artist_id.to_string()),
        });
        catalog.add_artist(ArtistRecord {
            artist_id: artist_id.to_string(),
            name: format!("Artist {}", artist_id),
            popularity: 60,
            follower_count: 10_000,
            genres: vec!["pop".to_string(), "dance".to_string()],
        });
    }
}

/// Seed the bucket-name query of `genre` for [`TEST_YEAR`].
pub fn seed_genre(catalog: &FakeCatalog, genre: Genre, tracks: &[(&str, &str)]) {
    seed_query(catalog, &bucket_query(genre, TEST_YEAR), tracks);
}

pub fn candidate(track_id: &str, genre: Genre, artist_id: &str) -> CandidateTrack {
    CandidateTrack {
        track_id: track_id.to_string(),
        genre,
        artist_id: artist_id.to_string(),
        discovered_at: 0,
    }
}

/// Gateway without throttling whose backoff delays are recorded, not slept.
pub fn test_gateway(catalog: Arc<FakeCatalog>) -> Arc<RateLimitedGateway> {
    let settings = GatewaySettings {
        max_retries: TEST_MAX_RETRIES,
        initial_backoff_ms: 10,
        max_backoff_ms: 100,
        ..Default::default()
    };
    Arc::new(
        RateLimitedGateway::new(
            catalog,
            Arc::new(NoOpThrottler),
            RetryPolicy::new(&settings).without_jitter(),
        )
        .with_sleeper(Arc::new(RecordingSleeper::new())),
    )
}

/// Single-year collection of `genres` with small enrichment batches.
pub fn test_config(data_dir: &Path, genres: Vec<Genre>, target_per_genre: usize) -> AppConfig {
    AppConfig {
        data_dir: data_dir.to_path_buf(),
        collection: CollectionSettings {
            genres,
            target_per_genre,
            year_range: YearRange::new(TEST_YEAR, TEST_YEAR),
            ..Default::default()
        },
        gateway: GatewaySettings::default(),
        enrichment: EnrichmentSettings {
            batch_size: 3,
            concurrency: 2,
            checkpoint_every: 1,
        },
        features: FeatureSettings::default(),
        run: RunSettings::default(),
        api: ApiSettings::default(),
    }
}

/// A pipeline over a fake catalog with its own data directory.
pub struct TestPipeline {
    // Keep the directory alive as long as the pipeline
    pub dir: TempDir,
    pub pipeline: Pipeline,
    pub catalog: Arc<FakeCatalog>,
    pub store: Arc<SqliteCheckpointStore>,
}

pub fn test_pipeline(
    catalog: Arc<FakeCatalog>,
    genres: Vec<Genre>,
    target_per_genre: usize,
) -> TestPipeline {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), genres, target_per_genre);
    let store = Arc::new(SqliteCheckpointStore::new(config.checkpoint_db_path()).unwrap());
    let pipeline = Pipeline::new(
        config,
        test_gateway(catalog.clone()),
        store.clone() as Arc<dyn CheckpointStore>,
        Arc::new(PipelineTelemetry::silent()),
        Lexicon::bundled().unwrap(),
    );
    TestPipeline {
        dir,
        pipeline,
        catalog,
        store,
    }
}
