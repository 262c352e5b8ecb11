use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub data_dir: Option<String>,

    // Feature configs
    pub collection: Option<CollectionConfig>,
    pub gateway: Option<GatewayConfig>,
    pub enrichment: Option<EnrichmentConfig>,
    pub features: Option<FeaturesConfig>,
    pub run: Option<RunConfig>,
    pub api: Option<ApiConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CollectionConfig {
    pub genres: Option<Vec<String>>,
    /// One of "test", "medium", "full", "mega".
    pub size: Option<String>,
    pub target_per_genre: Option<usize>,
    pub year_start: Option<i32>,
    pub year_end: Option<i32>,
    pub artist_quota: Option<usize>,
    pub min_popularity: Option<u32>,
    pub page_size: Option<u32>,
    pub max_search_offset: Option<u32>,
    pub balance_years: Option<bool>,
    pub query_template: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub requests_per_second: Option<f64>,
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub jitter_fraction: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub checkpoint_every: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FeaturesConfig {
    /// TOML file with `positive`, `negative` and `common` word lists.
    pub lexicon_path: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RunConfig {
    pub min_viable_fraction: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub market: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
