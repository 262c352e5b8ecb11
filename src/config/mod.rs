mod file_config;

pub use file_config::{
    ApiConfig, CollectionConfig, EnrichmentConfig, FeaturesConfig, FileConfig, GatewayConfig,
    RunConfig,
};

use crate::catalog::{MAX_PAGE_SIZE, MAX_TRACK_BATCH};
use crate::models::{Genre, YearRange};
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

pub const DEFAULT_QUERY_TEMPLATE: &str = "genre:\"{term}\" year:{year}";
pub const DEFAULT_TARGET_PER_GENRE: usize = 2000;

/// Collection size presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CollectionSize {
    Test,
    Medium,
    Full,
    Mega,
}

impl CollectionSize {
    pub fn target_per_genre(&self) -> usize {
        match self {
            CollectionSize::Test => 100,
            CollectionSize::Medium => 250,
            CollectionSize::Full => 4000,
            CollectionSize::Mega => 6000,
        }
    }
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub data_dir: Option<PathBuf>,
    pub size: Option<CollectionSize>,
    pub target_per_genre: Option<usize>,
    pub requests_per_second: Option<f64>,
    pub lexicon_path: Option<PathBuf>,
    pub api_base_url: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub collection: CollectionSettings,
    pub gateway: GatewaySettings,
    pub enrichment: EnrichmentSettings,
    pub features: FeatureSettings,
    pub run: RunSettings,
    pub api: ApiSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSettings {
    pub genres: Vec<Genre>,
    pub target_per_genre: usize,
    pub year_range: YearRange,
    pub artist_quota: usize,
    pub min_popularity: u32,
    pub page_size: u32,
    pub max_search_offset: u32,
    pub balance_years: bool,
    pub query_template: String,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            genres: Genre::ALL.to_vec(),
            target_per_genre: DEFAULT_TARGET_PER_GENRE,
            year_range: YearRange::new(2020, 2024),
            artist_quota: 3,
            min_popularity: 15,
            page_size: MAX_PAGE_SIZE,
            max_search_offset: 1000,
            balance_years: true,
            query_template: DEFAULT_QUERY_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub requests_per_second: f64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_fraction: f64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentSettings {
    /// Ids per track-detail request, never above the remote maximum.
    pub batch_size: usize,
    /// Batches in flight at once.
    pub concurrency: usize,
    /// Persist progress every N batches.
    pub checkpoint_every: usize,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            batch_size: MAX_TRACK_BATCH,
            concurrency: 4,
            checkpoint_every: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSettings {
    /// `None` uses the bundled lexicon.
    pub lexicon_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Share of `target_per_genre * genres` that must survive for a run to succeed.
    pub min_viable_fraction: f64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            min_viable_fraction: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub base_url: String,
    pub access_token: String,
    pub market: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: crate::catalog::SPOTIFY_API_BASE.to_string(),
            access_token: String::new(),
            market: None,
            timeout_secs: 30,
        }
    }
}

impl ApiSettings {
    pub fn has_token(&self) -> bool {
        !self.access_token.trim().is_empty()
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .or_else(|| cli.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from("data"));

        if data_dir.exists() && !data_dir.is_dir() {
            bail!("data_dir is not a directory: {:?}", data_dir);
        }

        let collection = resolve_collection(cli, file.collection.unwrap_or_default())?;

        let gw_file = file.gateway.unwrap_or_default();
        let gw_defaults = GatewaySettings::default();
        let gateway = GatewaySettings {
            requests_per_second: gw_file
                .requests_per_second
                .or(cli.requests_per_second)
                .unwrap_or(gw_defaults.requests_per_second),
            max_retries: gw_file.max_retries.unwrap_or(gw_defaults.max_retries),
            initial_backoff_ms: gw_file
                .initial_backoff_ms
                .unwrap_or(gw_defaults.initial_backoff_ms),
            max_backoff_ms: gw_file.max_backoff_ms.unwrap_or(gw_defaults.max_backoff_ms),
            backoff_multiplier: gw_file
                .backoff_multiplier
                .unwrap_or(gw_defaults.backoff_multiplier),
            jitter_fraction: gw_file.jitter_fraction.unwrap_or(gw_defaults.jitter_fraction),
        };
        if gateway.requests_per_second <= 0.0 {
            bail!("requests_per_second must be positive");
        }
        if gateway.backoff_multiplier < 1.0 {
            bail!("backoff_multiplier must be at least 1.0");
        }
        if gateway.max_backoff_ms < gateway.initial_backoff_ms {
            bail!("max_backoff_ms must not be below initial_backoff_ms");
        }
        if !(0.0..=1.0).contains(&gateway.jitter_fraction) {
            bail!("jitter_fraction must be within [0, 1]");
        }

        let en_file = file.enrichment.unwrap_or_default();
        let en_defaults = EnrichmentSettings::default();
        let enrichment = EnrichmentSettings {
            batch_size: en_file
                .batch_size
                .unwrap_or(en_defaults.batch_size)
                .min(MAX_TRACK_BATCH),
            concurrency: en_file.concurrency.unwrap_or(en_defaults.concurrency),
            checkpoint_every: en_file
                .checkpoint_every
                .unwrap_or(en_defaults.checkpoint_every),
        };
        if enrichment.batch_size == 0 {
            bail!("enrichment batch_size must be at least 1");
        }
        if enrichment.concurrency == 0 {
            bail!("enrichment concurrency must be at least 1");
        }
        if enrichment.checkpoint_every == 0 {
            bail!("enrichment checkpoint_every must be at least 1");
        }

        let features = FeatureSettings {
            lexicon_path: file
                .features
                .unwrap_or_default()
                .lexicon_path
                .map(PathBuf::from)
                .or_else(|| cli.lexicon_path.clone()),
        };

        let run = RunSettings {
            min_viable_fraction: file
                .run
                .unwrap_or_default()
                .min_viable_fraction
                .unwrap_or(RunSettings::default().min_viable_fraction),
        };
        if !(run.min_viable_fraction > 0.0 && run.min_viable_fraction <= 1.0) {
            bail!("min_viable_fraction must be within (0, 1]");
        }

        let api_file = file.api.unwrap_or_default();
        let api_defaults = ApiSettings::default();
        let api = ApiSettings {
            base_url: api_file
                .base_url
                .or_else(|| cli.api_base_url.clone())
                .unwrap_or(api_defaults.base_url),
            access_token: cli.access_token.clone().unwrap_or_default(),
            market: api_file.market,
            timeout_secs: api_file.timeout_secs.unwrap_or(api_defaults.timeout_secs),
        };

        Ok(Self {
            data_dir,
            collection,
            gateway,
            enrichment,
            features,
            run,
            api,
        })
    }

    pub fn checkpoint_db_path(&self) -> PathBuf {
        self.data_dir.join("checkpoints.db")
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.data_dir.join("datasets")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }
}

fn resolve_collection(cli: &CliConfig, file: CollectionConfig) -> Result<CollectionSettings> {
    let defaults = CollectionSettings::default();

    let genres = match file.genres {
        Some(names) => {
            let mut genres = Vec::with_capacity(names.len());
            for name in &names {
                let Some(genre) = Genre::from_str(name) else {
                    bail!("Unknown genre in config: {}", name);
                };
                if !genres.contains(&genre) {
                    genres.push(genre);
                }
            }
            genres
        }
        None => defaults.genres,
    };
    if genres.is_empty() {
        bail!("At least one genre must be configured");
    }

    let file_size = match file.size.as_deref() {
        Some(s) => Some(parse_collection_size(s).ok_or_else(|| {
            anyhow::anyhow!("Unknown collection size '{}', expected test/medium/full/mega", s)
        })?),
        None => None,
    };

    // Explicit targets beat size presets, TOML beats CLI within each.
    let target_per_genre = file
        .target_per_genre
        .or_else(|| file_size.map(|s| s.target_per_genre()))
        .or(cli.target_per_genre)
        .or_else(|| cli.size.map(|s| s.target_per_genre()))
        .unwrap_or(defaults.target_per_genre);
    if target_per_genre == 0 {
        bail!("target_per_genre must be at least 1");
    }

    let year_range = YearRange::new(
        file.year_start.unwrap_or(defaults.year_range.start),
        file.year_end.unwrap_or(defaults.year_range.end),
    );
    if year_range.is_empty() {
        bail!(
            "Empty year range: {}..={}",
            year_range.start,
            year_range.end
        );
    }

    let artist_quota = file.artist_quota.unwrap_or(defaults.artist_quota);
    if artist_quota == 0 {
        bail!("artist_quota must be at least 1");
    }

    let page_size = file.page_size.unwrap_or(defaults.page_size).min(MAX_PAGE_SIZE);
    if page_size == 0 {
        bail!("page_size must be at least 1");
    }

    let query_template = file.query_template.unwrap_or(defaults.query_template);
    if !query_template.contains("{term}") {
        bail!("query_template must contain a {{term}} placeholder");
    }

    Ok(CollectionSettings {
        genres,
        target_per_genre,
        year_range,
        artist_quota,
        min_popularity: file.min_popularity.unwrap_or(defaults.min_popularity),
        page_size,
        max_search_offset: file
            .max_search_offset
            .unwrap_or(defaults.max_search_offset),
        balance_years: file.balance_years.unwrap_or(defaults.balance_years),
        query_template,
    })
}

/// Parses a collection size string. Uses clap's ValueEnum trait for parsing.
fn parse_collection_size(s: &str) -> Option<CollectionSize> {
    CollectionSize::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_collection_size() {
        assert_eq!(parse_collection_size("test"), Some(CollectionSize::Test));
        assert_eq!(parse_collection_size("MEGA"), Some(CollectionSize::Mega));
        assert!(parse_collection_size("huge").is_none());
    }

    #[test]
    fn test_size_presets() {
        assert_eq!(CollectionSize::Test.target_per_genre(), 100);
        assert_eq!(CollectionSize::Medium.target_per_genre(), 250);
        assert_eq!(CollectionSize::Full.target_per_genre(), 4000);
        assert_eq!(CollectionSize::Mega.target_per_genre(), 6000);
    }

    #[test]
    fn test_resolve_defaults() {
        let config = AppConfig::resolve(&CliConfig::default(), None).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.collection.genres.len(), 8);
        assert_eq!(config.collection.target_per_genre, DEFAULT_TARGET_PER_GENRE);
        assert_eq!(config.collection.artist_quota, 3);
        assert_eq!(config.collection.year_range, YearRange::new(2020, 2024));
        assert_eq!(config.enrichment.batch_size, 50);
        assert_eq!(config.gateway, GatewaySettings::default());
        assert_eq!(config.run.min_viable_fraction, 0.8);
        assert!(!config.api.has_token());
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            data_dir: Some(temp_dir.path().to_path_buf()),
            size: Some(CollectionSize::Medium),
            requests_per_second: Some(4.0),
            access_token: Some("abc".to_string()),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.data_dir, temp_dir.path());
        assert_eq!(config.collection.target_per_genre, 250);
        assert_eq!(config.gateway.requests_per_second, 4.0);
        assert!(config.api.has_token());
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            data_dir: Some(PathBuf::from("/should/be/overridden")),
            target_per_genre: Some(10),
            requests_per_second: Some(4.0),
            ..Default::default()
        };

        let file_config: FileConfig = toml::from_str(&format!(
            r#"
            data_dir = "{}"

            [collection]
            genres = ["rock", "jazz"]
            target_per_genre = 500
            year_start = 2018
            year_end = 2019

            [enrichment]
            batch_size = 200
            "#,
            temp_dir.path().display()
        ))
        .unwrap();

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        // TOML values should override CLI
        assert_eq!(config.data_dir, temp_dir.path());
        assert_eq!(config.collection.genres, vec![Genre::Rock, Genre::Jazz]);
        assert_eq!(config.collection.target_per_genre, 500);
        assert_eq!(config.collection.year_range, YearRange::new(2018, 2019));
        // Clamped to the remote maximum
        assert_eq!(config.enrichment.batch_size, 50);
        // CLI value used when TOML doesn't specify
        assert_eq!(config.gateway.requests_per_second, 4.0);
    }

    #[test]
    fn test_explicit_target_beats_size_preset() {
        let cli = CliConfig {
            size: Some(CollectionSize::Mega),
            target_per_genre: Some(42),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert_eq!(config.collection.target_per_genre, 42);
    }

    #[test]
    fn test_resolve_unknown_genre_error() {
        let file_config: FileConfig = toml::from_str(
            r#"
            [collection]
            genres = ["pop", "polka"]
            "#,
        )
        .unwrap();
        let result = AppConfig::resolve(&CliConfig::default(), Some(file_config));
        assert!(result.unwrap_err().to_string().contains("polka"));
    }

    #[test]
    fn test_resolve_rejects_invalid_values() {
        let cases = [
            "[gateway]\nrequests_per_second = 0.0",
            "[gateway]\nbackoff_multiplier = 0.5",
            "[gateway]\ninitial_backoff_ms = 1000\nmax_backoff_ms = 10",
            "[collection]\nyear_start = 2024\nyear_end = 2020",
            "[collection]\nartist_quota = 0",
            "[collection]\nquery_template = \"year:{year}\"",
            "[enrichment]\nbatch_size = 0",
            "[enrichment]\ncheckpoint_every = 0",
            "[run]\nmin_viable_fraction = 1.5",
        ];
        for case in cases {
            let file_config: FileConfig = toml::from_str(case).unwrap();
            assert!(
                AppConfig::resolve(&CliConfig::default(), Some(file_config)).is_err(),
                "expected rejection for {:?}",
                case
            );
        }
    }

    #[test]
    fn test_resolve_data_dir_not_directory_error() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            data_dir: Some(temp_file.path().to_path_buf()),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("not a directory"));
    }

    #[test]
    fn test_path_helpers() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            data_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(
            config.checkpoint_db_path(),
            temp_dir.path().join("checkpoints.db")
        );
        assert_eq!(config.datasets_dir(), temp_dir.path().join("datasets"));
        assert_eq!(config.runs_dir(), temp_dir.path().join("runs"));
    }

    #[test]
    fn test_load_file_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[gateway]\nmax_retries = 2\n").unwrap();

        let file_config = FileConfig::load(&path).unwrap();
        assert_eq!(file_config.gateway.unwrap().max_retries, Some(2));
    }
}
