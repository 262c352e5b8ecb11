use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use title_sampler::checkpoint::{CheckpointStore, SqliteCheckpointStore};
use title_sampler::config::{self, CollectionSize};
use title_sampler::gateway::RateLimitedGateway;
use title_sampler::pipeline::{Lexicon, Pipeline};
use title_sampler::telemetry::{
    metrics, IndicatifReporter, LogReporter, NoOpReporter, PipelineTelemetry, ProgressReporter,
    RunSummary,
};
use title_sampler::SpotifyCatalogClient;

const ACCESS_TOKEN_ENV: &str = "CATALOG_ACCESS_TOKEN";

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(path_buf))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProgressMode {
    /// Interactive progress bars.
    Bars,
    /// Periodic log lines.
    Log,
    Quiet,
}

#[derive(Parser, Debug)]
#[command(version, about = "Collects a stratified track sample and derives title features")]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, global = true, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding checkpoints.db, datasets/ and runs/.
    #[clap(long, global = true, value_parser = parse_path)]
    pub data_dir: Option<PathBuf>,

    /// Collection size preset.
    #[clap(long, global = true)]
    pub size: Option<CollectionSize>,

    /// Tracks per genre. Takes precedence over --size.
    #[clap(long, global = true)]
    pub target_per_genre: Option<usize>,

    /// Outbound request ceiling.
    #[clap(long = "rps", global = true)]
    pub requests_per_second: Option<f64>,

    /// Word list file for sentiment and vocabulary features.
    #[clap(long, global = true, value_parser = parse_path)]
    pub lexicon: Option<PathBuf>,

    #[clap(long, global = true)]
    pub api_base_url: Option<String>,

    /// Bearer token for the catalog API. Falls back to $CATALOG_ACCESS_TOKEN.
    #[clap(long, global = true)]
    pub access_token: Option<String>,

    #[clap(long, global = true, value_enum, default_value = "bars")]
    pub progress: ProgressMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs every phase of a new run, or the unfinished phases of an existing one.
    Run {
        /// Run id to resume.
        #[clap(long)]
        resume: Option<String>,
    },

    /// Runs only the discovery phase. Starts a new run when no id is given.
    Collect { run_id: Option<String> },

    /// Runs only the enrichment phase of a run.
    Enrich { run_id: String },

    /// Recomputes the dataset of a run from its enriched tracks.
    Derive { run_id: String },

    /// Lists known runs, newest first.
    Runs,

    /// Deletes a run and all of its checkpoints.
    DeleteRun { run_id: String },
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            data_dir: args.data_dir.clone(),
            size: args.size,
            target_per_genre: args.target_per_genre,
            requests_per_second: args.requests_per_second,
            lexicon_path: args.lexicon.clone(),
            api_base_url: args.api_base_url.clone(),
            access_token: args
                .access_token
                .clone()
                .or_else(|| std::env::var(ACCESS_TOKEN_ENV).ok()),
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Run {}", summary.run_id);
    println!(
        "  rows: {} (minimum viable {})",
        summary.rows_emitted, summary.min_viable_rows
    );
    if let Some(path) = &summary.dataset_path {
        println!("  dataset: {}", path);
    }
}

fn list_runs(store: &dyn CheckpointStore) -> Result<()> {
    let runs = store.list_runs()?;
    if runs.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }
    for run in runs {
        let genres: Vec<&str> = run.genres.iter().map(|g| g.as_str()).collect();
        println!(
            "{}  {:<9}  phase: {:<10}  target: {}  genres: {}",
            run.run_id,
            run.status.as_str(),
            run.completed_phase.map(|p| p.as_str()).unwrap_or("-"),
            run.target_per_genre,
            genres.join(",")
        );
        if let Some(path) = run.dataset_path {
            println!("    {}", path);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration:");
    info!("  data_dir: {:?}", app_config.data_dir);
    info!(
        "  genres: {}, target per genre: {}, years {}-{}",
        app_config.collection.genres.len(),
        app_config.collection.target_per_genre,
        app_config.collection.year_range.start,
        app_config.collection.year_range.end
    );
    info!(
        "  rate limit: {} req/s, batch size {}, concurrency {}",
        app_config.gateway.requests_per_second,
        app_config.enrichment.batch_size,
        app_config.enrichment.concurrency
    );

    let store: Arc<dyn CheckpointStore> =
        Arc::new(SqliteCheckpointStore::new(app_config.checkpoint_db_path())?);

    match &cli_args.command {
        Command::Runs => return list_runs(store.as_ref()),
        Command::DeleteRun { run_id } => {
            if store.delete_run(run_id)? {
                println!("Deleted run {}", run_id);
            } else {
                bail!("Unknown run id: {}", run_id);
            }
            return Ok(());
        }
        _ => {}
    }

    if !app_config.api.has_token() {
        bail!(
            "No access token: pass --access-token or set {}",
            ACCESS_TOKEN_ENV
        );
    }

    metrics::init_metrics();

    let client = Arc::new(SpotifyCatalogClient::new(&app_config.api)?);
    let gateway = Arc::new(RateLimitedGateway::from_settings(
        client,
        &app_config.gateway,
    ));
    let reporter: Arc<dyn ProgressReporter> = match cli_args.progress {
        ProgressMode::Bars => Arc::new(IndicatifReporter::new()),
        ProgressMode::Log => Arc::new(LogReporter::new(500)),
        ProgressMode::Quiet => Arc::new(NoOpReporter),
    };
    let telemetry = Arc::new(PipelineTelemetry::new(reporter));
    let lexicon = Lexicon::from_settings(&app_config.features)?;

    let pipeline = Pipeline::new(app_config, gateway, store, telemetry, lexicon);

    match cli_args.command {
        Command::Run { resume } => {
            let summary = pipeline.run(resume.as_deref()).await?;
            print_summary(&summary);
        }
        Command::Collect { run_id } => {
            let run = match run_id {
                Some(run_id) => pipeline.load_run(&run_id)?,
                None => pipeline.start_run()?,
            };
            let report = pipeline.collect(&run).await?;
            println!(
                "Run {}: {} candidates collected",
                run.run_id,
                report.candidates.len()
            );
        }
        Command::Enrich { run_id } => {
            let run = pipeline.load_run(&run_id)?;
            let report = pipeline.enrich(&run).await?;
            println!(
                "Run {}: {} enriched, {} dropped",
                run.run_id,
                report.enriched.len(),
                report.dropped.len()
            );
        }
        Command::Derive { run_id } => {
            let run = pipeline.load_run(&run_id)?;
            let summary = pipeline.derive(&run)?;
            print_summary(&summary);
        }
        Command::Runs | Command::DeleteRun { .. } => {}
    }

    Ok(())
}
