//! The three-phase collection pipeline.
//!
//! Discovery, enrichment and feature derivation run strictly one after the
//! other. Each phase persists its output under the run id before the next
//! one starts, so an interrupted run resumes at the first unfinished phase.

mod discovery;
mod enrichment;
mod features;
mod lexicon;
mod strategy;

pub use discovery::{ArtistQuota, DiscoveryCollector, DiscoveryReport};
pub use enrichment::{ArtistCache, EnrichmentCollector, EnrichmentReport};
pub use features::{
    derive, derive_row, popularity_category, title_length_group, validate, ComplexityTier,
    FeatureDerivation, FeatureRow, ValidationRule, MAX_POPULARITY, MAX_WORD_COUNT,
};
pub use lexicon::Lexicon;
pub use strategy::{build_strategies, genre_terms, query_variants, QueryVariant};

use crate::catalog::SearchFilters;
use crate::checkpoint::{CheckpointStore, RunRecord, RunStatus};
use crate::config::AppConfig;
use crate::dataset;
use crate::error::PipelineError;
use crate::gateway::RateLimitedGateway;
use crate::models::Phase;
use crate::telemetry::{metrics, PipelineTelemetry, RunSummary};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Pipeline {
    config: AppConfig,
    gateway: Arc<RateLimitedGateway>,
    store: Arc<dyn CheckpointStore>,
    telemetry: Arc<PipelineTelemetry>,
    lexicon: Lexicon,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        gateway: Arc<RateLimitedGateway>,
        store: Arc<dyn CheckpointStore>,
        telemetry: Arc<PipelineTelemetry>,
        lexicon: Lexicon,
    ) -> Self {
        Self {
            config,
            gateway,
            store,
            telemetry,
            lexicon,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn CheckpointStore {
        self.store.as_ref()
    }

    /// Register a new run with the configured genres and target.
    pub fn start_run(&self) -> Result<RunRecord, PipelineError> {
        let run = RunRecord::new(
            uuid::Uuid::new_v4().to_string(),
            self.config.collection.target_per_genre,
            self.config.collection.genres.clone(),
        );
        self.store
            .create_run(&run)
            .map_err(PipelineError::Checkpoint)?;
        info!(
            "Started run {}: {} genres, {} tracks per genre",
            run.run_id,
            run.genres.len(),
            run.target_per_genre
        );
        Ok(run)
    }

    pub fn load_run(&self, run_id: &str) -> Result<RunRecord, PipelineError> {
        self.store
            .get_run(run_id)
            .map_err(PipelineError::Checkpoint)?
            .ok_or_else(|| PipelineError::Config(format!("Unknown run id: {}", run_id)))
    }

    /// Run every unfinished phase of a new run, or of `resume` when given.
    pub async fn run(&self, resume: Option<&str>) -> Result<RunSummary, PipelineError> {
        metrics::reset();
        let run = match resume {
            Some(run_id) => {
                let run = self.load_run(run_id)?;
                info!(
                    "Resuming run {} after phase {}",
                    run.run_id,
                    run.completed_phase.map(|p| p.as_str()).unwrap_or("none")
                );
                self.store
                    .set_status(&run.run_id, RunStatus::Running)
                    .map_err(PipelineError::Checkpoint)?;
                run
            }
            None => self.start_run()?,
        };

        let result = self.execute(&run).await;
        if let Err(e) = &result {
            if !e.is_insufficient_sample() {
                error!("Run {} failed: {}", run.run_id, e);
                if let Err(status_err) = self.store.set_status(&run.run_id, RunStatus::Failed) {
                    warn!("Failed to record run failure: {:#}", status_err);
                }
            }
        }
        result
    }

    async fn execute(&self, run: &RunRecord) -> Result<RunSummary, PipelineError> {
        if !run.has_completed(Phase::Discovery) {
            self.collect(run).await?;
        }
        if !run.has_completed(Phase::Enrichment) {
            self.enrich(run).await?;
        }
        self.derive(run)
    }

    /// Phase 1 for `run`. Genres persisted by an earlier attempt are skipped.
    pub async fn collect(&self, run: &RunRecord) -> Result<DiscoveryReport, PipelineError> {
        let mut settings = self.config.collection.clone();
        settings.genres = run.genres.clone();
        let strategies = build_strategies(&settings);
        let filters = SearchFilters {
            market: self.config.api.market.clone(),
        };

        let report = DiscoveryCollector::new(&self.gateway, &settings, &self.telemetry)
            .with_filters(filters)
            .with_checkpoint(self.store.as_ref(), &run.run_id)
            .collect(&strategies, run.target_per_genre)
            .await?;

        self.store
            .mark_phase_completed(&run.run_id, Phase::Discovery)
            .map_err(PipelineError::Checkpoint)?;
        Ok(report)
    }

    /// Phase 2 for `run`, over the persisted Phase 1 candidates.
    pub async fn enrich(&self, run: &RunRecord) -> Result<EnrichmentReport, PipelineError> {
        let candidates = self
            .store
            .load_candidates(&run.run_id)
            .map_err(PipelineError::Checkpoint)?;

        let report = EnrichmentCollector::new(&self.gateway, &self.config.enrichment, &self.telemetry)
            .with_checkpoint(self.store.as_ref(), &run.run_id)
            .enrich(&candidates)
            .await?;

        self.store
            .mark_phase_completed(&run.run_id, Phase::Enrichment)
            .map_err(PipelineError::Checkpoint)?;
        Ok(report)
    }

    /// Phase 3 for `run`: derive rows from the persisted enriched tracks,
    /// write the dataset and the run summary, and settle the run status.
    ///
    /// The outputs are written even when the sample is too small, in which
    /// case [`PipelineError::InsufficientSample`] is returned afterwards.
    pub fn derive(&self, run: &RunRecord) -> Result<RunSummary, PipelineError> {
        let run_id = run.run_id.as_str();
        let enriched = self
            .store
            .load_enriched(run_id)
            .map_err(PipelineError::Checkpoint)?;

        self.telemetry
            .begin(Phase::Features, Some(enriched.len() as u64));
        let derivation = derive(&enriched, &self.lexicon);
        self.telemetry
            .advance(Phase::Features, enriched.len() as u64);

        self.store
            .replace_validation_drops(run_id, &derivation.dropped)
            .map_err(PipelineError::Checkpoint)?;
        for drop in &derivation.dropped {
            metrics::record_dropped(drop.reason.as_str());
        }

        let dataset_path = dataset::write_dataset(
            &self.config.datasets_dir(),
            run_id,
            &derivation.rows,
            chrono::Utc::now(),
        )
        .map_err(PipelineError::Output)?;
        metrics::record_rows_emitted(derivation.rows.len());
        self.store
            .set_dataset_path(run_id, &dataset_path.to_string_lossy())
            .map_err(PipelineError::Checkpoint)?;

        self.telemetry.finish(
            Phase::Features,
            &format!(
                "{} rows, {} rejected",
                derivation.rows.len(),
                derivation.dropped.len()
            ),
        );
        self.store
            .mark_phase_completed(run_id, Phase::Features)
            .map_err(PipelineError::Checkpoint)?;
        info!(
            "Phase 3 complete: {} rows written to {:?}",
            derivation.rows.len(),
            dataset_path
        );

        let summary = self.summarize(run, &derivation, enriched.len(), &dataset_path)?;
        summary
            .write_json(&dataset::summary_path(&dataset_path))
            .map_err(PipelineError::Output)?;
        metrics::write_to_file(&self.config.runs_dir().join(format!("{}.prom", run_id)))
            .map_err(PipelineError::Output)?;
        summary.log();

        if !summary.viable {
            warn!(
                "Run {} emitted {} rows, below the minimum of {}",
                run_id, summary.rows_emitted, summary.min_viable_rows
            );
            self.store
                .set_status(run_id, RunStatus::Failed)
                .map_err(PipelineError::Checkpoint)?;
            return Err(PipelineError::InsufficientSample {
                rows: summary.rows_emitted,
                required: summary.min_viable_rows,
            });
        }
        self.store
            .set_status(run_id, RunStatus::Completed)
            .map_err(PipelineError::Checkpoint)?;
        Ok(summary)
    }

    fn summarize(
        &self,
        run: &RunRecord,
        derivation: &FeatureDerivation,
        enriched: usize,
        dataset_path: &std::path::Path,
    ) -> Result<RunSummary, PipelineError> {
        let run_id = run.run_id.as_str();
        let genres = self
            .store
            .completed_genres(run_id)
            .map_err(PipelineError::Checkpoint)?;
        let candidates = self
            .store
            .load_candidates(run_id)
            .map_err(PipelineError::Checkpoint)?
            .len();

        let mut dropped = BTreeMap::new();
        for record in self
            .store
            .load_dropped(run_id)
            .map_err(PipelineError::Checkpoint)?
        {
            *dropped.entry(record.reason.as_str().to_string()).or_insert(0) += 1;
        }

        let min_viable_rows = min_viable_rows(
            self.config.run.min_viable_fraction,
            run.target_per_genre,
            run.genres.len(),
        );
        let rows_emitted = derivation.rows.len();

        Ok(RunSummary {
            run_id: run_id.to_string(),
            genres,
            candidates,
            enriched,
            dropped,
            rejections: derivation.rejections.clone(),
            rows_emitted,
            gateway: self.gateway.stats(),
            phases: self.telemetry.phase_stats(),
            min_viable_rows,
            viable: rows_emitted >= min_viable_rows,
            dataset_path: Some(dataset_path.to_string_lossy().into_owned()),
        })
    }
}

/// Rows a run must emit to count as successful.
pub fn min_viable_rows(fraction: f64, target_per_genre: usize, genres: usize) -> usize {
    (fraction * (target_per_genre * genres) as f64).ceil() as usize
}
