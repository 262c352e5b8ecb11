//! Throughput, elapsed time and per-phase counts.
//!
//! The phases push events into [`PipelineTelemetry`]; how they are shown is up
//! to the [`ProgressReporter`] behind it. Nothing here feeds back into the
//! pipeline.

pub mod metrics;
mod progress;

pub use progress::{IndicatifReporter, LogReporter, NoOpReporter, ProgressReporter};

use crate::models::{Genre, Phase};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Gateway counters, snapshotted at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub requests_issued: u64,
    pub retries: u64,
    pub rate_limit_hits: u64,
    pub throttle_wait_ms: u64,
    pub backoff_wait_ms: u64,
}

impl GatewayStats {
    pub fn cumulative_wait(&self) -> Duration {
        Duration::from_millis(self.throttle_wait_ms + self.backoff_wait_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub processed: u64,
    pub elapsed_secs: f64,
}

impl PhaseStats {
    /// Items per second; zero for phases that took no measurable time.
    pub fn throughput(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.processed as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

struct PhaseState {
    started: Instant,
    elapsed: Option<Duration>,
    processed: u64,
}

pub struct PipelineTelemetry {
    reporter: Arc<dyn ProgressReporter>,
    phases: Mutex<HashMap<Phase, PhaseState>>,
}

impl PipelineTelemetry {
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            phases: Mutex::new(HashMap::new()),
        }
    }

    pub fn silent() -> Self {
        Self::new(Arc::new(NoOpReporter))
    }

    pub fn begin(&self, phase: Phase, total: Option<u64>) {
        if let Ok(mut phases) = self.phases.lock() {
            phases.insert(
                phase,
                PhaseState {
                    started: Instant::now(),
                    elapsed: None,
                    processed: 0,
                },
            );
        }
        self.reporter.phase_started(phase, total);
    }

    pub fn advance(&self, phase: Phase, delta: u64) {
        if let Ok(mut phases) = self.phases.lock() {
            if let Some(state) = phases.get_mut(&phase) {
                state.processed += delta;
            }
        }
        self.reporter.advance(phase, delta);
    }

    pub fn note(&self, phase: Phase, message: &str) {
        self.reporter.message(phase, message);
    }

    pub fn finish(&self, phase: Phase, summary: &str) -> PhaseStats {
        let stats = match self.phases.lock() {
            Ok(mut phases) => match phases.get_mut(&phase) {
                Some(state) => {
                    let elapsed = state.started.elapsed();
                    state.elapsed = Some(elapsed);
                    PhaseStats {
                        processed: state.processed,
                        elapsed_secs: elapsed.as_secs_f64(),
                    }
                }
                None => PhaseStats::default(),
            },
            Err(_) => PhaseStats::default(),
        };
        metrics::record_phase_duration(phase.as_str(), Duration::from_secs_f64(stats.elapsed_secs));
        self.reporter.phase_finished(phase, summary);
        stats
    }

    /// Stats of every phase that has started, keyed by phase name.
    pub fn phase_stats(&self) -> BTreeMap<String, PhaseStats> {
        let Ok(phases) = self.phases.lock() else {
            return BTreeMap::new();
        };
        phases
            .iter()
            .map(|(phase, state)| {
                let elapsed = state.elapsed.unwrap_or_else(|| state.started.elapsed());
                (
                    phase.as_str().to_string(),
                    PhaseStats {
                        processed: state.processed,
                        elapsed_secs: round_secs(elapsed),
                    },
                )
            })
            .collect()
    }
}

fn round_secs(d: Duration) -> f64 {
    (d.as_secs_f64() * 1000.0).round() / 1000.0
}

/// Why collection for a genre stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenreStop {
    TargetReached,
    /// Every query variant was paged to the end.
    QueriesExhausted,
    /// The service kept rate limiting; collection for the genre was abandoned.
    QuotaExceeded,
}

impl GenreStop {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenreStop::TargetReached => "target_reached",
            GenreStop::QueriesExhausted => "queries_exhausted",
            GenreStop::QuotaExceeded => "quota_exceeded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "target_reached" => Some(GenreStop::TargetReached),
            "queries_exhausted" => Some(GenreStop::QueriesExhausted),
            "quota_exceeded" => Some(GenreStop::QuotaExceeded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenreOutcome {
    pub genre: Genre,
    pub target: usize,
    pub accepted: usize,
    pub stop: GenreStop,
}

impl GenreOutcome {
    pub fn shortfall(&self) -> usize {
        self.target.saturating_sub(self.accepted)
    }
}

/// End-of-run report, logged and written as JSON next to the dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub genres: Vec<GenreOutcome>,
    pub candidates: usize,
    pub enriched: usize,
    /// Drops by reason, across phases 2 and 3.
    pub dropped: BTreeMap<String, usize>,
    /// Phase 3 rejections by validation rule.
    pub rejections: BTreeMap<String, usize>,
    pub rows_emitted: usize,
    pub gateway: GatewayStats,
    pub phases: BTreeMap<String, PhaseStats>,
    pub min_viable_rows: usize,
    pub viable: bool,
    pub dataset_path: Option<String>,
}

impl RunSummary {
    pub fn log(&self) {
        info!("Run {} summary", self.run_id);
        for outcome in &self.genres {
            if outcome.shortfall() > 0 {
                warn!(
                    "  {}: {}/{} candidates, short by {} ({})",
                    outcome.genre,
                    outcome.accepted,
                    outcome.target,
                    outcome.shortfall(),
                    outcome.stop.as_str()
                );
            } else {
                info!("  {}: {}/{} candidates", outcome.genre, outcome.accepted, outcome.target);
            }
        }
        info!(
            "  candidates: {}, enriched: {}, rows: {} (minimum viable {})",
            self.candidates, self.enriched, self.rows_emitted, self.min_viable_rows
        );
        for (reason, count) in &self.dropped {
            info!("  dropped {}: {}", reason, count);
        }
        for (rule, count) in &self.rejections {
            info!("  rejected by {}: {}", rule, count);
        }
        info!(
            "  gateway: {} requests, {} retries, {} rate limits, waited {:?}",
            self.gateway.requests_issued,
            self.gateway.retries,
            self.gateway.rate_limit_hits,
            self.gateway.cumulative_wait()
        );
        for (phase, stats) in &self.phases {
            info!(
                "  {}: {} items in {:.1}s ({:.1}/s)",
                phase,
                stats.processed,
                stats.elapsed_secs,
                stats.throughput()
            );
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run summary")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))
    }
}
