//! Durable per-run phase outputs.
//!
//! Every phase writes its output here, keyed by run id, so that a terminated
//! run can resume from the last persisted boundary instead of starting over.

mod schema;
mod store;

pub use store::SqliteCheckpointStore;

use crate::models::{
    ArtistRecord, CandidateTrack, DroppedRecord, EnrichedTrack, Genre, Phase,
};
use crate::telemetry::GenreOutcome;
use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    pub created_at: i64,
    pub status: RunStatus,
    pub completed_phase: Option<Phase>,
    pub target_per_genre: usize,
    pub genres: Vec<Genre>,
    pub dataset_path: Option<String>,
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, target_per_genre: usize, genres: Vec<Genre>) -> Self {
        Self {
            run_id: run_id.into(),
            created_at: chrono::Utc::now().timestamp(),
            status: RunStatus::Running,
            completed_phase: None,
            target_per_genre,
            genres,
            dataset_path: None,
        }
    }

    /// Whether `phase` has already been persisted for this run.
    pub fn has_completed(&self, phase: Phase) -> bool {
        self.completed_phase.is_some_and(|done| done >= phase)
    }
}

pub trait CheckpointStore: Send + Sync {
    fn create_run(&self, run: &RunRecord) -> Result<()>;

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// Newest first.
    fn list_runs(&self) -> Result<Vec<RunRecord>>;

    fn mark_phase_completed(&self, run_id: &str, phase: Phase) -> Result<()>;

    fn set_status(&self, run_id: &str, status: RunStatus) -> Result<()>;

    fn set_dataset_path(&self, run_id: &str, path: &str) -> Result<()>;

    /// Removes the run and everything recorded under it.
    fn delete_run(&self, run_id: &str) -> Result<bool>;

    /// Persist one genre's accepted candidates and mark the genre done, atomically.
    fn save_genre(
        &self,
        run_id: &str,
        outcome: &GenreOutcome,
        candidates: &[CandidateTrack],
    ) -> Result<()>;

    /// Persist candidates of a genre that is still in progress. The genre is
    /// not marked done.
    fn save_candidates(&self, run_id: &str, candidates: &[CandidateTrack]) -> Result<()>;

    fn completed_genres(&self, run_id: &str) -> Result<Vec<GenreOutcome>>;

    /// In acceptance order.
    fn load_candidates(&self, run_id: &str) -> Result<Vec<CandidateTrack>>;

    /// Persist an enrichment increment. Already stored rows are left untouched.
    fn save_enrichment(
        &self,
        run_id: &str,
        enriched: &[EnrichedTrack],
        artists: &[ArtistRecord],
        dropped: &[DroppedRecord],
    ) -> Result<()>;

    fn load_enriched(&self, run_id: &str) -> Result<Vec<EnrichedTrack>>;

    fn load_artists(&self, run_id: &str) -> Result<Vec<ArtistRecord>>;

    fn load_dropped(&self, run_id: &str) -> Result<Vec<DroppedRecord>>;

    /// Replace the validation drops of a previous feature derivation.
    fn replace_validation_drops(&self, run_id: &str, dropped: &[DroppedRecord]) -> Result<()>;
}
