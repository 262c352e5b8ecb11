//! Phase 2: batched detail enrichment.

use crate::catalog::TrackDetail;
use crate::checkpoint::CheckpointStore;
use crate::config::EnrichmentSettings;
use crate::error::PipelineError;
use crate::gateway::{GatewayError, RateLimitedGateway};
use crate::models::{
    ArtistRecord, CandidateTrack, DropReason, DroppedRecord, EnrichedTrack, Phase,
};
use crate::telemetry::{metrics, PipelineTelemetry};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Artist records keyed by artist id, shared by every batch of a run.
///
/// Each artist is requested at most once, even when several batches ask for
/// it concurrently. A failed fetch is not cached.
#[derive(Default)]
pub struct ArtistCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<ArtistRecord>>>>,
    fetches: AtomicU64,
}

impl ArtistCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch(
        &self,
        gateway: &RateLimitedGateway,
        artist_id: &str,
    ) -> Result<ArtistRecord, GatewayError> {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.entry(artist_id.to_string()).or_default().clone()
        };
        let record = cell
            .get_or_try_init(|| async {
                self.fetches.fetch_add(1, Ordering::Relaxed);
                gateway.get_artist(artist_id).await
            })
            .await?;
        Ok(record.clone())
    }

    pub fn seed(&self, artists: impl IntoIterator<Item = ArtistRecord>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for artist in artists {
            entries.insert(
                artist.artist_id.clone(),
                Arc::new(OnceCell::new_with(Some(artist))),
            );
        }
    }

    /// Artist requests actually sent.
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentReport {
    /// In candidate order.
    pub enriched: Vec<EnrichedTrack>,
    pub dropped: Vec<DroppedRecord>,
    pub artists_fetched: u64,
}

#[derive(Default)]
struct BatchOutcome {
    enriched: Vec<EnrichedTrack>,
    artists: Vec<ArtistRecord>,
    dropped: Vec<DroppedRecord>,
}

impl BatchOutcome {
    fn merge(&mut self, other: BatchOutcome) {
        self.enriched.extend(other.enriched);
        self.artists.extend(other.artists);
        self.dropped.extend(other.dropped);
    }

    fn is_empty(&self) -> bool {
        self.enriched.is_empty() && self.artists.is_empty() && self.dropped.is_empty()
    }
}

pub struct EnrichmentCollector<'a> {
    gateway: &'a RateLimitedGateway,
    settings: &'a EnrichmentSettings,
    telemetry: &'a PipelineTelemetry,
    checkpoint: Option<(&'a dyn CheckpointStore, &'a str)>,
    cache: ArtistCache,
}

impl<'a> EnrichmentCollector<'a> {
    pub fn new(
        gateway: &'a RateLimitedGateway,
        settings: &'a EnrichmentSettings,
        telemetry: &'a PipelineTelemetry,
    ) -> Self {
        Self {
            gateway,
            settings,
            telemetry,
            checkpoint: None,
            cache: ArtistCache::new(),
        }
    }

    /// Persist progress every few batches and skip tracks already resolved.
    pub fn with_checkpoint(mut self, store: &'a dyn CheckpointStore, run_id: &'a str) -> Self {
        self.checkpoint = Some((store, run_id));
        self
    }

    pub fn cache(&self) -> &ArtistCache {
        &self.cache
    }

    /// Resolve every candidate into an [`EnrichedTrack`] or a
    /// drop record. With a checkpoint, tracks that failed on an earlier
    /// attempt are requested again.
    pub async fn enrich(
        &self,
        candidates: &[CandidateTrack],
    ) -> Result<EnrichmentReport, PipelineError> {
        let mut enriched = Vec::new();
        let mut dropped = Vec::new();
        let mut resolved: HashSet<String> = HashSet::new();

        if let Some((store, run_id)) = self.checkpoint {
            let previous = store
                .load_enriched(run_id)
                .map_err(PipelineError::Checkpoint)?;
            // Failed fetches are requeued; only unknown tracks stay dropped
            let (not_found, failed): (Vec<DroppedRecord>, Vec<DroppedRecord>) = store
                .load_dropped(run_id)
                .map_err(PipelineError::Checkpoint)?
                .into_iter()
                .filter(|d| d.reason != DropReason::ValidationFailed)
                .partition(|d| d.reason == DropReason::NotFound);
            self.cache.seed(
                store
                    .load_artists(run_id)
                    .map_err(PipelineError::Checkpoint)?,
            );
            if !previous.is_empty() || !not_found.is_empty() || !failed.is_empty() {
                info!(
                    "Resuming enrichment: {} enriched and {} not found already persisted, retrying {} failed",
                    previous.len(),
                    not_found.len(),
                    failed.len()
                );
            }
            resolved.extend(previous.iter().map(|t| t.track_id.clone()));
            resolved.extend(not_found.iter().map(|d| d.track_id.clone()));
            enriched = previous;
            dropped = not_found;
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let pending: Vec<CandidateTrack> = candidates
            .iter()
            .filter(|c| seen.insert(c.track_id.as_str()))
            .filter(|c| !resolved.contains(&c.track_id))
            .cloned()
            .collect();

        self.telemetry
            .begin(Phase::Enrichment, Some(seen.len() as u64));
        self.telemetry
            .advance(Phase::Enrichment, (seen.len() - pending.len()) as u64);

        let batches: Vec<Vec<CandidateTrack>> = pending
            .chunks(self.settings.batch_size.max(1))
            .map(<[CandidateTrack]>::to_vec)
            .collect();
        info!(
            "Enriching {} candidates in {} batches",
            pending.len(),
            batches.len()
        );

        let mut results = stream::iter(batches)
            .map(|batch| self.enrich_batch(batch))
            .buffered(self.settings.concurrency.max(1));

        let mut unsaved = BatchOutcome::default();
        let mut unsaved_batches = 0;
        while let Some(result) = results.next().await {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Aborting enrichment: {}", e);
                    self.save(&unsaved)?;
                    return Err(PipelineError::Fatal(e));
                }
            };
            self.telemetry.advance(
                Phase::Enrichment,
                (outcome.enriched.len() + outcome.dropped.len()) as u64,
            );
            for drop in &outcome.dropped {
                metrics::record_dropped(drop.reason.as_str());
            }
            enriched.extend(outcome.enriched.iter().cloned());
            dropped.extend(outcome.dropped.iter().cloned());
            unsaved.merge(outcome);
            unsaved_batches += 1;

            if unsaved_batches >= self.settings.checkpoint_every {
                self.save(&unsaved)?;
                unsaved = BatchOutcome::default();
                unsaved_batches = 0;
            }
        }
        self.save(&unsaved)?;

        let order: HashMap<&str, usize> = candidates
            .iter()
            .enumerate()
            .rev()
            .map(|(i, c)| (c.track_id.as_str(), i))
            .collect();
        enriched.sort_by_key(|t| order.get(t.track_id.as_str()).copied().unwrap_or(usize::MAX));

        let stats = self.telemetry.finish(
            Phase::Enrichment,
            &format!("{} enriched, {} dropped", enriched.len(), dropped.len()),
        );
        info!(
            "Phase 2 complete: {} enriched, {} dropped, {} artist requests in {:.1}s",
            enriched.len(),
            dropped.len(),
            self.cache.fetches(),
            stats.elapsed_secs
        );

        Ok(EnrichmentReport {
            enriched,
            dropped,
            artists_fetched: self.cache.fetches(),
        })
    }

    fn save(&self, outcome: &BatchOutcome) -> Result<(), PipelineError> {
        let Some((store, run_id)) = self.checkpoint else {
            return Ok(());
        };
        if outcome.is_empty() {
            return Ok(());
        }
        store
            .save_enrichment(run_id, &outcome.enriched, &outcome.artists, &outcome.dropped)
            .map_err(PipelineError::Checkpoint)
    }

    async fn enrich_batch(&self, batch: Vec<CandidateTrack>) -> Result<BatchOutcome, GatewayError> {
        let mut outcome = BatchOutcome::default();
        let details = self.fetch_details(&batch, &mut outcome).await?;

        for (candidate, detail) in batch.iter().zip(details) {
            let Some(detail) = detail else {
                continue;
            };
            match self
                .cache
                .get_or_fetch(self.gateway, &candidate.artist_id)
                .await
            {
                Ok(artist) => {
                    outcome
                        .enriched
                        .push(EnrichedTrack::join(candidate, &detail, &artist));
                    outcome.artists.push(artist);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => outcome.dropped.push(DroppedRecord::new(
                    &candidate.track_id,
                    drop_reason(&e),
                    format!("artist {}: {}", candidate.artist_id, e),
                )),
            }
        }
        Ok(outcome)
    }

    /// Details for `batch`, positionally. Tracks that could not be resolved
    /// are recorded as drops and come back as `None`.
    async fn fetch_details(
        &self,
        batch: &[CandidateTrack],
        outcome: &mut BatchOutcome,
    ) -> Result<Vec<Option<TrackDetail>>, GatewayError> {
        let ids: Vec<String> = batch.iter().map(|c| c.track_id.clone()).collect();

        let details = match self.gateway.get_tracks(&ids).await {
            Ok(details) => details,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) if e.is_quota_exceeded() || batch.len() == 1 => {
                warn!("Dropping batch of {} tracks: {}", batch.len(), e);
                outcome.dropped.extend(
                    batch
                        .iter()
                        .map(|c| DroppedRecord::new(&c.track_id, drop_reason(&e), e.to_string())),
                );
                return Ok(vec![None; batch.len()]);
            }
            Err(e) => {
                debug!("Batch of {} failed ({}), retrying one by one", batch.len(), e);
                let mut details = Vec::with_capacity(batch.len());
                for id in &ids {
                    match self.gateway.get_tracks(std::slice::from_ref(id)).await {
                        Ok(single) => details.push(single.into_iter().next().flatten()),
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            outcome.dropped.push(DroppedRecord::new(
                                id,
                                drop_reason(&e),
                                e.to_string(),
                            ));
                            details.push(None);
                        }
                    }
                }
                // Ids dropped above must not be reported again as unresolved
                let already: HashSet<String> =
                    outcome.dropped.iter().map(|d| d.track_id.clone()).collect();
                return Ok(self.mark_unresolved(batch, details, outcome, &already));
            }
        };

        Ok(self.mark_unresolved(batch, details, outcome, &HashSet::new()))
    }

    fn mark_unresolved(
        &self,
        batch: &[CandidateTrack],
        mut details: Vec<Option<TrackDetail>>,
        outcome: &mut BatchOutcome,
        already_dropped: &HashSet<String>,
    ) -> Vec<Option<TrackDetail>> {
        details.resize(batch.len(), None);
        for (candidate, detail) in batch.iter().zip(details.iter_mut()) {
            let matches = detail
                .as_ref()
                .is_some_and(|d| d.track_id == candidate.track_id);
            if !matches {
                *detail = None;
                if !already_dropped.contains(&candidate.track_id) {
                    outcome.dropped.push(DroppedRecord::new(
                        &candidate.track_id,
                        DropReason::NotFound,
                        "track not returned by the detail endpoint",
                    ));
                }
            }
        }
        details
    }
}

fn drop_reason(error: &GatewayError) -> DropReason {
    if error.is_not_found() {
        DropReason::NotFound
    } else {
        DropReason::DetailFetchFailed
    }
}
