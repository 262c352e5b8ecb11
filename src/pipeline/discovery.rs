//! Phase 1: stratified bulk identifier collection.
//!
//! Genres are collected one after the other. Within a genre the query
//! variants are paged in order and hits are accepted first-seen,
//! first-accepted until the target is reached or the variants run out.

use super::strategy::{query_variants, QueryVariant};
use crate::catalog::{PageRequest, SearchFilters, SearchHit};
use crate::checkpoint::CheckpointStore;
use crate::config::CollectionSettings;
use crate::error::PipelineError;
use crate::gateway::RateLimitedGateway;
use crate::models::{CandidateTrack, Genre, Phase, SearchStrategy};
use crate::telemetry::{metrics, GenreOutcome, GenreStop, PipelineTelemetry};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Per-genre, per-artist acceptance counter.
///
/// [`ArtistQuota::try_acquire`] is the only way to count a track against an
/// artist, so concurrent callers can never push an artist past the limit.
pub struct ArtistQuota {
    limit: usize,
    counts: Mutex<HashMap<(Genre, String), usize>>,
}

impl ArtistQuota {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Count one more track for `artist_id` in `genre` unless that would
    /// exceed the limit. Returns whether the track may be accepted.
    pub fn try_acquire(&self, genre: Genre, artist_id: &str) -> bool {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry((genre, artist_id.to_string())).or_insert(0);
        if *count >= self.limit {
            return false;
        }
        *count += 1;
        true
    }

    pub fn count(&self, genre: Genre, artist_id: &str) -> usize {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts
            .get(&(genre, artist_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Rebuild counters from already accepted candidates.
    pub fn seed(&self, candidates: &[CandidateTrack]) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        for candidate in candidates {
            *counts
                .entry((candidate.genre, candidate.artist_id.clone()))
                .or_insert(0) += 1;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    /// In acceptance order, genre by genre.
    pub candidates: Vec<CandidateTrack>,
    pub outcomes: Vec<GenreOutcome>,
}

impl DiscoveryReport {
    pub fn for_genre(&self, genre: Genre) -> impl Iterator<Item = &CandidateTrack> {
        self.candidates.iter().filter(move |c| c.genre == genre)
    }
}

pub struct DiscoveryCollector<'a> {
    gateway: &'a RateLimitedGateway,
    settings: &'a CollectionSettings,
    filters: SearchFilters,
    telemetry: &'a PipelineTelemetry,
    checkpoint: Option<(&'a dyn CheckpointStore, &'a str)>,
    quota: ArtistQuota,
}

/// Why a single hit was not accepted. Only used for debug counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Rejection {
    AlreadyAccepted,
    YearMismatch,
    LowPopularity,
    NoArtist,
    YearFull,
    ArtistQuota,
}

impl<'a> DiscoveryCollector<'a> {
    pub fn new(
        gateway: &'a RateLimitedGateway,
        settings: &'a CollectionSettings,
        telemetry: &'a PipelineTelemetry,
    ) -> Self {
        Self {
            gateway,
            settings,
            filters: SearchFilters::default(),
            telemetry,
            checkpoint: None,
            quota: ArtistQuota::new(settings.artist_quota),
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Persist each genre as it completes and skip genres already persisted.
    pub fn with_checkpoint(mut self, store: &'a dyn CheckpointStore, run_id: &'a str) -> Self {
        self.checkpoint = Some((store, run_id));
        self
    }

    pub fn quota(&self) -> &ArtistQuota {
        &self.quota
    }

    /// Collect up to `target_per_genre` candidates for every strategy.
    ///
    /// A genre that runs out of query variants is accepted short. Only a
    /// fatal request error aborts the collection.
    pub async fn collect(
        &self,
        strategies: &[SearchStrategy],
        target_per_genre: usize,
    ) -> Result<DiscoveryReport, PipelineError> {
        let mut report = DiscoveryReport::default();
        let mut accepted_ids: HashSet<String> = HashSet::new();
        let mut done: HashMap<Genre, GenreOutcome> = HashMap::new();
        let mut unfinished: HashMap<Genre, Vec<CandidateTrack>> = HashMap::new();

        if let Some((store, run_id)) = self.checkpoint {
            let previous = store
                .load_candidates(run_id)
                .map_err(PipelineError::Checkpoint)?;
            let outcomes = store
                .completed_genres(run_id)
                .map_err(PipelineError::Checkpoint)?;
            if !previous.is_empty() {
                info!(
                    "Resuming discovery: {} genres and {} candidates already collected",
                    outcomes.len(),
                    previous.len()
                );
            }
            self.quota.seed(&previous);
            accepted_ids.extend(previous.iter().map(|c| c.track_id.clone()));
            done.extend(outcomes.into_iter().map(|o| (o.genre, o)));
            for candidate in previous {
                if done.contains_key(&candidate.genre) {
                    report.candidates.push(candidate);
                } else {
                    unfinished.entry(candidate.genre).or_default().push(candidate);
                }
            }
        }

        self.telemetry.begin(
            Phase::Discovery,
            Some((target_per_genre * strategies.len()) as u64),
        );
        self.telemetry.advance(
            Phase::Discovery,
            (report.candidates.len() + unfinished.values().map(Vec::len).sum::<usize>()) as u64,
        );

        for strategy in strategies {
            if let Some(outcome) = done.remove(&strategy.genre) {
                report.outcomes.push(outcome);
                continue;
            }

            let mut candidates = unfinished.remove(&strategy.genre).unwrap_or_default();
            let stop = match self
                .collect_genre(strategy, target_per_genre, &mut accepted_ids, &mut candidates)
                .await
            {
                Ok(stop) => stop,
                Err(e) => {
                    if let Some((store, run_id)) = self.checkpoint {
                        warn!(
                            "Keeping {} unfinished {} candidates after: {}",
                            candidates.len(),
                            strategy.genre,
                            e
                        );
                        store
                            .save_candidates(run_id, &candidates)
                            .map_err(PipelineError::Checkpoint)?;
                    }
                    return Err(e);
                }
            };
            let outcome = GenreOutcome {
                genre: strategy.genre,
                target: target_per_genre,
                accepted: candidates.len(),
                stop,
            };
            metrics::set_candidates_accepted(strategy.genre.as_str(), candidates.len());

            if outcome.shortfall() > 0 {
                warn!(
                    "Genre {} collected {} of {} candidates, short by {} ({})",
                    strategy.genre,
                    outcome.accepted,
                    target_per_genre,
                    outcome.shortfall(),
                    stop.as_str()
                );
            } else {
                info!(
                    "Genre {} complete: {} candidates",
                    strategy.genre, outcome.accepted
                );
            }

            if let Some((store, run_id)) = self.checkpoint {
                store
                    .save_genre(run_id, &outcome, &candidates)
                    .map_err(PipelineError::Checkpoint)?;
            }
            report.candidates.extend(candidates);
            report.outcomes.push(outcome);
        }

        let total_short: usize = report.outcomes.iter().map(GenreOutcome::shortfall).sum();
        let stats = self.telemetry.finish(
            Phase::Discovery,
            &format!(
                "{} candidates, {} short of target",
                report.candidates.len(),
                total_short
            ),
        );
        info!(
            "Phase 1 complete: {} candidates across {} genres in {:.1}s",
            report.candidates.len(),
            report.outcomes.len(),
            stats.elapsed_secs
        );
        Ok(report)
    }

    /// Page through the variants of `strategy`, appending to `accepted`.
    ///
    /// `accepted` may hold candidates of an interrupted attempt; they count
    /// toward the target and, once their hit shows up again, toward the
    /// balance of their year. On error `accepted` keeps what was collected.
    async fn collect_genre(
        &self,
        strategy: &SearchStrategy,
        target: usize,
        accepted_ids: &mut HashSet<String>,
        accepted: &mut Vec<CandidateTrack>,
    ) -> Result<GenreStop, PipelineError> {
        let variants = query_variants(strategy);
        let year_count = variants
            .iter()
            .filter_map(|v| v.year)
            .collect::<HashSet<_>>()
            .len();
        let year_cap = if self.settings.balance_years && year_count > 0 {
            target.div_ceil(year_count)
        } else {
            usize::MAX
        };

        let mut resumed: HashSet<String> = accepted.iter().map(|c| c.track_id.clone()).collect();
        let mut per_year: HashMap<i32, usize> = HashMap::new();
        let mut rejections: HashMap<Rejection, usize> = HashMap::new();

        info!(
            "Collecting {} ({} query variants, target {})",
            strategy.genre,
            variants.len(),
            target
        );

        for variant in &variants {
            if accepted.len() >= target {
                break;
            }
            if let Some(year) = variant.year {
                if per_year.get(&year).copied().unwrap_or(0) >= year_cap {
                    continue;
                }
            }

            let mut offset = 0;
            while offset < self.settings.max_search_offset {
                let limit = self
                    .settings
                    .page_size
                    .min(self.settings.max_search_offset - offset);
                let page = match self
                    .gateway
                    .search(&variant.query, &self.filters, PageRequest { offset, limit })
                    .await
                {
                    Ok(page) => page,
                    Err(e) if e.is_fatal() => return Err(PipelineError::Fatal(e)),
                    Err(e) if e.is_quota_exceeded() => {
                        warn!(
                            "Abandoning {} after quota exhaustion on '{}': {}",
                            strategy.genre, variant.query, e
                        );
                        return Ok(GenreStop::QuotaExceeded);
                    }
                    Err(e) => {
                        warn!("Skipping query '{}': {}", variant.query, e);
                        break;
                    }
                };

                let before = accepted.len();
                for hit in &page.items {
                    if accepted.len() >= target {
                        break;
                    }
                    if resumed.remove(&hit.track_id) {
                        if let Some(year) = hit.release_year {
                            *per_year.entry(year).or_insert(0) += 1;
                        }
                        continue;
                    }
                    match self.evaluate(
                        strategy.genre,
                        variant,
                        hit,
                        accepted_ids,
                        &per_year,
                        year_cap,
                    ) {
                        Ok((artist_id, year)) => {
                            accepted_ids.insert(hit.track_id.clone());
                            *per_year.entry(year).or_insert(0) += 1;
                            accepted.push(CandidateTrack {
                                track_id: hit.track_id.clone(),
                                genre: strategy.genre,
                                artist_id,
                                discovered_at: chrono::Utc::now().timestamp(),
                            });
                        }
                        Err(reason) => *rejections.entry(reason).or_insert(0) += 1,
                    }
                }
                self.telemetry
                    .advance(Phase::Discovery, (accepted.len() - before) as u64);

                if accepted.len() >= target {
                    break;
                }
                if let Some(year) = variant.year {
                    if per_year.get(&year).copied().unwrap_or(0) >= year_cap {
                        break;
                    }
                }
                match page.next_offset() {
                    Some(next) => offset = next,
                    None => break,
                }
            }
        }

        debug!("{} rejections: {:?}", strategy.genre, rejections);
        if accepted.len() >= target {
            Ok(GenreStop::TargetReached)
        } else {
            Ok(GenreStop::QueriesExhausted)
        }
    }

    /// Decide whether `hit` can be accepted. Returns the artist and release
    /// year to record; the artist quota is only charged when every other
    /// filter passed.
    fn evaluate(
        &self,
        genre: Genre,
        variant: &QueryVariant,
        hit: &SearchHit,
        accepted_ids: &HashSet<String>,
        per_year: &HashMap<i32, usize>,
        year_cap: usize,
    ) -> Result<(String, i32), Rejection> {
        if accepted_ids.contains(&hit.track_id) {
            return Err(Rejection::AlreadyAccepted);
        }
        let year = match (hit.release_year, variant.year) {
            (Some(year), Some(wanted)) if year == wanted => year,
            (Some(year), None) if self.settings.year_range.contains(year) => year,
            _ => return Err(Rejection::YearMismatch),
        };
        if hit.popularity.unwrap_or(0) < self.settings.min_popularity {
            return Err(Rejection::LowPopularity);
        }
        let Some(artist_id) = hit.artist_id.as_ref() else {
            return Err(Rejection::NoArtist);
        };
        if per_year.get(&year).copied().unwrap_or(0) >= year_cap {
            return Err(Rejection::YearFull);
        }
        if !self.quota.try_acquire(genre, artist_id) {
            return Err(Rejection::ArtistQuota);
        }
        Ok((artist_id.clone(), year))
    }
}
