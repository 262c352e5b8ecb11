//! Scripted in-memory catalog

use super::constants::*;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use title_sampler::catalog::{
    CatalogClient, CatalogError, PageRequest, SearchFilters, SearchHit, SearchPage, TrackDetail,
};
use title_sampler::models::ArtistRecord;

/// In-memory [`CatalogClient`].
///
/// Search results are registered per exact query string and paged like the
/// real service. Track and artist lookups are served from maps. Failures can
/// be injected per track id, per query, or for the next N calls.
#[derive(Default)]
pub struct FakeCatalog {
    search_results: Mutex<HashMap<String, Vec<SearchHit>>>,
    tracks: Mutex<HashMap<String, TrackDetail>>,
    artists: Mutex<HashMap<String, ArtistRecord>>,

    failing_tracks: Mutex<HashSet<String>>,
    fatal_tracks: Mutex<HashSet<String>>,
    fatal_queries: Mutex<HashSet<String>>,
    rate_limits_remaining: AtomicU32,
    search_rate_limited: Mutex<bool>,

    queries: Mutex<Vec<String>>,
    requested_tracks: Mutex<Vec<String>>,
    artist_calls: AtomicUsize,
    track_calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append `hits` to the results of `query`.
    pub fn add_search(&self, query: &str, hits: Vec<SearchHit>) {
        self.search_results
            .lock()
            .unwrap()
            .entry(query.to_string())
            .or_default()
            .extend(hits);
    }

    pub fn add_track(&self, detail: TrackDetail) {
        self.tracks
            .lock()
            .unwrap()
            .insert(detail.track_id.clone(), detail);
    }

    pub fn add_artist(&self, artist: ArtistRecord) {
        self.artists
            .lock()
            .unwrap()
            .insert(artist.artist_id.clone(), artist);
    }

    /// Detail requests containing `track_id` fail with a server error.
    pub fn fail_track(&self, track_id: &str) {
        self.failing_tracks
            .lock()
            .unwrap()
            .insert(track_id.to_string());
    }

    pub fn clear_failing_tracks(&self) {
        self.failing_tracks.lock().unwrap().clear();
    }

    /// Detail requests containing `track_id` are rejected as unauthorized.
    pub fn fatal_track(&self, track_id: &str) {
        self.fatal_tracks
            .lock()
            .unwrap()
            .insert(track_id.to_string());
    }

    pub fn clear_fatal_tracks(&self) {
        self.fatal_tracks.lock().unwrap().clear();
    }

    /// `query` is rejected as unauthorized.
    pub fn fatal_query(&self, query: &str) {
        self.fatal_queries
            .lock()
            .unwrap()
            .insert(query.to_string());
    }

    pub fn clear_fatal_queries(&self) {
        self.fatal_queries.lock().unwrap().clear();
    }

    /// The next `count` calls of any kind are rate limited.
    pub fn rate_limit_next(&self, count: u32) {
        self.rate_limits_remaining.store(count, Ordering::SeqCst);
    }

    /// Every search call is rate limited until switched off.
    pub fn rate_limit_searches(&self, enabled: bool) {
        *self.search_rate_limited.lock().unwrap() = enabled;
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    /// Ids of every detail request, in request order.
    pub fn requested_tracks(&self) -> Vec<String> {
        self.requested_tracks.lock().unwrap().clone()
    }

    pub fn artist_calls(&self) -> usize {
        self.artist_calls.load(Ordering::SeqCst)
    }

    pub fn track_calls(&self) -> usize {
        self.track_calls.load(Ordering::SeqCst)
    }

    fn take_rate_limit(&self) -> bool {
        self.rate_limits_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn rate_limited() -> CatalogError {
    CatalogError::RateLimited { retry_after: None }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn search(
        &self,
        query: &str,
        _filters: &SearchFilters,
        page: PageRequest,
    ) -> Result<SearchPage, CatalogError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.take_rate_limit() || *self.search_rate_limited.lock().unwrap() {
            return Err(rate_limited());
        }
        if self.fatal_queries.lock().unwrap().contains(query) {
            return Err(CatalogError::Unauthorized { status: 401 });
        }

        let results = self.search_results.lock().unwrap();
        let hits = results.get(query).cloned().unwrap_or_default();
        let start = (page.offset as usize).min(hits.len());
        let end = (start + page.limit as usize).min(hits.len());
        Ok(SearchPage {
            items: hits[start..end].to_vec(),
            returned: (end - start) as u32,
            offset: page.offset,
            limit: page.limit,
            total: hits.len() as u32,
        })
    }

    async fn get_tracks(&self, ids: &[String]) -> Result<Vec<Option<TrackDetail>>, CatalogError> {
        self.track_calls.fetch_add(1, Ordering::SeqCst);
        self.requested_tracks
            .lock()
            .unwrap()
            .extend(ids.iter().cloned());
        if self.take_rate_limit() {
            return Err(rate_limited());
        }
        if ids
            .iter()
            .any(|id| self.fatal_tracks.lock().unwrap().contains(id))
        {
            return Err(CatalogError::Unauthorized { status: 401 });
        }
        if ids
            .iter()
            .any(|id| self.failing_tracks.lock().unwrap().contains(id))
        {
            return Err(CatalogError::Server { status: 503 });
        }

        let tracks = self.tracks.lock().unwrap();
        Ok(ids.iter().map(|id| tracks.get(id).cloned()).collect())
    }

    async fn get_artist(&self, id: &str) -> Result<ArtistRecord, CatalogError> {
        self.artist_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_rate_limit() {
            return Err(rate_limited());
        }
        self.artists
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("artist {}", id)))
    }
}

/// A hit that passes every discovery filter for [`TEST_YEAR`].
pub fn hit(track_id: &str, artist_id: &str) -> SearchHit {
    SearchHit {
        track_id: track_id.to_string(),
        artist_id: Some(artist_id.to_string()),
        release_year: Some(TEST_YEAR),
        popularity: Some(TEST_POPULARITY),
    }
}
