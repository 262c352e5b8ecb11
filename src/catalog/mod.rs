//! Catalog service boundary.
//!
//! The pipeline only talks to the remote catalog through [`CatalogClient`].
//! Production uses [`SpotifyCatalogClient`]; tests plug in scripted fakes.
//! Credentials are obtained elsewhere: clients receive an already-authorized
//! access token.

mod spotify;

pub use spotify::{SpotifyCatalogClient, SPOTIFY_API_BASE};

use crate::models::ArtistRecord;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Largest number of ids accepted by one track-detail request.
pub const MAX_TRACK_BATCH: usize = 50;

/// Largest page the search endpoint returns.
pub const MAX_PAGE_SIZE: u32 = 50;

/// Failure of a single remote call, before any retry logic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("rate limited by catalog service (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("catalog service error, status {status}")]
    Server { status: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("not authorized, status {status}")]
    Unauthorized { status: u16 },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid response: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// ISO 3166 market code; `None` lets the service pick.
    pub market: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u32,
    pub limit: u32,
}

/// A track as it appears in search results. Only what discovery needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub track_id: String,
    /// Primary (first credited) artist.
    pub artist_id: Option<String>,
    pub release_year: Option<i32>,
    pub popularity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    pub items: Vec<SearchHit>,
    /// Entries the service returned for this page, including the ones that
    /// could not be mapped to a hit. Paging advances by this count.
    pub returned: u32,
    pub offset: u32,
    pub limit: u32,
    /// Total matches reported by the service.
    pub total: u32,
}

impl SearchPage {
    /// A page with no entries.
    pub fn empty(page: PageRequest) -> Self {
        Self {
            items: vec![],
            returned: 0,
            offset: page.offset,
            limit: page.limit,
            total: 0,
        }
    }

    /// Offset of the following page, or `None` when this page is the last one.
    pub fn next_offset(&self) -> Option<u32> {
        if self.returned == 0 || self.returned < self.limit {
            return None;
        }
        let next = self.offset + self.returned;
        if next >= self.total {
            None
        } else {
            Some(next)
        }
    }
}

/// Full track record returned by the detail endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDetail {
    pub track_id: String,
    pub title: String,
    pub duration_ms: i64,
    pub explicit: bool,
    pub release_year: Option<i32>,
    pub popularity: u32,
    pub preview_available: bool,
    pub artist_id: Option<String>,
}

/// Authenticated catalog-search / catalog-detail client.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Run one paged track search.
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        page: PageRequest,
    ) -> Result<SearchPage, CatalogError>;

    /// Resolve up to [`MAX_TRACK_BATCH`] track ids. The result is positional:
    /// `None` marks an id the service could not resolve.
    async fn get_tracks(&self, ids: &[String]) -> Result<Vec<Option<TrackDetail>>, CatalogError>;

    async fn get_artist(&self, id: &str) -> Result<ArtistRecord, CatalogError>;
}

/// Parse the year out of a `YYYY`, `YYYY-MM` or `YYYY-MM-DD` release date.
pub fn parse_release_year(release_date: &str) -> Option<i32> {
    let year = release_date.get(..4)?;
    if !year.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    year.parse().ok().filter(|y| *y > 0)
}
