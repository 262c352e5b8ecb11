//! HTTP client for the Spotify Web API catalog endpoints.
//!
//! Only the three calls the pipeline needs are implemented: track search,
//! batched track lookup and artist lookup. Throttling and retries are the
//! gateway's job; this client maps every response onto [`CatalogError`].

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{
    parse_release_year, CatalogClient, CatalogError, PageRequest, SearchFilters, SearchHit,
    SearchPage, TrackDetail,
};
use crate::config::ApiSettings;
use crate::models::ArtistRecord;

pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

#[derive(Clone)]
pub struct SpotifyCatalogClient {
    client: Client,
    base_url: String,
    access_token: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    tracks: Option<TrackPaging>,
}

#[derive(Deserialize)]
struct TrackPaging {
    #[serde(default)]
    items: Vec<Option<WireTrack>>,
    #[serde(default)]
    offset: u32,
    #[serde(default)]
    limit: u32,
    #[serde(default)]
    total: u32,
}

#[derive(Deserialize)]
struct TracksResponse {
    #[serde(default)]
    tracks: Vec<Option<WireTrack>>,
}

#[derive(Deserialize)]
struct WireTrack {
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    duration_ms: i64,
    #[serde(default)]
    explicit: bool,
    #[serde(default)]
    popularity: Option<u32>,
    #[serde(default)]
    preview_url: Option<String>,
    #[serde(default)]
    artists: Vec<WireArtistRef>,
    album: Option<WireAlbum>,
}

#[derive(Deserialize)]
struct WireArtistRef {
    id: Option<String>,
}

#[derive(Deserialize)]
struct WireAlbum {
    release_date: Option<String>,
}

#[derive(Deserialize)]
struct WireArtist {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    popularity: u32,
    followers: Option<WireFollowers>,
    #[serde(default)]
    genres: Vec<String>,
}

#[derive(Deserialize)]
struct WireFollowers {
    total: Option<u64>,
}

impl TrackPaging {
    /// Null entries and tracks without an id are skipped, but still count
    /// towards `returned` so paging does not stall on them.
    fn into_page(self, requested: PageRequest) -> SearchPage {
        let returned = self.items.len() as u32;
        SearchPage {
            items: self
                .items
                .into_iter()
                .flatten()
                .filter_map(WireTrack::into_hit)
                .collect(),
            returned,
            offset: self.offset,
            limit: if self.limit == 0 { requested.limit } else { self.limit },
            total: self.total,
        }
    }
}

impl WireTrack {
    fn primary_artist_id(&self) -> Option<String> {
        self.artists.first().and_then(|a| a.id.clone())
    }

    fn release_year(&self) -> Option<i32> {
        self.album
            .as_ref()
            .and_then(|a| a.release_date.as_deref())
            .and_then(parse_release_year)
    }

    fn into_hit(self) -> Option<SearchHit> {
        let artist_id = self.primary_artist_id();
        let release_year = self.release_year();
        Some(SearchHit {
            track_id: self.id?,
            artist_id,
            release_year,
            popularity: self.popularity,
        })
    }

    fn into_detail(self) -> Option<TrackDetail> {
        let artist_id = self.primary_artist_id();
        let release_year = self.release_year();
        Some(TrackDetail {
            track_id: self.id?,
            title: self.name,
            duration_ms: self.duration_ms,
            explicit: self.explicit,
            release_year,
            popularity: self.popularity.unwrap_or(0),
            preview_available: self.preview_url.is_some_and(|u| !u.is_empty()),
            artist_id,
        })
    }
}

impl From<WireArtist> for ArtistRecord {
    fn from(a: WireArtist) -> Self {
        ArtistRecord {
            artist_id: a.id,
            name: a.name,
            popularity: a.popularity,
            follower_count: a.followers.and_then(|f| f.total).unwrap_or(0),
            genres: a.genres,
        }
    }
}

impl SpotifyCatalogClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `settings` - base URL, bearer token and request timeout
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            access_token: settings.access_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, CatalogError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(e.to_string()))
    }
}

#[async_trait]
impl CatalogClient for SpotifyCatalogClient {
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        page: PageRequest,
    ) -> Result<SearchPage, CatalogError> {
        let url = format!("{}/search", self.base_url);
        let mut params = vec![
            ("q", query.to_string()),
            ("type", "track".to_string()),
            ("limit", page.limit.to_string()),
            ("offset", page.offset.to_string()),
        ];
        if let Some(market) = &filters.market {
            params.push(("market", market.clone()));
        }

        let body: SearchResponse = self.get_json(&url, &params).await?;
        Ok(match body.tracks {
            Some(tracks) => tracks.into_page(page),
            None => SearchPage::empty(page),
        })
    }

    async fn get_tracks(&self, ids: &[String]) -> Result<Vec<Option<TrackDetail>>, CatalogError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        if ids.len() > super::MAX_TRACK_BATCH {
            return Err(CatalogError::BadRequest(format!(
                "{} ids requested, at most {} allowed",
                ids.len(),
                super::MAX_TRACK_BATCH
            )));
        }

        let url = format!("{}/tracks", self.base_url);
        let body: TracksResponse = self.get_json(&url, &[("ids", ids.join(","))]).await?;

        // Keep the response positional; the service answers in request order.
        let mut details: Vec<Option<TrackDetail>> = body
            .tracks
            .into_iter()
            .map(|t| t.and_then(WireTrack::into_detail))
            .collect();
        details.resize(ids.len(), None);
        Ok(details)
    }

    async fn get_artist(&self, id: &str) -> Result<ArtistRecord, CatalogError> {
        let url = format!("{}/artists/{}", self.base_url, id);
        let artist: WireArtist = self.get_json(&url, &[]).await?;
        Ok(artist.into())
    }
}

fn map_transport_error(e: reqwest::Error) -> CatalogError {
    if e.is_timeout() {
        CatalogError::Timeout
    } else {
        CatalogError::Network(e.to_string())
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success HTTP status onto the catalog error taxonomy.
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> CatalogError {
    match status.as_u16() {
        429 => CatalogError::RateLimited { retry_after },
        401 | 403 => CatalogError::Unauthorized {
            status: status.as_u16(),
        },
        404 => CatalogError::NotFound(body.to_string()),
        408 => CatalogError::Timeout,
        s if status.is_server_error() => CatalogError::Server { status: s },
        _ => CatalogError::BadRequest(format!("status {}: {}", status, body)),
    }
}
