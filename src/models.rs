//! Data models shared by the collection phases.
//!
//! Lifecycle: `CandidateTrack` (phase 1) → `EnrichedTrack` (phase 2) →
//! `FeatureRow` (phase 3, see [`crate::pipeline::features`]). `ArtistRecord`
//! is resolved once per artist and reused for the whole run.

use serde::{Deserialize, Serialize};

/// One of the fixed stratification buckets used to partition the sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Genre {
    #[serde(rename = "pop")]
    Pop,
    #[serde(rename = "rock")]
    Rock,
    #[serde(rename = "hip-hop")]
    HipHop,
    #[serde(rename = "electronic")]
    Electronic,
    #[serde(rename = "jazz")]
    Jazz,
    #[serde(rename = "classical")]
    Classical,
    #[serde(rename = "metal")]
    Metal,
    #[serde(rename = "r&b")]
    RnB,
}

impl Genre {
    pub const ALL: [Genre; 8] = [
        Genre::Pop,
        Genre::Rock,
        Genre::HipHop,
        Genre::Electronic,
        Genre::Jazz,
        Genre::Classical,
        Genre::Metal,
        Genre::RnB,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Pop => "pop",
            Genre::Rock => "rock",
            Genre::HipHop => "hip-hop",
            Genre::Electronic => "electronic",
            Genre::Jazz => "jazz",
            Genre::Classical => "classical",
            Genre::Metal => "metal",
            Genre::RnB => "r&b",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pop" => Some(Genre::Pop),
            "rock" => Some(Genre::Rock),
            "hip-hop" | "hiphop" | "hip_hop" => Some(Genre::HipHop),
            "electronic" => Some(Genre::Electronic),
            "jazz" => Some(Genre::Jazz),
            "classical" => Some(Genre::Classical),
            "metal" => Some(Genre::Metal),
            "r&b" | "rnb" => Some(Genre::RnB),
            _ => None,
        }
    }
}

impl std::fmt::Display for Genre {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range of release years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    /// Years in the range, newest first.
    pub fn years(&self) -> Vec<i32> {
        (self.start..=self.end).rev().collect()
    }

    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, year: i32) -> bool {
        year >= self.start && year <= self.end
    }
}

/// Per-genre search plan. Immutable once the pipeline starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchStrategy {
    pub genre: Genre,
    pub year_range: YearRange,
    /// Query with `{term}` and `{year}` placeholders.
    pub query_template: String,
    /// Sub-genre vocabulary substituted into `{term}`.
    pub terms: Vec<String>,
}

/// A track identifier accepted during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTrack {
    pub track_id: String,
    /// Collection-time label, first assignment wins.
    pub genre: Genre,
    pub artist_id: String,
    /// Unix timestamp (seconds).
    pub discovered_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRecord {
    pub artist_id: String,
    pub name: String,
    pub popularity: u32,
    pub follower_count: u64,
    pub genres: Vec<String>,
}

/// A candidate joined with its track detail and its artist record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTrack {
    pub track_id: String,
    pub title: String,
    pub duration_ms: i64,
    pub explicit: bool,
    pub release_year: Option<i32>,
    pub popularity: u32,
    pub preview_available: bool,
    pub artist_id: String,
    pub genre: Genre,
    pub artist_name: String,
    pub artist_popularity: u32,
    pub artist_followers: u64,
    pub artist_genre_count: u32,
}

impl EnrichedTrack {
    pub fn join(
        candidate: &CandidateTrack,
        detail: &crate::catalog::TrackDetail,
        artist: &ArtistRecord,
    ) -> Self {
        Self {
            track_id: candidate.track_id.clone(),
            title: detail.title.clone(),
            duration_ms: detail.duration_ms,
            explicit: detail.explicit,
            release_year: detail.release_year,
            popularity: detail.popularity,
            preview_available: detail.preview_available,
            artist_id: artist.artist_id.clone(),
            genre: candidate.genre,
            artist_name: artist.name.clone(),
            artist_popularity: artist.popularity,
            artist_followers: artist.follower_count,
            artist_genre_count: artist.genres.len() as u32,
        }
    }
}

/// Pipeline phase, also the key of persisted checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    Enrichment,
    Features,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Discovery => "discovery",
            Phase::Enrichment => "enrichment",
            Phase::Features => "features",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discovery" => Some(Phase::Discovery),
            "enrichment" => Some(Phase::Enrichment),
            "features" => Some(Phase::Features),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a record was left out of the dataset. Never fatal to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The detail or artist request failed after retries. Retried on resume.
    DetailFetchFailed,
    /// The service does not know the track or its artist.
    NotFound,
    ValidationFailed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::DetailFetchFailed => "detail_fetch_failed",
            DropReason::NotFound => "not_found",
            DropReason::ValidationFailed => "validation_failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "detail_fetch_failed" => Some(DropReason::DetailFetchFailed),
            "not_found" => Some(DropReason::NotFound),
            "validation_failed" => Some(DropReason::ValidationFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedRecord {
    pub track_id: String,
    pub reason: DropReason,
    pub detail: String,
}

impl DroppedRecord {
    pub fn new(track_id: impl Into<String>, reason: DropReason, detail: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            reason,
            detail: detail.into(),
        }
    }
}
