//! Shared constants for end-to-end tests

/// The single release year used by most fixtures.
pub const TEST_YEAR: i32 = 2024;

/// Popularity comfortably above the default minimum.
pub const TEST_POPULARITY: u32 = 50;

/// Track duration used by every fixture track.
pub const TEST_DURATION_MS: i64 = 200_000;

/// Retries the test gateway allows before giving up.
pub const TEST_MAX_RETRIES: u32 = 2;
