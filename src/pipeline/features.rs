//! Phase 3: deterministic title feature derivation.
//!
//! Pure functions of the enriched records and the lexicon. The same input
//! always produces the same rows in the same order.

use super::lexicon::Lexicon;
use crate::models::{DropReason, DroppedRecord, EnrichedTrack, Genre};
use lazy_static::lazy_static;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use unicode_segmentation::UnicodeSegmentation;

pub const MAX_WORD_COUNT: usize = 50;
pub const MAX_POPULARITY: u32 = 100;

lazy_static! {
    static ref PUNCTUATION: Regex = Regex::new(r"\p{P}").expect("valid regex");
    static ref PARENTHESES: Regex = Regex::new(r"[()\[\]]").expect("valid regex");
    static ref FEATURING: Regex =
        Regex::new(r"(?i)\b(?:feat|ft|featuring)\b").expect("valid regex");
    static ref VERSION_TAG: Regex = Regex::new(
        r"(?i)\b(?:remix|remaster(?:ed)?|live|acoustic|version|edit|mix|demo|instrumental|unplugged)\b"
    )
    .expect("valid regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplexityTier {
    Single,
    Short,
    Medium,
    Long,
}

impl ComplexityTier {
    /// 1 word is `Single`, 2-3 `Short`, 4-5 `Medium`, anything else `Long`.
    pub fn from_word_count(word_count: usize) -> Self {
        match word_count {
            1 => ComplexityTier::Single,
            2 | 3 => ComplexityTier::Short,
            4 | 5 => ComplexityTier::Medium,
            _ => ComplexityTier::Long,
        }
    }
}

/// One dataset row. Field order is the column order of the output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
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
    pub word_count: usize,
    pub char_length: usize,
    pub avg_word_length: f64,
    pub unique_word_ratio: f64,
    pub has_punctuation: bool,
    pub has_numbers: bool,
    pub has_parentheses: bool,
    pub has_special_chars: bool,
    pub has_featuring: bool,
    pub has_version_tag: bool,
    pub has_non_ascii: bool,
    pub is_all_caps: bool,
    pub uppercase_ratio: f64,
    pub positive_word_count: usize,
    pub negative_word_count: usize,
    pub emotional_polarity: f64,
    pub common_word_ratio: f64,
    pub complexity_tier: ComplexityTier,
    pub title_length_group: String,
    pub popularity_category: String,
    pub duration_min: f64,
}

/// Row-level checks. The first failing rule is the one reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationRule {
    MissingTitle,
    NonPositiveDuration,
    PopularityOutOfRange,
    TooManyWords,
    DuplicateTrackId,
}

impl ValidationRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationRule::MissingTitle => "missing_title",
            ValidationRule::NonPositiveDuration => "non_positive_duration",
            ValidationRule::PopularityOutOfRange => "popularity_out_of_range",
            ValidationRule::TooManyWords => "too_many_words",
            ValidationRule::DuplicateTrackId => "duplicate_track_id",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureDerivation {
    pub rows: Vec<FeatureRow>,
    /// One [`DropReason::ValidationFailed`] record per rejected track.
    pub dropped: Vec<DroppedRecord>,
    /// Rejections keyed by rule name.
    pub rejections: BTreeMap<String, usize>,
}

/// Derive a row for every valid track, in input order.
pub fn derive(enriched: &[EnrichedTrack], lexicon: &Lexicon) -> FeatureDerivation {
    let results: Vec<Result<FeatureRow, ValidationRule>> = enriched
        .par_iter()
        .map(|track| derive_row(track, lexicon))
        .collect();

    let mut derivation = FeatureDerivation::default();
    let mut emitted: HashSet<&str> = HashSet::new();
    for (track, result) in enriched.iter().zip(results) {
        let result = result.and_then(|row| {
            if emitted.insert(track.track_id.as_str()) {
                Ok(row)
            } else {
                Err(ValidationRule::DuplicateTrackId)
            }
        });
        match result {
            Ok(row) => derivation.rows.push(row),
            Err(rule) => {
                *derivation
                    .rejections
                    .entry(rule.as_str().to_string())
                    .or_insert(0) += 1;
                derivation.dropped.push(DroppedRecord::new(
                    &track.track_id,
                    DropReason::ValidationFailed,
                    rule.as_str(),
                ));
            }
        }
    }
    derivation
}

pub fn validate(track: &EnrichedTrack, word_count: usize) -> Result<(), ValidationRule> {
    if track.title.trim().is_empty() {
        return Err(ValidationRule::MissingTitle);
    }
    if track.duration_ms <= 0 {
        return Err(ValidationRule::NonPositiveDuration);
    }
    if track.popularity > MAX_POPULARITY {
        return Err(ValidationRule::PopularityOutOfRange);
    }
    if word_count > MAX_WORD_COUNT {
        return Err(ValidationRule::TooManyWords);
    }
    Ok(())
}

pub fn derive_row(track: &EnrichedTrack, lexicon: &Lexicon) -> Result<FeatureRow, ValidationRule> {
    let title = track.title.as_str();
    let words: Vec<&str> = title.split_whitespace().collect();
    let word_count = words.len();
    validate(track, word_count)?;

    let char_length = title.chars().count();
    let letters = words.iter().map(|w| w.chars().count()).sum::<usize>();
    let unique_words = words
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<HashSet<_>>()
        .len();

    let upper = title.chars().filter(|c| c.is_uppercase()).count();
    let lower = title.chars().filter(|c| c.is_lowercase()).count();

    let tokens: Vec<String> = title.unicode_words().map(str::to_lowercase).collect();
    let positive_word_count = tokens.iter().filter(|t| lexicon.is_positive(t)).count();
    let negative_word_count = tokens.iter().filter(|t| lexicon.is_negative(t)).count();
    let common_words = tokens.iter().filter(|t| lexicon.is_common(t)).count();

    Ok(FeatureRow {
        track_id: track.track_id.clone(),
        title: track.title.clone(),
        duration_ms: track.duration_ms,
        explicit: track.explicit,
        release_year: track.release_year,
        popularity: track.popularity,
        preview_available: track.preview_available,
        artist_id: track.artist_id.clone(),
        genre: track.genre,
        artist_name: track.artist_name.clone(),
        artist_popularity: track.artist_popularity,
        artist_followers: track.artist_followers,
        artist_genre_count: track.artist_genre_count,
        word_count,
        char_length,
        avg_word_length: ratio(letters, word_count),
        unique_word_ratio: ratio(unique_words, word_count),
        has_punctuation: PUNCTUATION.is_match(title),
        has_numbers: title.chars().any(char::is_numeric),
        has_parentheses: PARENTHESES.is_match(title),
        has_special_chars: title
            .chars()
            .any(|c| !c.is_alphanumeric() && !c.is_whitespace()),
        has_featuring: FEATURING.is_match(title),
        has_version_tag: VERSION_TAG.is_match(title),
        has_non_ascii: !title.is_ascii(),
        is_all_caps: upper > 0 && lower == 0,
        uppercase_ratio: ratio(upper, upper + lower),
        positive_word_count,
        negative_word_count,
        emotional_polarity: if tokens.is_empty() {
            0.0
        } else {
            round4((positive_word_count as f64 - negative_word_count as f64) / tokens.len() as f64)
        },
        common_word_ratio: ratio(common_words, tokens.len()),
        complexity_tier: ComplexityTier::from_word_count(word_count),
        title_length_group: title_length_group(char_length).to_string(),
        popularity_category: popularity_category(track.popularity).to_string(),
        duration_min: round4(track.duration_ms as f64 / 60_000.0),
    })
}

pub fn title_length_group(char_length: usize) -> &'static str {
    match char_length {
        0..=20 => "Very Short",
        21..=40 => "Short",
        41..=60 => "Medium",
        _ => "Long",
    }
}

pub fn popularity_category(popularity: u32) -> &'static str {
    match popularity {
        0..=20 => "Very Low",
        21..=40 => "Low",
        41..=60 => "Medium",
        61..=80 => "High",
        _ => "Very High",
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        round4(numerator as f64 / denominator as f64)
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, title: &str) -> EnrichedTrack {
        EnrichedTrack {
            track_id: id.to_string(),
            title: title.to_string(),
            duration_ms: 210_000,
            explicit: false,
            release_year: Some(2023),
            popularity: 55,
            preview_available: true,
            artist_id: "artist".to_string(),
            genre: Genre::Rock,
            artist_name: "Artist".to_string(),
            artist_popularity: 70,
            artist_followers: 12_345,
            artist_genre_count: 2,
        }
    }

    fn lexicon() -> Lexicon {
        Lexicon::from_toml_str(
            "positive = [\"love\", \"sun\"]\nnegative = [\"sad\"]\ncommon = [\"the\", \"i\"]",
        )
        .unwrap()
    }

    #[test]
    fn test_complexity_tier_boundaries() {
        assert_eq!(ComplexityTier::from_word_count(1), ComplexityTier::Single);
        assert_eq!(ComplexityTier::from_word_count(2), ComplexityTier::Short);
        assert_eq!(ComplexityTier::from_word_count(3), ComplexityTier::Short);
        assert_eq!(ComplexityTier::from_word_count(4), ComplexityTier::Medium);
        assert_eq!(ComplexityTier::from_word_count(5), ComplexityTier::Medium);
        assert_eq!(ComplexityTier::from_word_count(6), ComplexityTier::Long);
        assert_eq!(ComplexityTier::from_word_count(0), ComplexityTier::Long);
    }

    #[test]
    fn test_basic_counts() {
        let row = derive_row(&track("t", "Here  Comes the Sun"), &lexicon()).unwrap();

        assert_eq!(row.word_count, 4);
        assert_eq!(row.char_length, 19);
        assert_eq!(row.avg_word_length, 3.75);
        assert_eq!(row.unique_word_ratio, 1.0);
        assert_eq!(row.complexity_tier, ComplexityTier::Medium);
        assert_eq!(row.title_length_group, "Very Short");
        assert_eq!(row.popularity_category, "Medium");
        assert_eq!(row.duration_min, 3.5);
        assert!(!row.has_punctuation);
        assert!(!row.has_numbers);
        assert!(!row.has_special_chars);
    }

    #[test]
    fn test_character_class_flags() {
        let lex = lexicon();

        let row = derive_row(&track("t", "Song 2 (Live) [feat. Someone]"), &lex).unwrap();
        assert!(row.has_numbers);
        assert!(row.has_parentheses);
        assert!(row.has_punctuation);
        assert!(row.has_special_chars);
        assert!(row.has_featuring);
        assert!(row.has_version_tag);
        assert!(!row.has_non_ascii);

        let row = derive_row(&track("t", "Café"), &lex).unwrap();
        assert!(row.has_non_ascii);
        assert!(!row.has_special_chars);

        let row = derive_row(&track("t", "Featherweight"), &lex).unwrap();
        assert!(!row.has_featuring);
    }

    #[test]
    fn test_case_features() {
        let lex = lexicon();

        let row = derive_row(&track("t", "HUMBLE."), &lex).unwrap();
        assert!(row.is_all_caps);
        assert_eq!(row.uppercase_ratio, 1.0);

        let row = derive_row(&track("t", "Yes No"), &lex).unwrap();
        assert!(!row.is_all_caps);
        assert_eq!(row.uppercase_ratio, 0.4);

        let row = derive_row(&track("t", "1999"), &lex).unwrap();
        assert!(!row.is_all_caps);
        assert_eq!(row.uppercase_ratio, 0.0);
    }

    #[test]
    fn test_lexicon_features() {
        let row = derive_row(&track("t", "I Love the Sad Sun"), &lexicon()).unwrap();

        assert_eq!(row.positive_word_count, 2);
        assert_eq!(row.negative_word_count, 1);
        assert_eq!(row.emotional_polarity, 0.2);
        assert_eq!(row.common_word_ratio, 0.4);
    }

    #[test]
    fn test_ratios_are_rounded() {
        let row = derive_row(&track("t", "a b b"), &lexicon()).unwrap();
        assert_eq!(row.unique_word_ratio, 0.6667);
    }

    #[test]
    fn test_group_boundaries() {
        assert_eq!(title_length_group(20), "Very Short");
        assert_eq!(title_length_group(21), "Short");
        assert_eq!(title_length_group(60), "Medium");
        assert_eq!(title_length_group(61), "Long");
        assert_eq!(popularity_category(0), "Very Low");
        assert_eq!(popularity_category(40), "Low");
        assert_eq!(popularity_category(80), "High");
        assert_eq!(popularity_category(81), "Very High");
    }

    #[test]
    fn test_validation_rejects_and_counts() {
        let mut no_title = track("a", "   ");
        no_title.popularity = 10;
        let mut zero_duration = track("b", "Fine");
        zero_duration.duration_ms = 0;
        let mut too_popular = track("c", "Fine");
        too_popular.popularity = 101;
        let wordy = track("d", &vec!["word"; 51].join(" "));
        let ok = track("e", "Fine");

        let derivation = derive(
            &[no_title, zero_duration, too_popular, wordy, ok.clone(), ok],
            &lexicon(),
        );

        assert_eq!(derivation.rows.len(), 1);
        assert_eq!(derivation.rows[0].track_id, "e");
        assert_eq!(derivation.dropped.len(), 5);
        assert!(derivation
            .dropped
            .iter()
            .all(|d| d.reason == DropReason::ValidationFailed));
        for rule in [
            "missing_title",
            "non_positive_duration",
            "popularity_out_of_range",
            "too_many_words",
            "duplicate_track_id",
        ] {
            assert_eq!(derivation.rejections.get(rule), Some(&1), "{}", rule);
        }
    }

    #[test]
    fn test_derive_is_deterministic_and_ordered() {
        let tracks: Vec<EnrichedTrack> = (0..200)
            .map(|i| track(&format!("t{}", i), &format!("Title Number {} (Remix)", i)))
            .collect();

        let first = derive(&tracks, &lexicon());
        let second = derive(&tracks, &lexicon());

        assert_eq!(first, second);
        let ids: Vec<String> = first.rows.iter().map(|r| r.track_id.clone()).collect();
        let expected: Vec<String> = tracks.iter().map(|t| t.track_id.clone()).collect();
        assert_eq!(ids, expected);
    }
}
