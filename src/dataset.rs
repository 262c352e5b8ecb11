//! The output dataset: one CSV row per [`FeatureRow`], fixed column order.

use crate::pipeline::FeatureRow;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Column order of the dataset file. Downstream consumers rely on it.
pub const FEATURE_COLUMNS: &[&str] = &[
    "track_id",
    "title",
    "duration_ms",
    "explicit",
    "release_year",
    "popularity",
    "preview_available",
    "artist_id",
    "genre",
    "artist_name",
    "artist_popularity",
    "artist_followers",
    "artist_genre_count",
    "word_count",
    "char_length",
    "avg_word_length",
    "unique_word_ratio",
    "has_punctuation",
    "has_numbers",
    "has_parentheses",
    "has_special_chars",
    "has_featuring",
    "has_version_tag",
    "has_non_ascii",
    "is_all_caps",
    "uppercase_ratio",
    "positive_word_count",
    "negative_word_count",
    "emotional_polarity",
    "common_word_ratio",
    "complexity_tier",
    "title_length_group",
    "popularity_category",
    "duration_min",
];

pub fn dataset_file_name(run_id: &str, created: DateTime<Utc>) -> String {
    format!(
        "title_dataset_{}_{}.csv",
        run_id,
        created.format("%Y%m%d_%H%M%S")
    )
}

/// `title_dataset_x.csv` -> `title_dataset_x_summary.json`, same directory.
pub fn summary_path(dataset_path: &Path) -> PathBuf {
    let stem = dataset_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "title_dataset".to_string());
    dataset_path.with_file_name(format!("{}_summary.json", stem))
}

/// Serialize `rows` with a header line into `writer`.
pub fn write_rows<W: Write>(writer: W, rows: &[FeatureRow]) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv_writer
        .write_record(FEATURE_COLUMNS)
        .context("Failed to write dataset header")?;
    for row in rows {
        csv_writer
            .serialize(row)
            .with_context(|| format!("Failed to write row for track {}", row.track_id))?;
    }
    csv_writer.flush().context("Failed to flush dataset")?;
    Ok(())
}

/// Write the dataset under `dir` and return its path.
pub fn write_dataset(
    dir: &Path,
    run_id: &str,
    rows: &[FeatureRow],
    created: DateTime<Utc>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create dataset directory {:?}", dir))?;
    let path = dir.join(dataset_file_name(run_id, created));
    let file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create dataset file {:?}", path))?;
    write_rows(std::io::BufWriter::new(file), rows)?;
    Ok(path)
}

pub fn read_dataset(path: &Path) -> Result<Vec<FeatureRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open dataset {:?}", path))?;
    let headers = reader.headers().context("Failed to read dataset header")?;
    if headers.iter().ne(FEATURE_COLUMNS.iter().copied()) {
        anyhow::bail!("Unexpected dataset columns in {:?}", path);
    }
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<FeatureRow>, _>>()
        .with_context(|| format!("Failed to parse dataset {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnrichedTrack, Genre};
    use crate::pipeline::{derive, Lexicon};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn rows() -> Vec<FeatureRow> {
        let track = EnrichedTrack {
            track_id: "t1".into(),
            title: "Hello, \"World\"".into(),
            duration_ms: 200_000,
            explicit: true,
            release_year: None,
            popularity: 42,
            preview_available: false,
            artist_id: "a1".into(),
            genre: Genre::HipHop,
            artist_name: "Someone".into(),
            artist_popularity: 80,
            artist_followers: 99,
            artist_genre_count: 3,
        };
        derive(&[track], &Lexicon::bundled().unwrap()).rows
    }

    #[test]
    fn test_serialized_header_matches_columns() {
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.serialize(&rows()[0]).unwrap();
        let bytes = writer.into_inner().unwrap();
        let content = String::from_utf8(bytes).unwrap();
        let header = content.lines().next().unwrap();

        assert_eq!(header, FEATURE_COLUMNS.join(","));
    }

    #[test]
    fn test_file_name_format() {
        let created = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let name = dataset_file_name("abc", created);
        assert_eq!(name, "title_dataset_abc_20240309_140507.csv");
        assert_eq!(
            summary_path(Path::new("/d/title_dataset_abc_20240309_140507.csv")),
            PathBuf::from("/d/title_dataset_abc_20240309_140507_summary.json")
        );
    }

    #[test]
    fn test_write_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let rows = rows();

        let path = write_dataset(temp_dir.path(), "run", &rows, Utc::now()).unwrap();
        let read = read_dataset(&path).unwrap();

        assert_eq!(read, rows);
        assert_eq!(read[0].genre, Genre::HipHop);
        assert_eq!(read[0].release_year, None);
    }

    #[test]
    fn test_empty_dataset_still_has_header() {
        let mut out = Vec::new();
        write_rows(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim_end(), FEATURE_COLUMNS.join(","));
    }
}
