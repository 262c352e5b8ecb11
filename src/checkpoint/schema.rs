//! Database schema for checkpoints.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    ForeignKey, OnDelete, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

const RUN_FK: ForeignKey = ForeignKey {
    foreign_table: "runs",
    foreign_column: "run_id",
    on_delete: OnDelete::Cascade,
};

const RUNS_TABLE_V0: Table = Table {
    name: "runs",
    columns: &[
        sqlite_column!("run_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("updated_at", &SqlType::Integer),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        // Last phase whose output is fully persisted
        sqlite_column!("completed_phase", &SqlType::Text),
        sqlite_column!("target_per_genre", &SqlType::Integer, non_null = true),
        // Comma separated bucket names, in collection order
        sqlite_column!("genres", &SqlType::Text, non_null = true),
        sqlite_column!("dataset_path", &SqlType::Text),
    ],
    indices: &[("idx_runs_created", "created_at")],
    unique_constraints: &[],
};

const GENRE_PROGRESS_TABLE_V0: Table = Table {
    name: "genre_progress",
    columns: &[
        sqlite_column!(
            "run_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&RUN_FK)
        ),
        sqlite_column!("genre", &SqlType::Text, non_null = true),
        sqlite_column!("target", &SqlType::Integer, non_null = true),
        sqlite_column!("accepted", &SqlType::Integer, non_null = true),
        sqlite_column!("stop", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["run_id", "genre"]],
};

const CANDIDATES_TABLE_V0: Table = Table {
    name: "candidates",
    columns: &[
        sqlite_column!(
            "run_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&RUN_FK)
        ),
        sqlite_column!("track_id", &SqlType::Text, non_null = true),
        sqlite_column!("genre", &SqlType::Text, non_null = true),
        sqlite_column!("artist_id", &SqlType::Text, non_null = true),
        sqlite_column!("discovered_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_candidates_genre", "run_id, genre")],
    unique_constraints: &[&["run_id", "track_id"]],
};

const ARTISTS_TABLE_V0: Table = Table {
    name: "artists",
    columns: &[
        sqlite_column!(
            "run_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&RUN_FK)
        ),
        sqlite_column!("artist_id", &SqlType::Text, non_null = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("popularity", &SqlType::Integer, non_null = true),
        sqlite_column!("follower_count", &SqlType::Integer, non_null = true),
        // JSON array
        sqlite_column!("genres", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["run_id", "artist_id"]],
};

const ENRICHED_TRACKS_TABLE_V0: Table = Table {
    name: "enriched_tracks",
    columns: &[
        sqlite_column!(
            "run_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&RUN_FK)
        ),
        sqlite_column!("track_id", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("duration_ms", &SqlType::Integer, non_null = true),
        sqlite_column!("explicit", &SqlType::Integer, non_null = true),
        sqlite_column!("release_year", &SqlType::Integer),
        sqlite_column!("popularity", &SqlType::Integer, non_null = true),
        sqlite_column!("preview_available", &SqlType::Integer, non_null = true),
        sqlite_column!("artist_id", &SqlType::Text, non_null = true),
        sqlite_column!("genre", &SqlType::Text, non_null = true),
        sqlite_column!("artist_name", &SqlType::Text, non_null = true),
        sqlite_column!("artist_popularity", &SqlType::Integer, non_null = true),
        sqlite_column!("artist_followers", &SqlType::Integer, non_null = true),
        sqlite_column!("artist_genre_count", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["run_id", "track_id"]],
};

const DROPPED_RECORDS_TABLE_V0: Table = Table {
    name: "dropped_records",
    columns: &[
        sqlite_column!(
            "run_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&RUN_FK)
        ),
        sqlite_column!("track_id", &SqlType::Text, non_null = true),
        sqlite_column!("reason", &SqlType::Text, non_null = true),
        sqlite_column!("detail", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_dropped_reason", "run_id, reason")],
    unique_constraints: &[&["run_id", "track_id", "reason"]],
};

pub const CHECKPOINT_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        RUNS_TABLE_V0,
        GENRE_PROGRESS_TABLE_V0,
        CANDIDATES_TABLE_V0,
        ARTISTS_TABLE_V0,
        ENRICHED_TRACKS_TABLE_V0,
        DROPPED_RECORDS_TABLE_V0,
    ],
    migration: None,
}];
