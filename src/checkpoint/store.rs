use super::schema::CHECKPOINT_VERSIONED_SCHEMAS;
use super::{CheckpointStore, RunRecord, RunStatus};
use crate::models::{
    ArtistRecord, CandidateTrack, DropReason, DroppedRecord, EnrichedTrack, Genre, Phase,
};
use crate::sqlite_persistence::open_versioned;
use crate::telemetry::{GenreOutcome, GenreStop};
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// SQLite-backed checkpoint store. One database holds many runs.
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// Opens an existing database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let fresh = !db_path.exists();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open checkpoint database {:?}", db_path))?;
        open_versioned(&conn, CHECKPOINT_VERSIONED_SCHEMAS, fresh)?;
        if fresh {
            info!("Created new checkpoint database at {:?}", db_path);
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        open_versioned(&conn, CHECKPOINT_VERSIONED_SCHEMAS, true)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Checkpoint connection lock poisoned"))
    }

    fn row_to_run(row: &Row) -> rusqlite::Result<RunRecord> {
        let status: String = row.get("status")?;
        let completed_phase: Option<String> = row.get("completed_phase")?;
        let genres: String = row.get("genres")?;
        Ok(RunRecord {
            run_id: row.get("run_id")?,
            created_at: row.get("created_at")?,
            status: RunStatus::from_str(&status).unwrap_or(RunStatus::Failed),
            completed_phase: completed_phase.as_deref().and_then(Phase::from_str),
            target_per_genre: row.get::<_, i64>("target_per_genre")? as usize,
            genres: genres.split(',').filter_map(Genre::from_str).collect(),
            dataset_path: row.get("dataset_path")?,
        })
    }

    fn row_to_enriched(row: &Row) -> rusqlite::Result<EnrichedTrack> {
        let genre: String = row.get("genre")?;
        Ok(EnrichedTrack {
            track_id: row.get("track_id")?,
            title: row.get("title")?,
            duration_ms: row.get("duration_ms")?,
            explicit: row.get("explicit")?,
            release_year: row.get("release_year")?,
            popularity: row.get("popularity")?,
            preview_available: row.get("preview_available")?,
            artist_id: row.get("artist_id")?,
            genre: parse_genre(&genre, 9)?,
            artist_name: row.get("artist_name")?,
            artist_popularity: row.get("artist_popularity")?,
            artist_followers: row.get::<_, i64>("artist_followers")? as u64,
            artist_genre_count: row.get("artist_genre_count")?,
        })
    }

    fn insert_candidates(
        conn: &Connection,
        run_id: &str,
        candidates: &[CandidateTrack],
    ) -> Result<()> {
        let mut insert = conn.prepare(
            "INSERT OR IGNORE INTO candidates (run_id, track_id, genre, artist_id, discovered_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for candidate in candidates {
            insert.execute(params![
                run_id,
                candidate.track_id,
                candidate.genre.as_str(),
                candidate.artist_id,
                candidate.discovered_at,
            ])?;
        }
        Ok(())
    }

    fn touch(conn: &Connection, run_id: &str) -> Result<()> {
        conn.execute(
            "UPDATE runs SET updated_at = ?2 WHERE run_id = ?1",
            params![run_id, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

fn parse_genre(s: &str, column: usize) -> rusqlite::Result<Genre> {
    Genre::from_str(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            format!("unknown genre '{}'", s).into(),
        )
    })
}

impl CheckpointStore for SqliteCheckpointStore {
    fn create_run(&self, run: &RunRecord) -> Result<()> {
        let conn = self.lock()?;
        let genres: Vec<&str> = run.genres.iter().map(Genre::as_str).collect();
        conn.execute(
            "INSERT INTO runs (run_id, created_at, updated_at, status, completed_phase, target_per_genre, genres, dataset_path) \
             VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.run_id,
                run.created_at,
                run.status.as_str(),
                run.completed_phase.map(|p| p.as_str()),
                run.target_per_genre as i64,
                genres.join(","),
                run.dataset_path,
            ],
        )
        .with_context(|| format!("Failed to create run {}", run.run_id))?;
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let conn = self.lock()?;
        let run = conn
            .query_row(
                "SELECT * FROM runs WHERE run_id = ?1",
                params![run_id],
                Self::row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM runs ORDER BY created_at DESC, rowid DESC")?;
        let runs = stmt
            .query_map([], Self::row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn mark_phase_completed(&self, run_id: &str, phase: Phase) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET completed_phase = ?2 WHERE run_id = ?1",
            params![run_id, phase.as_str()],
        )?;
        Self::touch(&conn, run_id)
    }

    fn set_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET status = ?2 WHERE run_id = ?1",
            params![run_id, status.as_str()],
        )?;
        Self::touch(&conn, run_id)
    }

    fn set_dataset_path(&self, run_id: &str, path: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET dataset_path = ?2 WHERE run_id = ?1",
            params![run_id, path],
        )?;
        Self::touch(&conn, run_id)
    }

    fn delete_run(&self, run_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM runs WHERE run_id = ?1", params![run_id])?;
        Ok(deleted > 0)
    }

    fn save_genre(
        &self,
        run_id: &str,
        outcome: &GenreOutcome,
        candidates: &[CandidateTrack],
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        Self::insert_candidates(&tx, run_id, candidates)?;
        tx.execute(
            "INSERT OR REPLACE INTO genre_progress (run_id, genre, target, accepted, stop) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                outcome.genre.as_str(),
                outcome.target as i64,
                outcome.accepted as i64,
                outcome.stop.as_str(),
            ],
        )?;
        tx.commit()
            .with_context(|| format!("Failed to checkpoint genre {}", outcome.genre))?;
        Self::touch(&conn, run_id)
    }

    fn save_candidates(&self, run_id: &str, candidates: &[CandidateTrack]) -> Result<()> {
        if candidates.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        Self::insert_candidates(&tx, run_id, candidates)?;
        tx.commit()
            .with_context(|| format!("Failed to checkpoint candidates of run {}", run_id))?;
        Self::touch(&conn, run_id)
    }

    fn completed_genres(&self, run_id: &str) -> Result<Vec<GenreOutcome>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT genre, target, accepted, stop FROM genre_progress WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let outcomes = stmt
            .query_map(params![run_id], |row| {
                let genre: String = row.get(0)?;
                let stop: String = row.get(3)?;
                Ok(GenreOutcome {
                    genre: parse_genre(&genre, 0)?,
                    target: row.get::<_, i64>(1)? as usize,
                    accepted: row.get::<_, i64>(2)? as usize,
                    stop: GenreStop::from_str(&stop).unwrap_or(GenreStop::QueriesExhausted),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(outcomes)
    }

    fn load_candidates(&self, run_id: &str) -> Result<Vec<CandidateTrack>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT track_id, genre, artist_id, discovered_at FROM candidates \
             WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let candidates = stmt
            .query_map(params![run_id], |row| {
                let genre: String = row.get(1)?;
                Ok(CandidateTrack {
                    track_id: row.get(0)?,
                    genre: parse_genre(&genre, 1)?,
                    artist_id: row.get(2)?,
                    discovered_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(candidates)
    }

    fn save_enrichment(
        &self,
        run_id: &str,
        enriched: &[EnrichedTrack],
        artists: &[ArtistRecord],
        dropped: &[DroppedRecord],
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut insert_artist = tx.prepare(
                "INSERT OR IGNORE INTO artists (run_id, artist_id, name, popularity, follower_count, genres) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for artist in artists {
                insert_artist.execute(params![
                    run_id,
                    artist.artist_id,
                    artist.name,
                    artist.popularity,
                    artist.follower_count as i64,
                    serde_json::to_string(&artist.genres)?,
                ])?;
            }

            let mut insert_track = tx.prepare(
                "INSERT OR IGNORE INTO enriched_tracks (run_id, track_id, title, duration_ms, explicit, \
                 release_year, popularity, preview_available, artist_id, genre, artist_name, \
                 artist_popularity, artist_followers, artist_genre_count) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for track in enriched {
                insert_track.execute(params![
                    run_id,
                    track.track_id,
                    track.title,
                    track.duration_ms,
                    track.explicit,
                    track.release_year,
                    track.popularity,
                    track.preview_available,
                    track.artist_id,
                    track.genre.as_str(),
                    track.artist_name,
                    track.artist_popularity,
                    track.artist_followers as i64,
                    track.artist_genre_count,
                ])?;
            }

            // A track enriched on a later attempt is no longer a failure
            let mut clear_failure = tx.prepare(
                "DELETE FROM dropped_records WHERE run_id = ?1 AND track_id = ?2 AND reason = ?3",
            )?;
            for track in enriched {
                clear_failure.execute(params![
                    run_id,
                    track.track_id,
                    DropReason::DetailFetchFailed.as_str(),
                ])?;
            }

            let mut insert_drop = tx.prepare(
                "INSERT OR IGNORE INTO dropped_records (run_id, track_id, reason, detail) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for record in dropped {
                insert_drop.execute(params![
                    run_id,
                    record.track_id,
                    record.reason.as_str(),
                    record.detail,
                ])?;
            }
        }
        tx.commit().context("Failed to checkpoint enrichment progress")?;
        Self::touch(&conn, run_id)
    }

    fn load_enriched(&self, run_id: &str) -> Result<Vec<EnrichedTrack>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT * FROM enriched_tracks WHERE run_id = ?1 ORDER BY rowid")?;
        let tracks = stmt
            .query_map(params![run_id], Self::row_to_enriched)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    fn load_artists(&self, run_id: &str) -> Result<Vec<ArtistRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT artist_id, name, popularity, follower_count, genres FROM artists \
             WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(artist_id, name, popularity, followers, genres)| {
                let genres: Vec<String> = serde_json::from_str(&genres)
                    .with_context(|| format!("Corrupt genre list for artist {}", artist_id))?;
                Ok(ArtistRecord {
                    artist_id,
                    name,
                    popularity,
                    follower_count: followers as u64,
                    genres,
                })
            })
            .collect()
    }

    fn load_dropped(&self, run_id: &str) -> Result<Vec<DroppedRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT track_id, reason, detail FROM dropped_records WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let records = stmt
            .query_map(params![run_id], |row| {
                let reason: String = row.get(1)?;
                Ok((row.get::<_, String>(0)?, reason, row.get::<_, String>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records
            .into_iter()
            .filter_map(|(track_id, reason, detail)| {
                DropReason::from_str(&reason).map(|reason| DroppedRecord {
                    track_id,
                    reason,
                    detail,
                })
            })
            .collect())
    }

    fn replace_validation_drops(&self, run_id: &str, dropped: &[DroppedRecord]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM dropped_records WHERE run_id = ?1 AND reason = ?2",
            params![run_id, DropReason::ValidationFailed.as_str()],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO dropped_records (run_id, track_id, reason, detail) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for record in dropped {
                insert.execute(params![
                    run_id,
                    record.track_id,
                    record.reason.as_str(),
                    record.detail,
                ])?;
            }
        }
        tx.commit().context("Failed to store validation drops")?;
        Ok(())
    }
}
