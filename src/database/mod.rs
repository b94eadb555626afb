pub mod models;

#[cfg(test)]
mod tests;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use models::*;

/// How many segments are inserted per prepared-statement batch inside the
/// save transaction. Bounds statement churn for transcripts with thousands
/// of segments.
const SEGMENT_BATCH_SIZE: usize = 100;

/// Result of looking up an existing transcript row during a save.
enum TranscriptLookup {
    Found(i64),
    NotFound,
}

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA cache_size=10000;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS media_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL,
                language TEXT NOT NULL DEFAULT 'auto',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS transcripts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'pending',
                raw_text TEXT NOT NULL DEFAULT '',
                language TEXT NOT NULL DEFAULT 'auto',
                duration_seconds REAL,
                error TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (file_id) REFERENCES media_files(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_transcripts_file ON transcripts(file_id);
            CREATE INDEX IF NOT EXISTS idx_transcripts_status ON transcripts(status);

            CREATE TABLE IF NOT EXISTS segments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transcript_id INTEGER NOT NULL,
                start_time REAL NOT NULL,
                end_time REAL NOT NULL,
                text TEXT NOT NULL,
                normalized_text TEXT,
                translation TEXT,
                annotations TEXT,
                phonetic_reading TEXT,
                word_timestamps TEXT,
                FOREIGN KEY (transcript_id) REFERENCES transcripts(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_segments_transcript
                ON segments(transcript_id, start_time);

            -- App settings (key-value store)
            CREATE TABLE IF NOT EXISTS app_settings (
                key TEXT PRIMARY KEY,
                value TEXT,
                updated_at TEXT DEFAULT (datetime('now'))
            );

            -- Insert default settings
            INSERT OR IGNORE INTO app_settings (key, value) VALUES
                ('target_language', 'en'),
                ('enable_annotations', 'true'),
                ('enable_phonetic_reading', 'true');
        "#,
        )?;

        Ok(())
    }

    // =========================================================================
    // Media files
    // =========================================================================

    pub fn register_media(&self, path: &str, language: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO media_files (path, language, created_at) VALUES (?, ?, ?)",
            params![path, language, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_media_file(&self, id: i64) -> Result<Option<MediaFile>> {
        let conn = self.conn.lock().unwrap();
        let file = conn
            .query_row(
                "SELECT id, path, language, created_at FROM media_files WHERE id = ?",
                params![id],
                |row| {
                    Ok(MediaFile {
                        id: row.get(0)?,
                        path: row.get(1)?,
                        language: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(file)
    }

    pub fn delete_media(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM media_files WHERE id = ?", params![id])?;
        Ok(())
    }

    // =========================================================================
    // Transcript status transitions
    // =========================================================================

    /// Mark the transcript row for a file as processing, creating the row if
    /// this is the file's first transcription attempt.
    pub fn mark_transcript_processing(&self, file_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO transcripts (file_id, status, created_at, updated_at)
             VALUES (?1, 'processing', ?2, ?2)
             ON CONFLICT(file_id) DO UPDATE SET
                status = 'processing',
                error = NULL,
                updated_at = ?2",
            params![file_id, now],
        )?;
        Ok(())
    }

    pub fn mark_transcript_failed(&self, file_id: i64, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO transcripts (file_id, status, error, created_at, updated_at)
             VALUES (?1, 'failed', ?2, ?3, ?3)
             ON CONFLICT(file_id) DO UPDATE SET
                status = 'failed',
                error = ?2,
                updated_at = ?3",
            params![file_id, error, now],
        )?;
        Ok(())
    }

    /// Revert a file's transcript row to pending. Used when a job is
    /// cancelled so a later retry is indistinguishable from a fresh attempt.
    pub fn reset_transcript_pending(&self, file_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE transcripts SET status = 'pending', error = NULL, updated_at = ?
             WHERE file_id = ?",
            params![now, file_id],
        )?;
        Ok(())
    }

    /// Reset any transcripts left in 'processing' by a previous run
    /// (crash recovery at startup).
    pub fn reset_stuck_processing(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let count = conn.execute(
            "UPDATE transcripts SET status = 'pending', updated_at = ?
             WHERE status = 'processing'",
            params![now],
        )?;
        if count > 0 {
            log::info!("Reset {} stuck processing transcripts to pending", count);
        }
        Ok(count)
    }

    // =========================================================================
    // Transcript / segment queries
    // =========================================================================

    pub fn get_transcript_for_file(&self, file_id: i64) -> Result<Option<Transcript>> {
        let conn = self.conn.lock().unwrap();
        let transcript = conn
            .query_row(
                "SELECT id, file_id, status, raw_text, language, duration_seconds,
                        error, created_at, updated_at
                 FROM transcripts WHERE file_id = ?",
                params![file_id],
                |row| {
                    Ok(Transcript {
                        id: row.get(0)?,
                        file_id: row.get(1)?,
                        status: row.get::<_, String>(2)?.into(),
                        raw_text: row.get(3)?,
                        language: row.get(4)?,
                        duration_seconds: row.get(5)?,
                        error: row.get(6)?,
                        created_at: row.get(7)?,
                        updated_at: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(transcript)
    }

    /// All segments of a transcript, ordered by start time.
    pub fn get_segments(&self, transcript_id: i64) -> Result<Vec<Segment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, transcript_id, start_time, end_time, text, normalized_text,
                    translation, annotations, phonetic_reading, word_timestamps
             FROM segments WHERE transcript_id = ?
             ORDER BY start_time ASC",
        )?;
        let segments = stmt
            .query_map(params![transcript_id], |row| {
                Ok(Segment {
                    id: row.get(0)?,
                    transcript_id: row.get(1)?,
                    start_time: row.get(2)?,
                    end_time: row.get(3)?,
                    text: row.get(4)?,
                    normalized_text: row.get(5)?,
                    translation: row.get(6)?,
                    annotations: parse_json_column(row.get::<_, Option<String>>(7)?),
                    phonetic_reading: row.get(8)?,
                    word_timestamps: parse_json_column(row.get::<_, Option<String>>(9)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(segments)
    }

    pub fn count_segments(&self, transcript_id: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM segments WHERE transcript_id = ?",
            params![transcript_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // =========================================================================
    // Transactional save
    // =========================================================================

    /// Persist a transcription result as one atomic transaction spanning the
    /// transcript row and all of its segments.
    ///
    /// An existing transcript for the file is updated in place and its prior
    /// segments deleted, so stale segments never coexist with the new record.
    /// Segment inserts run in batches of `SEGMENT_BATCH_SIZE` through one
    /// prepared statement.
    pub fn save_transcription_result(
        &self,
        file_id: i64,
        result: &TranscriptionResult,
    ) -> Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();

        let lookup = tx
            .query_row(
                "SELECT id FROM transcripts WHERE file_id = ?",
                params![file_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map_or(TranscriptLookup::NotFound, TranscriptLookup::Found);

        let transcript_id = match lookup {
            TranscriptLookup::Found(id) => {
                tx.execute(
                    "UPDATE transcripts SET
                        status = 'completed',
                        raw_text = ?,
                        language = ?,
                        duration_seconds = ?,
                        error = NULL,
                        updated_at = ?
                     WHERE id = ?",
                    params![
                        result.raw_text,
                        result.language,
                        result.duration_seconds,
                        now,
                        id
                    ],
                )?;
                tx.execute("DELETE FROM segments WHERE transcript_id = ?", params![id])?;
                id
            }
            TranscriptLookup::NotFound => {
                tx.execute(
                    "INSERT INTO transcripts
                        (file_id, status, raw_text, language, duration_seconds, created_at, updated_at)
                     VALUES (?1, 'completed', ?2, ?3, ?4, ?5, ?5)",
                    params![
                        file_id,
                        result.raw_text,
                        result.language,
                        result.duration_seconds,
                        now
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        {
            let mut stmt = tx.prepare(
                "INSERT INTO segments
                    (transcript_id, start_time, end_time, text, word_timestamps)
                 VALUES (?, ?, ?, ?, ?)",
            )?;
            for batch in result.segments.chunks(SEGMENT_BATCH_SIZE) {
                for segment in batch {
                    let words_json = segment
                        .word_timestamps
                        .as_ref()
                        .map(|words| serde_json::to_string(words))
                        .transpose()?;
                    stmt.execute(params![
                        transcript_id,
                        segment.start_time,
                        segment.end_time,
                        segment.text,
                        words_json,
                    ])?;
                }
            }
        }

        tx.commit()?;
        Ok(transcript_id)
    }

    /// Best-effort cleanup of half-written rows for a file, run outside a
    /// failed save transaction. Leaves nothing behind; the caller re-creates
    /// the transcript row in 'failed' status afterwards.
    pub fn cleanup_partial(&self, file_id: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM segments WHERE transcript_id IN
                (SELECT id FROM transcripts WHERE file_id = ?1 AND status != 'completed')",
            params![file_id],
        )?;
        conn.execute(
            "DELETE FROM transcripts WHERE file_id = ?1 AND status != 'completed'",
            params![file_id],
        )?;
        Ok(removed)
    }

    // =========================================================================
    // Enrichment updates
    // =========================================================================

    /// Apply post-processing enrichment to stored segments, matched by exact
    /// (start_time, end_time) equality. Only provided fields are touched;
    /// segments are never inserted or deleted here. Returns how many updates
    /// matched a stored segment.
    pub fn apply_enrichment(&self, transcript_id: i64, updates: &[SegmentUpdate]) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "UPDATE segments SET
                normalized_text = COALESCE(?4, normalized_text),
                translation = COALESCE(?5, translation),
                annotations = COALESCE(?6, annotations),
                phonetic_reading = COALESCE(?7, phonetic_reading)
             WHERE transcript_id = ?1 AND start_time = ?2 AND end_time = ?3",
        )?;

        let mut matched = 0;
        for update in updates {
            let annotations_json = update
                .annotations
                .as_ref()
                .map(|notes| serde_json::to_string(notes))
                .transpose()?;
            let changed = stmt.execute(params![
                transcript_id,
                update.start_time,
                update.end_time,
                update.normalized_text,
                update.translation,
                annotations_json,
                update.phonetic_reading,
            ])?;
            if changed > 0 {
                matched += 1;
            } else {
                log::warn!(
                    "Enrichment update [{:.3}, {:.3}] matched no segment of transcript {}",
                    update.start_time,
                    update.end_time,
                    transcript_id
                );
            }
        }
        Ok(matched)
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub fn get_stats(&self) -> Result<EngineStats> {
        let conn = self.conn.lock().unwrap();

        let total_files: i64 =
            conn.query_row("SELECT COUNT(*) FROM media_files", [], |row| row.get(0))?;
        let completed_transcripts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transcripts WHERE status = 'completed'",
            [],
            |row| row.get(0),
        )?;
        let failed_transcripts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transcripts WHERE status = 'failed'",
            [],
            |row| row.get(0),
        )?;
        let processing_transcripts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transcripts WHERE status = 'processing'",
            [],
            |row| row.get(0),
        )?;
        let total_segments: i64 =
            conn.query_row("SELECT COUNT(*) FROM segments", [], |row| row.get(0))?;

        Ok(EngineStats {
            total_files,
            completed_transcripts,
            failed_transcripts,
            processing_transcripts,
            total_segments,
        })
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT value FROM app_settings WHERE key = ?",
            params![key],
            |row| row.get(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR REPLACE INTO app_settings (key, value, updated_at) VALUES (?, ?, ?)",
            params![key, value, now],
        )?;
        Ok(())
    }
}

/// Deserialize an optional JSON text column, tolerating rows written before
/// the column was populated.
fn parse_json_column<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}
