//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{ChapterRecord, RecordKind, RunRecord, RunStatus};
use crate::ShioriError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

const RECORD_COLUMNS: &str =
    "url, kind, output_file_name, book, volume, failed, next_url, saved_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(ShioriError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, ShioriError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, ShioriError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get(0)?,
            started_at: row.get(1)?,
            finished_at: row.get(2)?,
            config_hash: row.get(3)?,
            status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                .unwrap_or(RunStatus::Running),
        })
    }

    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(ChapterRecord, String)> {
        let kind: String = row.get(1)?;
        let record = ChapterRecord {
            url: row.get(0)?,
            kind: RecordKind::from_db_string(&kind).unwrap_or(RecordKind::Chapter),
            output_file_name: row.get(2)?,
            book: row.get(3)?,
            volume: row.get(4)?,
            failed: row.get(5)?,
            next_url: row.get(6)?,
            saved_at: row.get(7)?,
        };
        Ok((record, kind))
    }
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                Self::run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                Self::run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let finished_at = match status {
            RunStatus::Running => None,
            _ => Some(Utc::now().to_rfc3339()),
        };

        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), finished_at, run_id],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Completion Records =====

    fn find_record(&self, url: &str) -> StorageResult<Option<ChapterRecord>> {
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM chapter_records WHERE url = ?1",
                    RECORD_COLUMNS
                ),
                params![url],
                Self::record_from_row,
            )
            .optional()?;

        match found {
            Some((record, kind)) if RecordKind::from_db_string(&kind).is_none() => {
                Err(StorageError::Corrupt {
                    url: record.url,
                    message: format!("unknown record kind '{}'", kind),
                })
            }
            Some((record, _)) => Ok(Some(record)),
            None => Ok(None),
        }
    }

    fn upsert_record(&mut self, record: &ChapterRecord) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO chapter_records (url, kind, output_file_name, book, volume, failed, next_url, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(url) DO UPDATE SET
                kind = excluded.kind,
                output_file_name = excluded.output_file_name,
                book = excluded.book,
                volume = excluded.volume,
                failed = excluded.failed,
                next_url = excluded.next_url,
                saved_at = excluded.saved_at",
            params![
                record.url,
                record.kind.to_db_string(),
                record.output_file_name,
                record.book,
                record.volume,
                record.failed,
                record.next_url,
                record.saved_at,
            ],
        )?;
        Ok(())
    }

    fn mark_failed(&mut self, url: &str, failed: bool) -> StorageResult<bool> {
        let updated = self.conn.execute(
            "UPDATE chapter_records SET failed = ?1 WHERE url = ?2",
            params![failed, url],
        )?;
        Ok(updated > 0)
    }

    // ===== Statistics =====

    fn count_records(&self, kind: RecordKind) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chapter_records WHERE kind = ?1",
            params![kind.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_failed(&self, kind: RecordKind) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chapter_records WHERE kind = ?1 AND failed = 1",
            params![kind.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_records_by_book(&self) -> StorageResult<HashMap<String, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT book, COUNT(*) FROM chapter_records WHERE kind = ?1 GROUP BY book",
        )?;

        let rows = stmt.query_map(params![RecordKind::Chapter.to_db_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (book, count) = row?;
            counts.insert(book, count as u64);
        }
        Ok(counts)
    }

    fn get_failed_urls(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM chapter_records WHERE failed = 1 ORDER BY saved_at")?;

        let urls = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(urls)
    }
}
