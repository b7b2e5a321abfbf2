//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Completion records consulted by the idempotency gate
//! - Run tracking for statistics and interrupted-run reporting

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::ShioriError;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Storage handle shared between chapter workflows and asset workers
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Opens (or creates) the record database and wraps it for sharing
pub fn open_storage(path: &Path) -> Result<SharedStorage, ShioriError> {
    Ok(Arc::new(Mutex::new(SqliteStorage::new(path)?)))
}

/// Runs `f` with the storage lock held
///
/// The lock is never held across an await; callers pass synchronous closures.
pub fn with_storage<T>(
    storage: &SharedStorage,
    f: impl FnOnce(&mut SqliteStorage) -> StorageResult<T>,
) -> StorageResult<T> {
    let mut guard = storage.lock().map_err(|_| StorageError::Poisoned)?;
    f(&mut *guard)
}

/// What a completion record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Chapter,
    Asset,
}

impl RecordKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Chapter => "chapter",
            Self::Asset => "asset",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "chapter" => Some(Self::Chapter),
            "asset" => Some(Self::Asset),
            _ => None,
        }
    }
}

/// A persisted completion record, keyed by canonical source URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterRecord {
    /// Canonical source URL
    pub url: String,
    pub kind: RecordKind,
    /// File name relative to the chapter's (or asset's) output directory
    pub output_file_name: String,
    pub book: String,
    pub volume: String,
    /// Set when a later attempt for this URL failed
    pub failed: bool,
    /// Trailing next-chapter link seen when the chapter was saved
    pub next_url: Option<String>,
    pub saved_at: String,
}

impl ChapterRecord {
    /// Builds a fresh, non-failed chapter record stamped with the current time
    pub fn chapter(
        url: impl Into<String>,
        output_file_name: impl Into<String>,
        book: impl Into<String>,
        volume: impl Into<String>,
        next_url: Option<String>,
    ) -> Self {
        Self {
            url: url.into(),
            kind: RecordKind::Chapter,
            output_file_name: output_file_name.into(),
            book: book.into(),
            volume: volume.into(),
            failed: false,
            next_url,
            saved_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Builds an asset record
    pub fn asset(
        url: impl Into<String>,
        output_file_name: impl Into<String>,
        book: impl Into<String>,
        volume: impl Into<String>,
        failed: bool,
    ) -> Self {
        Self {
            url: url.into(),
            kind: RecordKind::Asset,
            output_file_name: output_file_name.into(),
            book: book.into(),
            volume: volume.into(),
            failed,
            next_url: None,
            saved_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Interrupted,
            RunStatus::Failed,
        ] {
            let parsed = RunStatus::from_db_string(status.to_db_string());
            assert_eq!(Some(*status), parsed);
        }
    }

    #[test]
    fn test_record_kind_invalid() {
        assert_eq!(RecordKind::from_db_string("invalid"), None);
        assert_eq!(RunStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_chapter_record_defaults() {
        let record = ChapterRecord::chapter(
            "https://example.com/c/1",
            "0001 - Prologue.html",
            "Book",
            "Volume 1",
            None,
        );
        assert_eq!(record.kind, RecordKind::Chapter);
        assert!(!record.failed);
        assert!(!record.saved_at.is_empty());
    }
}
