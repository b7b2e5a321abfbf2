//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::storage::{ChapterRecord, RecordKind, RunRecord, RunStatus};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Corrupt record for {url}: {message}")]
    Corrupt { url: String, message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// The record half of this trait is what the idempotency gate consults before
/// every dispatch; the run half is bookkeeping for the CLI.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new crawl run and returns its ID
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run, stamping the finish time for final statuses
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Completion Records =====

    /// Looks up the record for a canonical URL
    fn find_record(&self, url: &str) -> StorageResult<Option<ChapterRecord>>;

    /// Inserts or replaces the record for `record.url`
    fn upsert_record(&mut self, record: &ChapterRecord) -> StorageResult<()>;

    /// Sets the failed flag on an existing record
    ///
    /// Returns `false` when no record exists for the URL; no record is created.
    fn mark_failed(&mut self, url: &str, failed: bool) -> StorageResult<bool>;

    // ===== Statistics =====

    /// Counts records of one kind
    fn count_records(&self, kind: RecordKind) -> StorageResult<u64>;

    /// Counts failed records of one kind
    fn count_failed(&self, kind: RecordKind) -> StorageResult<u64>;

    /// Chapter record counts grouped by book name
    fn count_records_by_book(&self) -> StorageResult<HashMap<String, u64>>;

    /// URLs of failed records, oldest first
    fn get_failed_urls(&self) -> StorageResult<Vec<String>>;
}
