//! Idempotency gate
//!
//! Consulted before every chapter and asset dispatch. Work is skipped when a
//! completion record exists for the canonical URL, the recorded output file is
//! still on disk, and the record is not flagged failed. With `ignore_failed`
//! set, earlier failures (a failed record or a failure marker) are skipped
//! too instead of being retried.

use crate::output::writer::failure_marker_exists;
use crate::storage::{with_storage, ChapterRecord, SharedStorage, Storage, StorageResult};
use std::path::Path;

/// Why a dispatch was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A record exists and its output is on disk
    AlreadySaved,
    /// An earlier attempt failed and failures are being ignored
    PreviouslyFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Not done yet; dispatch. Carries the stale record if one exists
    Proceed { record: Option<ChapterRecord> },
    Skip {
        reason: SkipReason,
        record: Option<ChapterRecord>,
    },
}

impl GateDecision {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip { .. })
    }
}

#[derive(Clone)]
pub struct IdempotencyGate {
    storage: SharedStorage,
    ignore_failed: bool,
}

impl IdempotencyGate {
    pub fn new(storage: SharedStorage, ignore_failed: bool) -> Self {
        Self {
            storage,
            ignore_failed,
        }
    }

    /// Decides whether a chapter needs to be fetched
    ///
    /// # Arguments
    ///
    /// * `url` - Canonical source URL
    /// * `dir` - The chapter's output directory
    /// * `file_name` - The file name the chapter would be written under
    pub fn check_chapter(&self, url: &str, dir: &Path, file_name: &str) -> StorageResult<GateDecision> {
        let record = with_storage(&self.storage, |s| s.find_record(url))?;

        if self.ignore_failed {
            let failed_record = record.as_ref().is_some_and(|r| r.failed);
            if failed_record || failure_marker_exists(dir, file_name) {
                return Ok(GateDecision::Skip {
                    reason: SkipReason::PreviouslyFailed,
                    record,
                });
            }
        }

        Ok(decide(record, dir))
    }

    /// Same rule for assets, without failure markers
    pub fn check_asset(&self, url: &str, dir: &Path) -> StorageResult<GateDecision> {
        let record = with_storage(&self.storage, |s| s.find_record(url))?;

        if self.ignore_failed && record.as_ref().is_some_and(|r| r.failed) {
            return Ok(GateDecision::Skip {
                reason: SkipReason::PreviouslyFailed,
                record,
            });
        }

        Ok(decide(record, dir))
    }
}

fn decide(record: Option<ChapterRecord>, dir: &Path) -> GateDecision {
    match record {
        Some(r) if !r.failed && dir.join(&r.output_file_name).is_file() => GateDecision::Skip {
            reason: SkipReason::AlreadySaved,
            record: Some(r),
        },
        record => GateDecision::Proceed { record },
    }
}
