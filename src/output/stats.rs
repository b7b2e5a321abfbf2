//! Statistics generation from the record database
//!
//! This module provides functionality for extracting and displaying
//! completion-record statistics from the storage layer.

use crate::storage::{RecordKind, RunRecord, Storage};
use crate::ShioriError;
use std::collections::HashMap;

/// Record statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Chapter records, including failed ones
    pub chapters: u64,

    /// Chapter records flagged failed
    pub failed_chapters: u64,

    /// Asset records, including failed ones
    pub assets: u64,

    pub failed_assets: u64,

    /// Record count per book
    pub records_by_book: HashMap<String, u64>,

    /// URLs of failed records
    pub failed_urls: Vec<String>,

    /// Most recent crawl run, if any
    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(ShioriError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<CrawlStatistics, ShioriError> {
    Ok(CrawlStatistics {
        chapters: storage.count_records(RecordKind::Chapter)?,
        failed_chapters: storage.count_failed(RecordKind::Chapter)?,
        assets: storage.count_records(RecordKind::Asset)?,
        failed_assets: storage.count_failed(RecordKind::Asset)?,
        records_by_book: storage.count_records_by_book()?,
        failed_urls: storage.get_failed_urls()?,
        latest_run: storage.get_latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Shiori Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        println!("Latest run:");
        println!("  Run ID: {}", run.id);
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!("  Status: {}", run.status.to_db_string());
        println!();
    }

    println!("Records:");
    println!(
        "  Chapters: {} ({} failed)",
        stats.chapters, stats.failed_chapters
    );
    println!("  Assets: {} ({} failed)", stats.assets, stats.failed_assets);
    println!();

    if !stats.records_by_book.is_empty() {
        println!("By book:");
        let mut books: Vec<_> = stats.records_by_book.iter().collect();
        books.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (book, count) in books {
            println!("  {}: {}", book, count);
        }
        println!();
    }

    if !stats.failed_urls.is_empty() {
        println!("Failed ({}):", stats.failed_urls.len());
        for url in &stats.failed_urls {
            println!("  - {}", url);
        }
        println!();
    }

    let saved = stats.chapters - stats.failed_chapters.min(stats.chapters);
    let success_rate = if stats.chapters > 0 {
        (saved as f64 / stats.chapters as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} chapters saved)",
        success_rate, saved, stats.chapters
    );
}
