//! Output module for chapter artifacts and crawl statistics
//!
//! This module handles:
//! - Output paths and file names for chapters, failure markers and assets
//! - Writing chapter artifacts and failure markers
//! - Loading and printing record statistics

pub mod stats;
pub mod writer;

pub use stats::{load_statistics, print_statistics, CrawlStatistics};
pub use writer::{
    asset_dir, asset_file_name, chapter_dir, chapter_file_name, failure_marker_exists,
    marker_file_name, remove_failure_marker, sanitize_file_name, write_asset, write_chapter,
    write_failure_marker,
};
