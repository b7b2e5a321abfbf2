//! Shiori: a crawl-and-reassembly engine for serialized web fiction
//!
//! This crate turns a table-of-contents URL into an ordered, deduplicated set of
//! per-chapter HTML artifacts. Chapter pages are fetched concurrently under a
//! per-host rate limit, reassembled in page order, and skipped on later runs
//! once they have been saved.

pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Shiori operations
#[derive(Debug, Error)]
pub enum ShioriError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Extraction error: {0}")]
    Extract(#[from] crawler::ExtractError),

    #[error("Chapter error: {0}")]
    Chapter(#[from] crawler::ChapterError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid chapter state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::ChapterState,
        to: state::ChapterState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Book '{book}' failed: {message}")]
    Book { book: String, message: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector: {0}")]
    InvalidSelector(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Shiori operations
pub type Result<T> = std::result::Result<T, ShioriError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{ChapterIdentity, Coordinator, CrawlReport};
pub use state::ChapterState;
pub use url::{canonical_url, host_of};
