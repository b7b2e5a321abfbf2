//! Configuration module for Shiori
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use shiori::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("shiori.toml")).unwrap();
//! println!("Retry budget: {}", config.crawler.retry_budget);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{BookConfig, BookSettings, Config, CrawlerConfig, OutputConfig, SelectorConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
