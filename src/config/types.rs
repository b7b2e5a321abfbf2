use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Shiori
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "book")]
    pub books: Vec<BookConfig>,
}

/// Crawl-wide defaults; every book may override the per-book subset
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Retries allowed per request after the first attempt
    #[serde(rename = "retry-budget", default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Milliseconds a chapter may go without any progress before it fails
    #[serde(rename = "chapter-timeout", default = "default_chapter_timeout")]
    pub chapter_timeout: u64,

    /// Minimum time between request starts to the same host (milliseconds)
    #[serde(rename = "request-delay", default = "default_request_delay")]
    pub request_delay: u64,

    /// Maximum concurrent requests to the same host
    #[serde(rename = "host-parallelism", default = "default_host_parallelism")]
    pub host_parallelism: u32,

    /// Number of asset download workers
    #[serde(rename = "asset-workers", default = "default_asset_workers")]
    pub asset_workers: u32,

    /// Treat previously failed chapters and assets as done
    #[serde(rename = "ignore-failed", default)]
    pub ignore_failed: bool,

    /// User agent sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            chapter_timeout: default_chapter_timeout(),
            request_delay: default_request_delay(),
            host_parallelism: default_host_parallelism(),
            asset_workers: default_asset_workers(),
            ignore_failed: false,
            user_agent: default_user_agent(),
        }
    }
}

fn default_retry_budget() -> u32 {
    3
}

fn default_chapter_timeout() -> u64 {
    60_000
}

fn default_request_delay() -> u64 {
    500
}

fn default_host_parallelism() -> u32 {
    4
}

fn default_asset_workers() -> u32 {
    4
}

fn default_user_agent() -> String {
    format!("shiori/{}", env!("CARGO_PKG_VERSION"))
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite completion-record database
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// One book to crawl
#[derive(Debug, Clone, Deserialize)]
pub struct BookConfig {
    /// Display name; also the per-book output directory name
    pub name: String,

    /// Table-of-contents URL
    #[serde(rename = "toc-url")]
    pub toc_url: String,

    /// Directory receiving chapter HTML files
    #[serde(rename = "text-dir")]
    pub text_dir: PathBuf,

    /// Directory receiving downloaded images
    #[serde(rename = "image-dir")]
    pub image_dir: PathBuf,

    /// Extra request headers, passed through verbatim
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(rename = "retry-budget")]
    pub retry_budget: Option<u32>,

    #[serde(rename = "chapter-timeout")]
    pub chapter_timeout: Option<u64>,

    #[serde(rename = "request-delay")]
    pub request_delay: Option<u64>,

    #[serde(rename = "host-parallelism")]
    pub host_parallelism: Option<u32>,

    #[serde(rename = "ignore-failed")]
    pub ignore_failed: Option<bool>,

    /// CSS selectors driving the default extractor
    pub selectors: SelectorConfig,
}

impl BookConfig {
    /// Resolves per-book overrides against the crawl-wide defaults
    pub fn settings(&self, defaults: &CrawlerConfig) -> BookSettings {
        BookSettings {
            retry_budget: self.retry_budget.unwrap_or(defaults.retry_budget),
            chapter_timeout: Duration::from_millis(
                self.chapter_timeout.unwrap_or(defaults.chapter_timeout),
            ),
            request_delay: Duration::from_millis(
                self.request_delay.unwrap_or(defaults.request_delay),
            ),
            host_parallelism: self.host_parallelism.unwrap_or(defaults.host_parallelism),
            ignore_failed: self.ignore_failed.unwrap_or(defaults.ignore_failed),
        }
    }
}

/// Effective per-book crawl settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookSettings {
    pub retry_budget: u32,
    pub chapter_timeout: Duration,
    pub request_delay: Duration,
    pub host_parallelism: u32,
    pub ignore_failed: bool,
}

/// CSS selectors for the generic selector-driven extractor
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectorConfig {
    /// Volume containers on the table of contents; absent means one volume
    pub volume: Option<String>,

    /// Volume title, relative to a volume container
    #[serde(rename = "volume-title")]
    pub volume_title: Option<String>,

    /// Link to a volume's own chapter listing, relative to a volume container
    #[serde(rename = "volume-listing")]
    pub volume_listing: Option<String>,

    /// Chapter anchors, relative to a volume container (or the whole page)
    #[serde(rename = "chapter-link")]
    pub chapter_link: String,

    /// Chapter title on a chapter page
    #[serde(rename = "chapter-title")]
    pub chapter_title: Option<String>,

    /// Chapter body nodes on a chapter page
    pub content: String,

    /// Link to the next page of the same chapter
    #[serde(rename = "next-page")]
    pub next_page: Option<String>,

    /// Link to the next chapter
    #[serde(rename = "next-chapter")]
    pub next_chapter: Option<String>,

    /// Embedded images to download
    pub image: Option<String>,
}
