//! Crawler coordinator - top-level crawl orchestration
//!
//! The coordinator owns everything shared between books:
//! - The run record in storage
//! - The fetcher (and through it the per-host limiter)
//! - The asset worker pool
//! - The cancellation token
//!
//! Books run concurrently, each with its own link resolver and work queue.

use crate::config::{BookConfig, Config};
use crate::crawler::assets::AssetWorkerPool;
use crate::crawler::book::{crawl_book, BookContext, BookReport};
use crate::crawler::extract::SelectorExtractor;
use crate::crawler::fetcher::{Fetcher, HttpFetcher};
use crate::storage::{open_storage, with_storage, RunStatus, SharedStorage, Storage};
use crate::{ConfigError, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Summary of one crawl run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub run_id: i64,
    pub books: Vec<BookReport>,
    /// The crawl was cancelled before it finished
    pub interrupted: bool,
}

impl CrawlReport {
    pub fn saved(&self) -> usize {
        self.books.iter().map(|b| b.saved).sum()
    }

    pub fn skipped(&self) -> usize {
        self.books.iter().map(|b| b.skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.books.iter().map(|b| b.failed).sum()
    }

    pub fn cancelled(&self) -> usize {
        self.books.iter().map(|b| b.cancelled).sum()
    }

    /// Books whose table of contents could not be read
    pub fn failed_books(&self) -> Vec<&str> {
        self.books
            .iter()
            .filter(|b| b.error.is_some())
            .map(|b| b.name.as_str())
            .collect()
    }

    /// Final status of the run: failed only when no book could be crawled at all
    pub fn status(&self) -> RunStatus {
        if self.interrupted {
            RunStatus::Interrupted
        } else if !self.books.is_empty() && self.books.iter().all(|b| b.error.is_some()) {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        }
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    storage: SharedStorage,
    fetcher: Arc<dyn Fetcher>,
    cancel: CancellationToken,
    config_hash: String,
    book_filter: Option<String>,
    ignore_failed: bool,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `storage` - Completion-record store
    /// * `fetcher` - Network seam shared by every book
    /// * `cancel` - Token that stops the crawl when cancelled
    pub fn new(
        config: Config,
        storage: SharedStorage,
        fetcher: Arc<dyn Fetcher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            fetcher,
            cancel,
            config_hash: String::new(),
            book_filter: None,
            ignore_failed: false,
        }
    }

    /// Stores `hash` on the run record
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// Restricts the crawl to the named book
    pub fn only_book(mut self, name: Option<String>) -> Self {
        self.book_filter = name;
        self
    }

    /// Forces ignore-failed mode for every book
    pub fn ignore_failed(mut self, ignore: bool) -> Self {
        self.ignore_failed = ignore;
        self
    }

    /// Books selected for this run, in configuration order
    pub fn books(&self) -> Result<Vec<&BookConfig>> {
        let books: Vec<&BookConfig> = self
            .config
            .books
            .iter()
            .filter(|b| self.book_filter.as_ref().map_or(true, |name| &b.name == name))
            .collect();

        if books.is_empty() {
            if let Some(name) = &self.book_filter {
                return Err(ConfigError::Validation(format!("no book named '{}'", name)).into());
            }
        }

        Ok(books)
    }

    /// Runs every selected book to completion
    ///
    /// Per-chapter and per-book failures are reported in the returned
    /// [`CrawlReport`]; only storage failures around the run record abort.
    pub async fn run(&self) -> Result<CrawlReport> {
        let books = self.books()?;
        let run_id = with_storage(&self.storage, |s| s.create_run(&self.config_hash))?;
        tracing::info!("Starting crawl run {} ({} book(s))", run_id, books.len());

        let start_time = std::time::Instant::now();
        let (assets, pool) = AssetWorkerPool::spawn(
            self.config.crawler.asset_workers,
            Arc::clone(&self.fetcher),
            Arc::clone(&self.storage),
            self.cancel.clone(),
        );

        let mut reports = Vec::new();
        let mut running = JoinSet::new();
        for (index, book) in books.into_iter().enumerate() {
            let mut settings = book.settings(&self.config.crawler);
            settings.ignore_failed |= self.ignore_failed;

            let context = SelectorExtractor::new(&book.selectors)
                .map_err(crate::ShioriError::from)
                .and_then(|extractor| {
                    BookContext::new(
                        book,
                        settings,
                        Arc::clone(&self.fetcher),
                        Arc::new(extractor),
                        Arc::clone(&self.storage),
                        assets.clone(),
                        self.cancel.clone(),
                    )
                });

            match context {
                Ok(context) => {
                    running.spawn(async move { (index, crawl_book(Arc::new(context)).await) });
                }
                Err(e) => {
                    tracing::error!("Book '{}' could not start: {}", book.name, e);
                    reports.push((
                        index,
                        BookReport {
                            name: book.name.clone(),
                            error: Some(e.to_string()),
                            ..BookReport::default()
                        },
                    ));
                }
            }
        }
        drop(assets);

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!("Book task panicked: {}", e),
            }
        }
        pool.join().await;

        reports.sort_by_key(|(index, _)| *index);
        let report = CrawlReport {
            run_id,
            books: reports.into_iter().map(|(_, report)| report).collect(),
            interrupted: self.cancel.is_cancelled(),
        };

        let status = report.status();
        with_storage(&self.storage, |s| s.update_run_status(run_id, status))?;

        tracing::info!(
            "Crawl run {} {}: {} saved, {} skipped, {} failed, {} cancelled in {:?}",
            run_id,
            status.to_db_string(),
            report.saved(),
            report.skipped(),
            report.failed(),
            report.cancelled(),
            start_time.elapsed()
        );

        Ok(report)
    }
}

/// Runs a crawl with the default HTTP fetcher and on-disk storage
///
/// # Arguments
///
/// * `config` - Validated configuration
/// * `config_hash` - Hash of the configuration file, stored on the run record
/// * `book` - Optional book name to restrict the crawl to
/// * `ignore_failed` - Force ignore-failed mode for every book
/// * `cancel` - Token cancelled on interrupt
pub async fn run_crawl(
    config: Config,
    config_hash: &str,
    book: Option<String>,
    ignore_failed: bool,
    cancel: CancellationToken,
) -> Result<CrawlReport> {
    let storage = open_storage(Path::new(&config.output.database_path))?;
    let fetcher = HttpFetcher::with_user_agent(&config.crawler.user_agent)?;

    Coordinator::new(config, storage, Arc::new(fetcher), cancel)
        .with_config_hash(config_hash)
        .only_book(book)
        .ignore_failed(ignore_failed)
        .run()
        .await
}
