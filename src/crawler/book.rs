//! Per-book crawl: listing walk and work queue
//!
//! Each book runs one loop over an unbounded queue of [`ChapterTask`]s. The
//! listing walk and every chapter workflow hold a sender; the loop spawns a
//! workflow for each task it has not dispatched before and ends once the queue
//! is drained and nothing is running.

use crate::config::{BookConfig, BookSettings};
use crate::crawler::assets::AssetQueue;
use crate::crawler::chapter::{run_chapter, ChapterOutcome};
use crate::crawler::extract::{ChapterEntry, Extractor};
use crate::crawler::fetcher::{FetchRequest, Fetcher};
use crate::crawler::gate::IdempotencyGate;
use crate::crawler::limiter::HostLimit;
use crate::crawler::resolver::LinkResolver;
use crate::crawler::retry::fetch_with_retry;
use crate::crawler::task::{ChapterIdentity, ChapterMeta, ChapterTask};
use crate::output::writer::asset_dir;
use crate::storage::SharedStorage;
use crate::{Result, ShioriError};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Sending half of a book's work queue
pub type WorkSender = mpsc::UnboundedSender<ChapterTask>;

/// Everything a book's workflows share
pub struct BookContext {
    pub name: String,
    pub toc_url: Url,
    pub text_dir: PathBuf,
    pub image_dir: PathBuf,
    pub settings: BookSettings,
    pub headers: Arc<HashMap<String, String>>,
    pub fetcher: Arc<dyn Fetcher>,
    pub extractor: Arc<dyn Extractor>,
    pub storage: SharedStorage,
    pub gate: IdempotencyGate,
    pub resolver: LinkResolver,
    pub assets: AssetQueue,
    pub cancel: CancellationToken,
}

impl BookContext {
    /// Builds the context for one configured book
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        book: &BookConfig,
        settings: BookSettings,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        storage: SharedStorage,
        assets: AssetQueue,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            name: book.name.clone(),
            toc_url: Url::parse(&book.toc_url)?,
            text_dir: book.text_dir.clone(),
            image_dir: book.image_dir.clone(),
            settings,
            headers: Arc::new(book.headers.clone()),
            fetcher,
            extractor,
            gate: IdempotencyGate::new(Arc::clone(&storage), settings.ignore_failed),
            storage,
            resolver: LinkResolver::new(),
            assets,
            cancel,
        })
    }

    /// A GET request for `url` with this book's headers and host limit
    pub fn request(&self, url: Url) -> FetchRequest {
        FetchRequest::get(
            url,
            Arc::clone(&self.headers),
            HostLimit {
                delay: self.settings.request_delay,
                parallelism: self.settings.host_parallelism,
            },
        )
    }

    pub fn asset_dir(&self) -> PathBuf {
        asset_dir(&self.image_dir, &self.name)
    }
}

/// Outcome counts for one book
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookReport {
    pub name: String,
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub failed_volumes: usize,
    /// Chapters listed without a URL that no trailing link ever resolved
    pub unresolved: Vec<ChapterIdentity>,
    /// Set when the table of contents could not be read
    pub error: Option<String>,
}

impl BookReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: &ChapterOutcome) {
        match outcome {
            ChapterOutcome::Saved { .. } => self.saved += 1,
            ChapterOutcome::Skipped => self.skipped += 1,
            ChapterOutcome::Failed(_) => self.failed += 1,
            ChapterOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

enum Work {
    Listing(Result<usize>),
    Chapter(ChapterIdentity, ChapterOutcome),
}

/// Crawls one book to completion
pub async fn crawl_book(book: Arc<BookContext>) -> BookReport {
    let mut report = BookReport::new(&book.name);
    let (tx, mut rx) = mpsc::unbounded_channel::<ChapterTask>();
    let mut workflows: JoinSet<Work> = JoinSet::new();
    let mut dispatched: HashSet<ChapterIdentity> = HashSet::new();

    tracing::info!("Crawling '{}' from {}", book.name, book.toc_url);

    {
        let book = Arc::clone(&book);
        let tx = tx.clone();
        workflows.spawn(async move { Work::Listing(walk_listing(&book, &tx).await) });
    }

    loop {
        while let Ok(task) = rx.try_recv() {
            dispatch(&book, &tx, &mut workflows, &mut dispatched, task);
        }

        if workflows.is_empty() {
            break;
        }

        tokio::select! {
            Some(task) = rx.recv() => dispatch(&book, &tx, &mut workflows, &mut dispatched, task),
            Some(joined) = workflows.join_next() => match joined {
                Ok(Work::Listing(Ok(failed_volumes))) => report.failed_volumes = failed_volumes,
                Ok(Work::Listing(Err(e))) => {
                    tracing::error!("Book '{}' failed: {}", book.name, e);
                    report.error = Some(e.to_string());
                }
                Ok(Work::Chapter(_, outcome)) => report.record(&outcome),
                Err(e) => tracing::error!("Workflow for '{}' panicked: {}", book.name, e),
            },
            else => break,
        }
    }

    report.unresolved = book.resolver.unresolved();
    for id in &report.unresolved {
        tracing::warn!("{} {}: never received a URL", book.name, id);
    }

    tracing::info!(
        "Finished '{}': {} saved, {} skipped, {} failed, {} cancelled",
        book.name,
        report.saved,
        report.skipped,
        report.failed,
        report.cancelled
    );

    report
}

fn dispatch(
    book: &Arc<BookContext>,
    tx: &WorkSender,
    workflows: &mut JoinSet<Work>,
    dispatched: &mut HashSet<ChapterIdentity>,
    task: ChapterTask,
) {
    if !dispatched.insert(task.id) {
        tracing::debug!("{} {} already dispatched", book.name, task.id);
        return;
    }
    if book.cancel.is_cancelled() {
        return;
    }

    let book = Arc::clone(book);
    let queue = tx.clone();
    let id = task.id;
    workflows.spawn(async move { Work::Chapter(id, run_chapter(book, task, queue).await) });
}

/// Walks the table of contents and enqueues every chapter it can
///
/// Returns the number of volumes whose listing could not be read. A table of
/// contents failure fails the whole book.
async fn walk_listing(book: &BookContext, queue: &WorkSender) -> Result<usize> {
    let toc_page = fetch_with_retry(
        book.fetcher.as_ref(),
        &book.request(book.toc_url.clone()),
        book.settings.retry_budget,
        &book.cancel,
    )
    .await?;
    let toc = book.extractor.table_of_contents(&toc_page)?;

    tracing::info!(
        "'{}': {} volume(s) in table of contents",
        book.name,
        toc.volumes.len()
    );

    let mut failed_volumes = 0;
    for (index, volume) in toc.volumes.into_iter().enumerate() {
        if book.cancel.is_cancelled() {
            return Err(ShioriError::Book {
                book: book.name.clone(),
                message: "cancelled during listing walk".to_string(),
            });
        }

        let volume_index = index as u32 + 1;
        let chapters = match (&volume.listing_url, volume.chapters.is_empty()) {
            (Some(listing_url), true) => match fetch_volume_listing(book, listing_url).await {
                Ok(chapters) => chapters,
                Err(e) => {
                    tracing::warn!(
                        "'{}': volume {} '{}' failed: {}",
                        book.name,
                        volume_index,
                        volume.title,
                        e
                    );
                    failed_volumes += 1;
                    continue;
                }
            },
            _ => volume.chapters,
        };

        if chapters.is_empty() {
            tracing::warn!("'{}': volume '{}' lists no chapters", book.name, volume.title);
            continue;
        }

        enqueue_volume(book, queue, volume_index, &volume.title, &chapters);
    }

    Ok(failed_volumes)
}

async fn fetch_volume_listing(book: &BookContext, listing_url: &Url) -> Result<Vec<ChapterEntry>> {
    let page = fetch_with_retry(
        book.fetcher.as_ref(),
        &book.request(listing_url.clone()),
        book.settings.retry_budget,
        &book.cancel,
    )
    .await?;
    Ok(book.extractor.volume_listing(&page)?)
}

/// Enqueues linked chapters and parks metadata for unlinked ones
fn enqueue_volume(
    book: &BookContext,
    queue: &WorkSender,
    volume_index: u32,
    volume_title: &str,
    chapters: &[ChapterEntry],
) {
    let count = chapters.len() as u32;

    for (index, entry) in chapters.iter().enumerate() {
        let id = ChapterIdentity::new(volume_index, index as u32 + 1);
        let title = if entry.title.is_empty() {
            format!("Chapter {}", id.chapter)
        } else {
            entry.title.clone()
        };
        let meta = ChapterMeta {
            title,
            volume_title: volume_title.to_string(),
            chapters_in_volume: count,
            next_needs_link: chapters.get(index + 1).is_some_and(|next| next.url.is_none()),
        };

        let url = match &entry.url {
            Some(url) => Some(url.clone()),
            None => {
                if index == 0 {
                    tracing::warn!(
                        "{} {}: first chapter of volume has no URL",
                        book.name,
                        id
                    );
                }
                book.resolver.offer_metadata(id, meta.clone())
            }
        };

        if let Some(url) = url {
            if queue.send(ChapterTask::new(id, url, meta)).is_err() {
                tracing::debug!("{}: work queue closed, dropping {}", book.name, id);
            }
        }
    }
}
