//! Chapter workflow and page tasks
//!
//! One workflow per dispatched chapter:
//! 1. Ask the idempotency gate whether the chapter is already saved
//! 2. Spawn the page chain; page N spawns page N+1 before reporting itself
//! 3. Drive the chapter's accumulator to completion
//! 4. Write the artifact and commit a record, or leave a failure marker
//!
//! A next-chapter link seen on any page is offered to the link resolver as soon
//! as it appears, so the following chapter can start before this one is done.

use crate::crawler::accumulator::{ChapterError, ChapterProgress, FeedSender, PageAccumulator};
use crate::crawler::assets::AssetTask;
use crate::crawler::book::{BookContext, WorkSender};
use crate::crawler::fetcher::FetchRequest;
use crate::crawler::gate::GateDecision;
use crate::crawler::limiter::{QueueObserver, QueueWatch};
use crate::crawler::retry::fetch_with_retry;
use crate::crawler::task::{ChapterIdentity, ChapterTask, FeedEvent, PageFragment};
use crate::output::writer::{
    chapter_dir, chapter_file_name, remove_failure_marker, write_chapter, write_failure_marker,
};
use crate::state::ChapterState;
use crate::storage::{with_storage, ChapterRecord, Storage};
use crate::url::canonical_url;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Upper bound on pages followed within one chapter
pub const MAX_PAGES_PER_CHAPTER: u32 = 500;

/// How a chapter workflow ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    Saved { path: PathBuf, pages: u32 },
    Skipped,
    Failed(ChapterError),
    Cancelled,
}

/// Shared by every page task of one chapter
struct PageContext {
    book: Arc<BookContext>,
    chapter: ChapterIdentity,
    volume_title: String,
    feed: FeedSender,
    cancel: CancellationToken,
    visited: Mutex<HashSet<Url>>,
}

impl PageContext {
    /// Records `url` as followed; false if it was already followed
    fn visit(&self, url: &Url) -> bool {
        self.visited.lock().unwrap().insert(url.clone())
    }

    /// Request for `url` that reports host-queue time into the chapter feed
    fn request(&self, url: &Url) -> FetchRequest {
        self.book
            .request(url.clone())
            .with_watch(QueueWatch::new(FeedWatch(self.feed.clone())))
    }
}

/// Forwards host-limiter queueing to the chapter's accumulator
struct FeedWatch(FeedSender);

impl QueueObserver for FeedWatch {
    fn waiting(&self) {
        let _ = self.0.send(FeedEvent::HostWaiting);
    }

    fn admitted(&self) {
        let _ = self.0.send(FeedEvent::HostAdmitted);
    }
}

/// Runs one chapter from gate check to saved artifact (or marker)
pub async fn run_chapter(book: Arc<BookContext>, task: ChapterTask, queue: WorkSender) -> ChapterOutcome {
    let id = task.id;
    let dir = chapter_dir(&book.text_dir, &book.name, id.volume, &task.meta.volume_title);
    let file_name = chapter_file_name(id.chapter, &task.meta.title);
    let key = canonical_url(task.url.as_str())
        .map(|u| u.to_string())
        .unwrap_or_else(|_| task.url.to_string());
    let mut state = ChapterState::Idle;

    let decision = book
        .gate
        .check_chapter(&key, &dir, &file_name)
        .unwrap_or_else(|e| {
            tracing::warn!("{} {}: gate unavailable ({}), fetching", book.name, id, e);
            GateDecision::Proceed { record: None }
        });

    if let GateDecision::Skip { reason, record } = decision {
        advance(&mut state, ChapterState::Skipped, &book.name, id);
        tracing::info!("Skipped {} {} '{}' ({:?})", book.name, id, task.meta.title, reason);

        let next = record
            .and_then(|r| r.next_url)
            .and_then(|next| Url::parse(&next).ok());
        if let Some(next) = next {
            hand_off_next(&book, &queue, &task, next);
        }
        return ChapterOutcome::Skipped;
    }

    advance(&mut state, ChapterState::Dispatched, &book.name, id);
    let (feed, accumulator) = PageAccumulator::channel(id);
    let chapter_cancel = book.cancel.child_token();

    let context = Arc::new(PageContext {
        book: Arc::clone(&book),
        chapter: id,
        volume_title: task.meta.volume_title.clone(),
        feed,
        cancel: chapter_cancel.clone(),
        visited: Mutex::new(HashSet::from([task.url.clone()])),
    });
    spawn_page(context, 1, task.url.clone());

    tracing::debug!("Dispatched {} {} ({})", book.name, id, task.url);

    let result = accumulator
        .wait_for_completion(book.settings.chapter_timeout, &book.cancel, |progress| {
            match progress {
                ChapterProgress::Started => {
                    advance(&mut state, ChapterState::Accumulating, &book.name, id)
                }
                ChapterProgress::NextChapter(next) => {
                    hand_off_next(&book, &queue, &task, next.clone())
                }
            }
        })
        .await;

    chapter_cancel.cancel();

    let result = result.and_then(|assembled| {
        advance(&mut state, ChapterState::Writing, &book.name, id);

        let title = assembled
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| task.meta.title.clone());

        if assembled.is_empty() {
            tracing::warn!(
                "{} {} '{}' has no content, writing empty chapter",
                book.name,
                id,
                title
            );
        }

        let path = write_chapter(&dir, &file_name, &title, &assembled.content)
            .map_err(|e| ChapterError::Write(e.to_string()))?;

        let record = ChapterRecord::chapter(
            key.as_str(),
            file_name.as_str(),
            book.name.as_str(),
            task.meta.volume_title.as_str(),
            assembled.next_chapter_url.as_ref().map(|u| u.to_string()),
        );
        with_storage(&book.storage, |s| s.upsert_record(&record))
            .map_err(|e| ChapterError::Write(format!("record not saved: {}", e)))?;

        if let Err(e) = remove_failure_marker(&dir, &file_name) {
            tracing::warn!("Could not remove stale marker for {}: {}", id, e);
        }

        Ok((path, assembled.pages))
    });

    match result {
        Ok((path, pages)) => {
            advance(&mut state, ChapterState::Done, &book.name, id);
            tracing::info!("Saved {} {} '{}' ({} page(s))", book.name, id, task.meta.title, pages);
            ChapterOutcome::Saved { path, pages }
        }
        Err(e) if e.is_cancellation() => {
            advance(&mut state, ChapterState::Cancelled, &book.name, id);
            tracing::info!("Cancelled {} {} '{}'", book.name, id, task.meta.title);
            ChapterOutcome::Cancelled
        }
        Err(e) => {
            advance(&mut state, ChapterState::Failed, &book.name, id);
            tracing::warn!("Failed {} {} '{}': {}", book.name, id, task.meta.title, e);

            if let Err(io) = write_failure_marker(&dir, &file_name, task.url.as_str(), &e.to_string()) {
                tracing::error!("Could not write failure marker for {}: {}", id, io);
            }
            match with_storage(&book.storage, |s| s.mark_failed(&key, true)) {
                Ok(true) => tracing::debug!("Flagged existing record for {} as failed", key),
                Ok(false) => {}
                Err(err) => tracing::error!("Could not flag {} as failed: {}", key, err),
            }

            ChapterOutcome::Failed(e)
        }
    }
}

/// Offers the following chapter's URL to the resolver and enqueues it if both halves are known
fn hand_off_next(book: &BookContext, queue: &WorkSender, task: &ChapterTask, next: Url) {
    if !task.meta.next_needs_link || task.is_last_in_volume() {
        return;
    }

    let next_id = task.id.next();
    if let Some(meta) = book.resolver.offer_url(next_id, next.clone()) {
        tracing::debug!("{}: resolved {} via trailing link", book.name, next_id);
        if queue.send(ChapterTask::new(next_id, next, meta)).is_err() {
            tracing::debug!("{}: work queue closed, dropping {}", book.name, next_id);
        }
    }
}

fn advance(state: &mut ChapterState, next: ChapterState, book: &str, id: ChapterIdentity) {
    match state.transition_to(next) {
        Ok(next) => *state = next,
        Err(e) => tracing::error!("{} {}: {}", book, id, e),
    }
}

/// Starts the task for page `page` of a chapter
///
/// Kept as a plain function so page tasks can spawn their successors.
fn spawn_page(context: Arc<PageContext>, page: u32, url: Url) {
    tokio::spawn(async move {
        let (fragment, next_page) = fetch_page(&context, page, &url).await;

        if let Some(next) = next_page {
            spawn_page(Arc::clone(&context), page + 1, next);
        }

        let _ = context.feed.send(FeedEvent::Fragment(fragment));
    });
}

/// Fetches and extracts one page, queueing its assets
///
/// Returns the page's fragment and, unless this is the last page, the URL of
/// the next one.
async fn fetch_page(context: &PageContext, page: u32, url: &Url) -> (PageFragment, Option<Url>) {
    let book = &context.book;
    let request = context.request(url);

    let response = match fetch_with_retry(
        book.fetcher.as_ref(),
        &request,
        book.settings.retry_budget,
        &context.cancel,
    )
    .await
    {
        Ok(response) => response,
        Err(e) => return (PageFragment::failed(context.chapter, page, e), None),
    };

    let extract = match book.extractor.chapter_page(&response) {
        Ok(extract) => extract,
        Err(e) => return (PageFragment::failed(context.chapter, page, e), None),
    };

    for asset in extract.assets {
        if context.feed.send(FeedEvent::AssetQueued).is_err() {
            break;
        }

        let task = AssetTask {
            request: request.for_url(asset),
            dir: book.asset_dir(),
            book: book.name.clone(),
            volume: context.volume_title.clone(),
            retry_budget: book.settings.retry_budget,
            ignore_failed: book.settings.ignore_failed,
            feed: context.feed.clone(),
        };
        if let Err(task) = book.assets.submit(task) {
            let _ = context.feed.send(FeedEvent::AssetStarted);
            let _ = context.feed.send(FeedEvent::AssetDone {
                url: task.request.url,
                ok: false,
            });
        }
    }

    let next_page = extract.next_page.filter(|next| {
        if page >= MAX_PAGES_PER_CHAPTER {
            tracing::warn!("{}: stopping after {} pages", context.chapter, page);
            false
        } else if !context.visit(next) {
            tracing::debug!("{}: next-page link {} already followed", context.chapter, next);
            false
        } else {
            true
        }
    });

    let mut fragment = PageFragment::page(context.chapter, page, extract.content);
    if let Some(title) = extract.title {
        fragment = fragment.with_title(title);
    }
    if let Some(next_chapter) = extract.next_chapter {
        fragment = fragment.with_next_chapter(next_chapter);
    }
    if next_page.is_none() {
        fragment = fragment.terminal();
    }

    (fragment, next_page)
}
