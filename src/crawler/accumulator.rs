//! Per-chapter page reassembly
//!
//! Every dispatched chapter owns one [`PageAccumulator`]. Page tasks and the
//! asset worker push [`FeedEvent`]s into the chapter's feed; the accumulator
//! is the feed's single reader. Fragments may arrive in any order and are kept
//! sorted by page number.
//!
//! A chapter is complete once the terminal fragment has been seen, every page
//! up to it has arrived, and every queued asset has reported back. An error
//! fragment fails it immediately. The timeout window restarts on every event
//! and is suspended while any of the chapter's work sits in a queue: a request
//! waiting for its host slot, or an asset no worker has picked up yet.

use crate::crawler::extract::ExtractError;
use crate::crawler::fetcher::FetchError;
use crate::crawler::task::{ChapterIdentity, FeedEvent, PageFragment};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Sending half of a chapter feed
pub type FeedSender = mpsc::UnboundedSender<FeedEvent>;

/// Why a chapter could not be completed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("no progress within {0:?}")]
    Timeout(Duration),

    #[error("crawl cancelled")]
    Cancelled,

    #[error("chapter feed closed before completion")]
    FeedClosed,

    #[error("failed to write chapter: {0}")]
    Write(String),
}

impl ChapterError {
    /// Cancelled chapters leave no failure marker behind
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Fetch(FetchError::Cancelled { .. })
        )
    }
}

/// Progress notifications delivered while waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterProgress<'a> {
    /// The first event of the chapter arrived
    Started,
    /// A fragment carried a next-chapter link for the first time
    NextChapter(&'a Url),
}

/// A completed chapter, pages in ascending order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledChapter {
    pub chapter: ChapterIdentity,
    /// Non-empty page contents joined by newlines
    pub content: String,
    pub title: Option<String>,
    pub next_chapter_url: Option<Url>,
    pub pages: u32,
    pub assets: u32,
    pub failed_assets: u32,
}

impl AssembledChapter {
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Ordered fragment buffer with an explicit outstanding-work counter
#[derive(Debug)]
pub struct PageAccumulator {
    chapter: ChapterIdentity,
    feed: mpsc::UnboundedReceiver<FeedEvent>,
    fragments: Vec<PageFragment>,
    title: Option<String>,
    next_chapter_url: Option<Url>,
    terminal_page: Option<u32>,
    host_waiting: u32,
    assets_queued: u32,
    assets_started: u32,
    assets_done: u32,
    assets_failed: u32,
    error: Option<ChapterError>,
    started: bool,
    next_reported: bool,
}

impl PageAccumulator {
    /// Creates an accumulator and the feed that delivers into it
    pub fn channel(chapter: ChapterIdentity) -> (FeedSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let accumulator = Self {
            chapter,
            feed: rx,
            fragments: Vec::new(),
            title: None,
            next_chapter_url: None,
            terminal_page: None,
            host_waiting: 0,
            assets_queued: 0,
            assets_started: 0,
            assets_done: 0,
            assets_failed: 0,
            error: None,
            started: false,
            next_reported: false,
        };
        (tx, accumulator)
    }

    /// Inserts a fragment after the last fragment with a page number ≤ its own
    pub fn insert(&mut self, fragment: PageFragment) {
        if let Some(error) = &fragment.error {
            if self.error.is_none() {
                self.error = Some(error.clone());
            }
            return;
        }

        if let Some(title) = fragment.title.as_ref().filter(|t| !t.is_empty()) {
            self.title = Some(title.clone());
        }
        if let Some(url) = &fragment.next_chapter_url {
            self.next_chapter_url = Some(url.clone());
        }
        if fragment.is_terminal {
            self.terminal_page = Some(fragment.page_number);
        }

        let position = self
            .fragments
            .partition_point(|f| f.page_number <= fragment.page_number);
        self.fragments.insert(position, fragment);
    }

    /// Page numbers currently buffered, in buffer order
    pub fn page_numbers(&self) -> Vec<u32> {
        self.fragments.iter().map(|f| f.page_number).collect()
    }

    pub fn outstanding_assets(&self) -> u32 {
        self.assets_queued.saturating_sub(self.assets_done)
    }

    /// True while some of the chapter's work is queued rather than running
    pub fn is_queued(&self) -> bool {
        self.host_waiting > 0 || self.assets_started < self.assets_queued
    }

    /// `Some` once the chapter has resolved one way or the other
    fn outcome(&self) -> Option<Result<(), ChapterError>> {
        if let Some(error) = &self.error {
            return Some(Err(error.clone()));
        }

        let terminal = self.terminal_page?;
        let pages_ready = self.fragments.len() as u32 >= terminal;
        if pages_ready && self.outstanding_assets() == 0 {
            Some(Ok(()))
        } else {
            None
        }
    }

    fn apply<F>(&mut self, event: FeedEvent, on_progress: &mut F)
    where
        F: FnMut(ChapterProgress<'_>),
    {
        if !self.started {
            self.started = true;
            on_progress(ChapterProgress::Started);
        }

        match event {
            FeedEvent::Fragment(fragment) => {
                tracing::trace!(
                    "{}: page {}{}",
                    self.chapter,
                    fragment.page_number,
                    if fragment.is_terminal { " (terminal)" } else { "" }
                );
                self.insert(fragment);

                if !self.next_reported {
                    if let Some(url) = &self.next_chapter_url {
                        self.next_reported = true;
                        on_progress(ChapterProgress::NextChapter(url));
                    }
                }
            }
            FeedEvent::HostWaiting => self.host_waiting += 1,
            FeedEvent::HostAdmitted => self.host_waiting = self.host_waiting.saturating_sub(1),
            FeedEvent::AssetQueued => self.assets_queued += 1,
            FeedEvent::AssetStarted => self.assets_started += 1,
            FeedEvent::AssetDone { url, ok } => {
                self.assets_done += 1;
                if !ok {
                    self.assets_failed += 1;
                    tracing::debug!("{}: asset {} failed", self.chapter, url);
                }
            }
        }
    }

    /// Drains the feed until the chapter completes, fails, times out or is cancelled
    ///
    /// # Arguments
    ///
    /// * `window` - Maximum time between two events while nothing is queued
    /// * `cancel` - Crawl cancellation token
    /// * `on_progress` - Called on the first event and on the first next-chapter link
    ///
    /// # Returns
    ///
    /// * `Ok(AssembledChapter)` - Pages in ascending order
    /// * `Err(ChapterError)` - Error fragment, timeout, cancellation or closed feed
    pub async fn wait_for_completion<F>(
        mut self,
        window: Duration,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<AssembledChapter, ChapterError>
    where
        F: FnMut(ChapterProgress<'_>),
    {
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome.map(|()| self.assemble());
            }

            let limit = (!self.is_queued()).then_some(window);
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(ChapterError::Cancelled),
                received = next_event(&mut self.feed, limit) => match received {
                    Err(()) => {
                        tracing::debug!(
                            "{}: timed out with pages {:?}, {} asset(s) outstanding",
                            self.chapter,
                            self.page_numbers(),
                            self.outstanding_assets()
                        );
                        return Err(ChapterError::Timeout(window));
                    }
                    Ok(None) => return Err(ChapterError::FeedClosed),
                    Ok(Some(event)) => event,
                },
            };

            self.apply(event, &mut on_progress);
        }
    }

    fn assemble(self) -> AssembledChapter {
        let pages = self.fragments.len() as u32;
        let content = self
            .fragments
            .into_iter()
            .map(|f| f.content)
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        AssembledChapter {
            chapter: self.chapter,
            content,
            title: self.title,
            next_chapter_url: self.next_chapter_url,
            pages,
            assets: self.assets_queued,
            failed_assets: self.assets_failed,
        }
    }
}

/// Next feed event, or `Err` if `limit` elapses first
async fn next_event(
    feed: &mut mpsc::UnboundedReceiver<FeedEvent>,
    limit: Option<Duration>,
) -> Result<Option<FeedEvent>, ()> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, feed.recv()).await.map_err(|_| ()),
        None => Ok(feed.recv().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(5);

    fn id() -> ChapterIdentity {
        ChapterIdentity::new(1, 1)
    }

    fn fragment(page: u32) -> PageFragment {
        PageFragment::page(id(), page, format!("p{}", page))
    }

    fn send(tx: &FeedSender, fragment: PageFragment) {
        tx.send(FeedEvent::Fragment(fragment)).unwrap();
    }

    #[test]
    fn test_insert_keeps_page_order() {
        let (_tx, mut acc) = PageAccumulator::channel(id());
        for page in [4, 2, 5, 1, 3] {
            acc.insert(fragment(page));
        }
        assert_eq!(acc.page_numbers(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_insert_is_stable_for_equal_pages() {
        let (_tx, mut acc) = PageAccumulator::channel(id());
        acc.insert(PageFragment::page(id(), 2, "first"));
        acc.insert(fragment(1));
        acc.insert(PageFragment::page(id(), 2, "second"));

        let contents: Vec<&str> = acc.fragments.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(contents, vec!["p1", "first", "second"]);
    }

    #[tokio::test]
    async fn test_every_permutation_assembles_ascending() {
        let orders = [
            [1, 2, 3],
            [1, 3, 2],
            [2, 1, 3],
            [2, 3, 1],
            [3, 1, 2],
            [3, 2, 1],
        ];

        for order in orders {
            let (tx, acc) = PageAccumulator::channel(id());
            for page in order {
                let mut f = fragment(page);
                if page == 3 {
                    f = f.terminal();
                }
                send(&tx, f);
            }

            let chapter = acc
                .wait_for_completion(WINDOW, &CancellationToken::new(), |_| {})
                .await
                .unwrap();
            assert_eq!(chapter.content, "p1\np2\np3", "order {:?}", order);
            assert_eq!(chapter.pages, 3);
        }
    }

    #[tokio::test]
    async fn test_terminal_first_with_title_in_middle() {
        let (tx, acc) = PageAccumulator::channel(id());
        send(&tx, fragment(3).terminal());
        send(&tx, fragment(1));
        send(&tx, fragment(2).with_title("The Middle Title"));

        let chapter = acc
            .wait_for_completion(WINDOW, &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(chapter.title.as_deref(), Some("The Middle Title"));
        assert_eq!(chapter.content, "p1\np2\np3");
    }

    #[tokio::test]
    async fn test_last_writer_wins_for_title_and_next_link() {
        let next_a = Url::parse("https://example.com/c/2a").unwrap();
        let next_b = Url::parse("https://example.com/c/2b").unwrap();

        let (tx, acc) = PageAccumulator::channel(id());
        send(&tx, fragment(1).with_title("Old").with_next_chapter(next_a));
        send(&tx, fragment(3).terminal().with_title("New").with_next_chapter(next_b.clone()));
        send(&tx, fragment(2).with_title(""));

        let chapter = acc
            .wait_for_completion(WINDOW, &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(chapter.title.as_deref(), Some("New"));
        assert_eq!(chapter.next_chapter_url, Some(next_b));
    }

    #[tokio::test]
    async fn test_next_chapter_reported_once() {
        let next = Url::parse("https://example.com/c/2").unwrap();
        let (tx, acc) = PageAccumulator::channel(id());
        send(&tx, fragment(1).with_next_chapter(next.clone()));
        send(&tx, fragment(2).terminal().with_next_chapter(next.clone()));

        let mut started = 0;
        let mut reported = Vec::new();
        acc.wait_for_completion(WINDOW, &CancellationToken::new(), |progress| match progress {
            ChapterProgress::Started => started += 1,
            ChapterProgress::NextChapter(url) => reported.push(url.clone()),
        })
        .await
        .unwrap();

        assert_eq!(started, 1);
        assert_eq!(reported, vec![next]);
    }

    #[tokio::test]
    async fn test_error_fragment_fails_immediately() {
        let (tx, acc) = PageAccumulator::channel(id());
        send(&tx, fragment(1));
        send(
            &tx,
            PageFragment::failed(
                id(),
                2,
                FetchError::Status {
                    url: "https://example.com/c/1?p=2".to_string(),
                    status: 404,
                },
            ),
        );

        let result = acc
            .wait_for_completion(WINDOW, &CancellationToken::new(), |_| {})
            .await;
        assert!(matches!(
            result,
            Err(ChapterError::Fetch(FetchError::Status { status: 404, .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_event_times_out() {
        let (tx, acc) = PageAccumulator::channel(id());
        send(&tx, fragment(1));

        let result = acc
            .wait_for_completion(Duration::from_secs(2), &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(result, Err(ChapterError::Timeout(Duration::from_secs(2))));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_restarts_on_each_event() {
        let (tx, acc) = PageAccumulator::channel(id());
        let producer = tokio::spawn(async move {
            for page in 1..=3 {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                let mut f = fragment(page);
                if page == 3 {
                    f = f.terminal();
                }
                tx.send(FeedEvent::Fragment(f)).unwrap();
            }
        });

        let chapter = acc
            .wait_for_completion(Duration::from_secs(2), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(chapter.pages, 3);
        producer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_queue_time_does_not_count_against_window() {
        let (tx, acc) = PageAccumulator::channel(id());
        tx.send(FeedEvent::HostWaiting).unwrap();

        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            tx.send(FeedEvent::HostAdmitted).unwrap();
            tokio::time::sleep(Duration::from_millis(1500)).await;
            tx.send(FeedEvent::Fragment(fragment(1).terminal())).unwrap();
        });

        let chapter = acc
            .wait_for_completion(Duration::from_secs(2), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(chapter.pages, 1);
        producer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resumes_after_admission() {
        let (tx, acc) = PageAccumulator::channel(id());
        tx.send(FeedEvent::HostWaiting).unwrap();
        tx.send(FeedEvent::HostAdmitted).unwrap();

        let result = acc
            .wait_for_completion(Duration::from_secs(2), &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(result, Err(ChapterError::Timeout(Duration::from_secs(2))));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unstarted_asset_suspends_window() {
        let (tx, acc) = PageAccumulator::channel(id());
        tx.send(FeedEvent::AssetQueued).unwrap();
        send(&tx, fragment(1).terminal());

        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            tx.send(FeedEvent::AssetStarted).unwrap();
            tx.send(FeedEvent::AssetDone {
                url: Url::parse("https://example.com/a.png").unwrap(),
                ok: true,
            })
            .unwrap();
        });

        let chapter = acc
            .wait_for_completion(Duration::from_secs(2), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(chapter.assets, 1);
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_waits_for_outstanding_assets() {
        let (tx, acc) = PageAccumulator::channel(id());
        tx.send(FeedEvent::AssetQueued).unwrap();
        tx.send(FeedEvent::AssetQueued).unwrap();
        send(&tx, fragment(1).terminal());

        let waiter = tokio::spawn(async move {
            acc.wait_for_completion(WINDOW, &CancellationToken::new(), |_| {})
                .await
        });

        tokio::task::yield_now().await;
        tx.send(FeedEvent::AssetDone {
            url: Url::parse("https://example.com/a.png").unwrap(),
            ok: true,
        })
        .unwrap();
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        tx.send(FeedEvent::AssetDone {
            url: Url::parse("https://example.com/b.png").unwrap(),
            ok: false,
        })
        .unwrap();

        let chapter = waiter.await.unwrap().unwrap();
        assert_eq!(chapter.assets, 2);
        assert_eq!(chapter.failed_assets, 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let (_tx, acc) = PageAccumulator::channel(id());
        let token = CancellationToken::new();
        token.cancel();

        let result = acc.wait_for_completion(WINDOW, &token, |_| {}).await;
        assert_eq!(result, Err(ChapterError::Cancelled));
    }

    #[tokio::test]
    async fn test_closed_feed_without_terminal() {
        let (tx, acc) = PageAccumulator::channel(id());
        send(&tx, fragment(1));
        drop(tx);

        let result = acc
            .wait_for_completion(WINDOW, &CancellationToken::new(), |_| {})
            .await;
        assert_eq!(result, Err(ChapterError::FeedClosed));
    }
}
