//! Crawler module for chapter fetching and reassembly
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching behind the `Fetcher` seam, with per-host limits and retry
//! - Structured extraction behind the `Extractor` seam
//! - Per-chapter page accumulation and link resolution between chapters
//! - Idempotency checks, asset downloads and overall crawl coordination

mod accumulator;
mod assets;
mod book;
mod chapter;
mod coordinator;
mod extract;
mod fetcher;
mod gate;
mod limiter;
mod resolver;
mod retry;
mod task;

pub use accumulator::{AssembledChapter, ChapterError, ChapterProgress, FeedSender, PageAccumulator};
pub use assets::{AssetQueue, AssetTask, AssetWorkerPool};
pub use book::{crawl_book, BookContext, BookReport, WorkSender};
pub use chapter::{run_chapter, ChapterOutcome, MAX_PAGES_PER_CHAPTER};
pub use coordinator::{run_crawl, Coordinator, CrawlReport};
pub use extract::{
    ChapterEntry, ExtractError, Extractor, PageExtract, SelectorExtractor, TableOfContents,
    VolumeListing,
};
pub use fetcher::{build_http_client, FetchError, FetchRequest, FetchResponse, Fetcher, HttpFetcher};
pub use gate::{GateDecision, IdempotencyGate, SkipReason};
pub use limiter::{HostLimit, HostLimiter, HostPermit, QueueObserver, QueueTicket, QueueWatch};
pub use resolver::LinkResolver;
pub use retry::{fetch_with_retry, RetryBudget, RetryDecision};
pub use task::{ChapterIdentity, ChapterMeta, ChapterTask, FeedEvent, PageFragment};
