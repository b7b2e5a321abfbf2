//! Typed task and message structures passed between crawler components

use crate::crawler::ChapterError;
use std::fmt;
use url::Url;

/// Stable `(volume, chapter)` key for one chapter of a book, both 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChapterIdentity {
    pub volume: u32,
    pub chapter: u32,
}

impl ChapterIdentity {
    pub fn new(volume: u32, chapter: u32) -> Self {
        Self { volume, chapter }
    }

    /// Identity of the following chapter in the same volume
    pub fn next(&self) -> Self {
        Self {
            volume: self.volume,
            chapter: self.chapter + 1,
        }
    }
}

impl fmt::Display for ChapterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}c{}", self.volume, self.chapter)
    }
}

/// Display metadata a volume listing provides for a chapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterMeta {
    pub title: String,
    pub volume_title: String,
    /// Number of chapters in the volume, used to stop next-chapter hand-off
    pub chapters_in_volume: u32,
    /// True when the following chapter was listed without a URL
    pub next_needs_link: bool,
}

/// A chapter ready to be dispatched; consumed exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterTask {
    pub id: ChapterIdentity,
    pub url: Url,
    pub meta: ChapterMeta,
}

impl ChapterTask {
    pub fn new(id: ChapterIdentity, url: Url, meta: ChapterMeta) -> Self {
        Self { id, url, meta }
    }

    /// Whether this is the last chapter of its volume
    pub fn is_last_in_volume(&self) -> bool {
        self.id.chapter >= self.meta.chapters_in_volume
    }
}

/// One unit of content delivered from a single fetched page
#[derive(Debug, Clone)]
pub struct PageFragment {
    pub chapter: ChapterIdentity,
    pub page_number: u32,
    pub content: String,
    pub is_terminal: bool,
    pub title: Option<String>,
    pub next_chapter_url: Option<Url>,
    pub error: Option<ChapterError>,
}

impl PageFragment {
    /// A content-bearing fragment
    pub fn page(chapter: ChapterIdentity, page_number: u32, content: impl Into<String>) -> Self {
        Self {
            chapter,
            page_number,
            content: content.into(),
            is_terminal: false,
            title: None,
            next_chapter_url: None,
            error: None,
        }
    }

    /// An error fragment; aborts reassembly of the chapter
    pub fn failed(
        chapter: ChapterIdentity,
        page_number: u32,
        error: impl Into<ChapterError>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::page(chapter, page_number, String::new())
        }
    }

    pub fn terminal(mut self) -> Self {
        self.is_terminal = true;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_next_chapter(mut self, url: Url) -> Self {
        self.next_chapter_url = Some(url);
        self
    }
}

/// Everything a chapter's accumulator feed can carry
#[derive(Debug)]
pub enum FeedEvent {
    /// Page content, a terminal marker, or an error
    Fragment(PageFragment),
    /// A request of this chapter started waiting for its host slot
    HostWaiting,
    /// That request was admitted by the host limiter
    HostAdmitted,
    /// An asset download was handed to the asset worker
    AssetQueued,
    /// An asset worker picked up one of this chapter's downloads
    AssetStarted,
    /// An asset download finished (successfully or not)
    AssetDone { url: Url, ok: bool },
}
