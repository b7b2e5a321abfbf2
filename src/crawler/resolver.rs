//! Chapter link resolution
//!
//! A chapter can become known from two directions: the volume listing knows
//! its title and position but not its URL, while the previous chapter's last
//! page knows its URL but nothing else. Whichever side arrives first parks its
//! half here; the second side takes it and dispatches the chapter.
//!
//! Lock discipline: one `std::sync::Mutex` guards the index. It is taken for a
//! single get-or-set and never held across an await.

use crate::crawler::task::{ChapterIdentity, ChapterMeta};
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingLink {
    Url(Url),
    Metadata(ChapterMeta),
}

/// Per-book index of half-known chapters
#[derive(Debug, Default)]
pub struct LinkResolver {
    pending: Mutex<HashMap<ChapterIdentity, PendingLink>>,
}

impl LinkResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a URL for `id`, replacing anything pending
    pub fn set_url(&self, id: ChapterIdentity, url: Url) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(previous) = pending.insert(id, PendingLink::Url(url)) {
            tracing::debug!("{}: replaced pending {:?}", id, previous);
        }
    }

    /// Removes and returns a parked URL
    pub fn take_url(&self, id: ChapterIdentity) -> Option<Url> {
        let mut pending = self.pending.lock().unwrap();
        match pending.remove(&id) {
            Some(PendingLink::Url(url)) => Some(url),
            Some(other) => {
                pending.insert(id, other);
                None
            }
            None => None,
        }
    }

    /// Parks metadata for `id`, replacing anything pending
    pub fn set_pending_metadata(&self, id: ChapterIdentity, meta: ChapterMeta) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(previous) = pending.insert(id, PendingLink::Metadata(meta)) {
            tracing::debug!("{}: replaced pending {:?}", id, previous);
        }
    }

    /// Removes and returns parked metadata
    pub fn take_pending_metadata(&self, id: ChapterIdentity) -> Option<ChapterMeta> {
        let mut pending = self.pending.lock().unwrap();
        match pending.remove(&id) {
            Some(PendingLink::Metadata(meta)) => Some(meta),
            Some(other) => {
                pending.insert(id, other);
                None
            }
            None => None,
        }
    }

    /// Takes parked metadata if present, otherwise parks `url`
    ///
    /// Returns the metadata when the caller now holds both halves and must
    /// dispatch the chapter.
    pub fn offer_url(&self, id: ChapterIdentity, url: Url) -> Option<ChapterMeta> {
        let mut pending = self.pending.lock().unwrap();
        match pending.remove(&id) {
            Some(PendingLink::Metadata(meta)) => Some(meta),
            previous => {
                if let Some(PendingLink::Url(old)) = previous {
                    tracing::debug!("{}: replaced pending URL {}", id, old);
                }
                pending.insert(id, PendingLink::Url(url));
                None
            }
        }
    }

    /// Takes a parked URL if present, otherwise parks `meta`
    ///
    /// Returns the URL when the caller now holds both halves and must
    /// dispatch the chapter.
    pub fn offer_metadata(&self, id: ChapterIdentity, meta: ChapterMeta) -> Option<Url> {
        let mut pending = self.pending.lock().unwrap();
        match pending.remove(&id) {
            Some(PendingLink::Url(url)) => Some(url),
            previous => {
                if let Some(PendingLink::Metadata(old)) = previous {
                    tracing::debug!("{}: replaced pending metadata '{}'", id, old.title);
                }
                pending.insert(id, PendingLink::Metadata(meta));
                None
            }
        }
    }

    /// Number of chapters still waiting for their other half
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Identities still waiting, sorted
    pub fn unresolved(&self) -> Vec<ChapterIdentity> {
        let mut ids: Vec<_> = self.pending.lock().unwrap().keys().copied().collect();
        ids.sort();
        ids
    }
}
