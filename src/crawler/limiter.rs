//! Per-host rate limiting
//!
//! This module handles:
//! - Per-host concurrency limits via semaphores
//! - Minimum spacing between request starts to the same host
//!
//! The limiter is the only throttle in the crawler. Retries go through it
//! exactly like fresh requests.
//!
//! Time spent queued for a host is not progress, but it is not a stall either.
//! A [`QueueWatch`] attached to a request reports when the request starts
//! waiting for its host slot and when it is admitted.

use crate::state::HostState;
use crate::url::host_of;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use url::Url;

/// Per-host `{delay, parallelism}` limit supplied by book configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLimit {
    /// Minimum time between request starts
    pub delay: Duration,
    /// Maximum requests in flight
    pub parallelism: u32,
}

impl Default for HostLimit {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(500),
            parallelism: 4,
        }
    }
}

/// Told when a request starts waiting for its host slot and when it gets one
pub trait QueueObserver: Send + Sync {
    fn waiting(&self);
    fn admitted(&self);
}

/// Cloneable handle to a [`QueueObserver`], carried on requests
#[derive(Clone)]
pub struct QueueWatch(Arc<dyn QueueObserver>);

impl QueueWatch {
    pub fn new(observer: impl QueueObserver + 'static) -> Self {
        Self(Arc::new(observer))
    }

    /// Reports the request as waiting until the returned ticket is dropped
    pub fn enter(&self) -> QueueTicket<'_> {
        self.0.waiting();
        QueueTicket { watch: self }
    }
}

impl fmt::Debug for QueueWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueWatch")
    }
}

/// Reports admission on drop, including when the wait is abandoned
pub struct QueueTicket<'a> {
    watch: &'a QueueWatch,
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.watch.0.admitted();
    }
}

/// Held for the duration of one request; releases the host slot on drop
pub struct HostPermit {
    _permit: OwnedSemaphorePermit,
}

struct HostSlot {
    semaphore: Arc<Semaphore>,
    state: Mutex<HostState>,
}

/// Rate limiter shared by every fetch in the process
///
/// The first limit seen for a host fixes that host's parallelism; the delay
/// of each request is taken from the request's own limit so books sharing a
/// host keep their configured spacing.
#[derive(Default)]
pub struct HostLimiter {
    hosts: Mutex<HashMap<String, Arc<HostSlot>>>,
}

impl HostLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until a request to `url` may start
    ///
    /// Returns `None` only if the host's semaphore was closed, which never
    /// happens while the limiter is alive.
    pub async fn acquire(&self, url: &Url, limit: HostLimit) -> Option<HostPermit> {
        let host = host_of(url);
        let slot = self.slot(&host, limit);

        let permit = slot.semaphore.clone().acquire_owned().await.ok()?;

        let wait = {
            let mut state = slot.state.lock().unwrap();
            state.reserve(limit.delay, Instant::now())
        };

        if !wait.is_zero() {
            tracing::trace!("Delaying request to {} by {:?}", host, wait);
            tokio::time::sleep(wait).await;
        }

        Some(HostPermit { _permit: permit })
    }

    /// Number of request starts recorded for a host
    pub fn request_count(&self, host: &str) -> u64 {
        let hosts = self.hosts.lock().unwrap();
        hosts
            .get(host)
            .map(|slot| slot.state.lock().unwrap().request_count)
            .unwrap_or(0)
    }

    fn slot(&self, host: &str, limit: HostLimit) -> Arc<HostSlot> {
        let mut hosts = self.hosts.lock().unwrap();
        hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                tracing::debug!(
                    "Registering host {} (delay {:?}, parallelism {})",
                    host,
                    limit.delay,
                    limit.parallelism
                );
                Arc::new(HostSlot {
                    semaphore: Arc::new(Semaphore::new(limit.parallelism.max(1) as usize)),
                    state: Mutex::new(HostState::new()),
                })
            })
            .clone()
    }
}
