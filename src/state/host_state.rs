use std::time::Duration;
use tokio::time::Instant;

/// Tracks request spacing for one host
///
/// Each request start reserves a slot at least `delay` after the previous
/// reservation, so concurrent callers queue up behind one another instead of
/// all firing the moment the previous delay elapses.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    /// Number of requests started against this host
    pub request_count: u64,

    /// Start time reserved by the most recent request
    pub last_slot: Option<Instant>,
}

impl HostState {
    /// Creates a new HostState with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next request slot and returns how long the caller must wait
    ///
    /// # Arguments
    ///
    /// * `delay` - Minimum spacing between request starts
    /// * `now` - The current time instant
    pub fn reserve(&mut self, delay: Duration, now: Instant) -> Duration {
        let slot = match self.last_slot {
            Some(last) => std::cmp::max(now, last + delay),
            None => now,
        };

        self.last_slot = Some(slot);
        self.request_count += 1;
        slot.saturating_duration_since(now)
    }
}
