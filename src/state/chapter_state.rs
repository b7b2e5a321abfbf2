/// Chapter state definitions for the orchestrator's per-chapter state machine
use std::fmt;

/// Represents the current state of one chapter workflow
///
/// ```text
/// Idle -> Dispatched -> Accumulating -> Writing -> Done
///   |         |              |            |
///   v         +------> Failed <-----------+
/// Skipped
/// ```
///
/// Any non-final state may also move to `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChapterState {
    // ===== Active States =====
    /// Task exists but nothing has been issued yet
    Idle,

    /// First page fetch has been issued
    Dispatched,

    /// At least one fragment has arrived
    Accumulating,

    /// Content is being written to disk
    Writing,

    // ===== Final States =====
    /// Artifact saved and completion record committed
    Done,

    /// A completion record with a file on disk already existed
    Skipped,

    /// Error fragment, retry exhaustion, timeout, or write failure
    Failed,

    /// The crawl was cancelled before the chapter finished
    Cancelled,
}

impl ChapterState {
    /// Returns true if no further transitions are possible
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Skipped | Self::Failed | Self::Cancelled
        )
    }

    /// Returns true if the chapter is still in flight
    pub fn is_active(&self) -> bool {
        !self.is_final()
    }

    /// Returns true if the transition `self -> next` is allowed
    pub fn can_transition_to(&self, next: ChapterState) -> bool {
        use ChapterState::*;

        match (self, next) {
            (Idle, Dispatched) | (Idle, Skipped) => true,
            (Dispatched, Accumulating) | (Dispatched, Failed) => true,
            (Accumulating, Writing) | (Accumulating, Failed) => true,
            (Writing, Done) | (Writing, Failed) => true,
            (from, Cancelled) => from.is_active(),
            _ => false,
        }
    }

    /// Moves to `next`, rejecting transitions the state machine does not allow
    pub fn transition_to(self, next: ChapterState) -> Result<ChapterState, crate::ShioriError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(crate::ShioriError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Short lowercase name used in log lines and statistics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dispatched => "dispatched",
            Self::Accumulating => "accumulating",
            Self::Writing => "writing",
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ChapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
