//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `ChapterState`: lifecycle of one chapter workflow (idle, dispatched, accumulating, ...)
//! - `HostState`: per-host request spacing used by the rate limiter

mod chapter_state;
mod host_state;

// Re-export main types
pub use chapter_state::ChapterState;
pub use host_state::HostState;
