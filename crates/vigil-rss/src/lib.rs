//! RSS/Atom feed source: interval polling with age-bounded deduplication.

pub mod clean;
pub mod cursor;
pub mod error;
pub mod source;

pub use cursor::FeedCursorLog;
pub use error::{FeedError, Result};
pub use source::{FeedPoller, PollStats, MAX_ENTRY_AGE_DAYS, POLL_INTERVAL};
