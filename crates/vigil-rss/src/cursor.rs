//! Persistent per-feed cursor files.
//!
//! One file per unique feed, holding the RFC 3339 timestamp of the last
//! processed entry. Unlike the chat cursors, these survive restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct FeedCursorLog {
    dir: PathBuf,
}

impl FeedCursorLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Read the cursor for `feed_name`, initializing it to `now` when the
    /// feed is seen for the first time (or the file is corrupt).
    ///
    /// Anchoring a fresh cursor at `now` is what keeps a newly-added feed
    /// from flooding destinations with its whole backlog.
    pub fn read_or_init(&self, feed_name: &str) -> DateTime<Utc> {
        let path = self.path(feed_name);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let content = content.trim();
                match DateTime::parse_from_rfc3339(content) {
                    Ok(ts) => return ts.with_timezone(&Utc),
                    Err(e) => {
                        warn!(feed = %feed_name, error = %e, "corrupt feed cursor, re-anchoring at now");
                    }
                }
            }
            Err(_) => {
                info!(feed = %feed_name, "feed cursor initialized");
            }
        }

        let now = Utc::now();
        if let Err(e) = self.write(feed_name, now) {
            warn!(feed = %feed_name, error = %e, "feed cursor write failed");
        }
        now
    }

    pub fn write(&self, feed_name: &str, ts: DateTime<Utc>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path(feed_name), ts.to_rfc3339())?;
        Ok(())
    }

    fn path(&self, feed_name: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", sanitize(feed_name)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Make a feed name safe to use as a filename.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
