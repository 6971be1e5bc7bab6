//! Interval polling of syndication feeds.
//!
//! One task per unique feed URL regardless of how many destinations
//! subscribe. Each cycle fetches, filters entries through the age gate and
//! the persisted cursor, submits survivors in ascending timestamp order,
//! and advances the cursor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use tokio::sync::watch;
use tracing::{info, warn};

use vigil_core::config::FeedSpec;
use vigil_core::envelope::{EnvelopeSink, MessageEnvelope, SourceKind};

use crate::clean::strip_html;
use crate::cursor::FeedCursorLog;
use crate::error::{FeedError, Result};

/// Fixed poll cadence for every feed.
pub const POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Entries older than this are ignored even when the cursor would admit
/// them; guards against floods after extended downtime.
pub const MAX_ENTRY_AGE_DAYS: i64 = 2;

/// Summaries are truncated to this many characters.
pub const SUMMARY_MAX: usize = 1000;

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Per-cycle accounting, surfaced in the poll summary log line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollStats {
    pub new: usize,
    pub routed: usize,
    pub too_old: usize,
}

/// Polls feeds and emits envelopes into the pipeline.
pub struct FeedPoller {
    http: reqwest::Client,
    cursors: FeedCursorLog,
    sink: Arc<dyn EnvelopeSink>,
    poll_interval: Duration,
}

impl FeedPoller {
    pub fn new(cursors: FeedCursorLog, sink: Arc<dyn EnvelopeSink>) -> Self {
        Self {
            http: reqwest::Client::new(),
            cursors,
            sink,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Override the poll cadence (tests).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Poll `feed` forever, until shutdown is signalled.
    ///
    /// Fetch and parse failures are logged and the loop proceeds to the
    /// next tick; a feed is never abandoned.
    pub async fn run(&self, feed: FeedSpec, mut shutdown: watch::Receiver<bool>) {
        info!(feed = %feed.name, url = %feed.url, "feed poller started");
        loop {
            match self.poll_once(&feed).await {
                Ok(stats) => {
                    info!(
                        feed = %feed.name,
                        new = stats.new,
                        routed = stats.routed,
                        too_old = stats.too_old,
                        "feed polled"
                    );
                }
                Err(e) => warn!(feed = %feed.name, error = %e, "feed poll failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(feed = %feed.name, "feed poller stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One fetch-filter-submit cycle.
    pub async fn poll_once(&self, feed: &FeedSpec) -> Result<PollStats> {
        let bytes = self
            .http
            .get(&feed.url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let parsed =
            feed_rs::parser::parse(&bytes[..]).map_err(|e| FeedError::Parse(e.to_string()))?;

        let now = Utc::now();
        let cutoff = now - chrono::Duration::days(MAX_ENTRY_AGE_DAYS);
        // First run anchors the cursor at `now`, so that fetch emits nothing.
        let last_seen = self.cursors.read_or_init(&feed.name);

        let mut stats = PollStats::default();
        let mut fresh: Vec<(DateTime<Utc>, MessageEnvelope)> = Vec::new();
        for entry in &parsed.entries {
            let Some(ts) = entry_timestamp(entry) else {
                continue;
            };
            if ts < cutoff {
                stats.too_old += 1;
                continue;
            }
            if ts <= last_seen {
                continue;
            }
            fresh.push((ts, build_envelope(feed, entry, ts)));
        }
        fresh.sort_by_key(|(ts, _)| *ts);

        let mut newest = last_seen;
        for (ts, envelope) in fresh {
            stats.new += 1;
            if self.sink.submit(envelope).await {
                stats.routed += 1;
            }
            newest = newest.max(ts);
        }

        if newest > last_seen {
            if let Err(e) = self.cursors.write(&feed.name, newest) {
                warn!(feed = %feed.name, error = %e, "feed cursor write failed");
            }
        }
        Ok(stats)
    }
}

/// `updated` wins over `published`; entries with neither are skipped.
fn entry_timestamp(entry: &Entry) -> Option<DateTime<Utc>> {
    entry.updated.or(entry.published)
}

fn build_envelope(feed: &FeedSpec, entry: &Entry, ts: DateTime<Utc>) -> MessageEnvelope {
    let title = entry
        .title
        .as_ref()
        .map(|t| strip_html(&t.content))
        .unwrap_or_default();
    let link = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .unwrap_or_default();
    let mut summary = entry
        .summary
        .as_ref()
        .map(|t| strip_html(&t.content))
        .unwrap_or_default();
    if summary.chars().count() > SUMMARY_MAX {
        summary = summary.chars().take(SUMMARY_MAX).collect::<String>() + " ...";
    }

    let text: Vec<String> = [title, link, summary]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();

    let mut envelope = MessageEnvelope::new(
        SourceKind::Feed,
        feed.url.clone(),
        feed.name.clone(),
        feed.name.clone(),
        ts,
    );
    envelope.text = text.join("\n");
    envelope
}
