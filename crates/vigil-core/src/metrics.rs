//! In-memory session counters with periodic JSON snapshots.
//!
//! Counters reset on every startup; the snapshot file is write-only state
//! used for observability, never read back for correctness.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, warn};

pub const MESSAGES_RECEIVED_CHAT: &str = "messages_received_chat";
pub const MESSAGES_RECEIVED_FEED: &str = "messages_received_feed";
pub const NO_DESTINATION: &str = "no_destination";
pub const MISSED_CAUGHT: &str = "missed_caught";
pub const SENT_CHAT: &str = "sent_chat";
pub const SENT_WEBHOOK: &str = "sent_webhook";
pub const ROUTED_SUCCESS: &str = "routed_success";
pub const ROUTED_FAILED: &str = "routed_failed";
pub const QUEUED_RETRY: &str = "queued_retry";
pub const RETRY_SUCCEEDED: &str = "retry_succeeded";
pub const RETRY_DROPPED: &str = "retry_dropped";
pub const OCR_PROCESSED: &str = "ocr_processed";
pub const SECONDS_RAN: &str = "seconds_ran";

/// Session counter store shared across all pipeline tasks.
#[derive(Debug)]
pub struct MetricsCollector {
    counters: Mutex<BTreeMap<String, u64>>,
    started: Instant,
    path: PathBuf,
}

impl MetricsCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            counters: Mutex::new(BTreeMap::new()),
            started: Instant::now(),
            path: path.into(),
        }
    }

    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, value: u64) {
        let mut counters = self.counters.lock().unwrap();
        *counters.entry(name.to_string()).or_insert(0) += value;
    }

    pub fn set(&self, name: &str, value: u64) {
        self.counters
            .lock()
            .unwrap()
            .insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters.lock().unwrap().clone()
    }

    /// Write the current counters to the snapshot file.
    ///
    /// Stamps [`SECONDS_RAN`] first. Best-effort: failures are logged at
    /// warning level and swallowed.
    pub fn save(&self) {
        self.set(SECONDS_RAN, self.started.elapsed().as_secs());

        let snapshot = self.snapshot();
        let body = match serde_json::to_string_pretty(&snapshot) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "metrics serialization failed");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "metrics directory creation failed");
                return;
            }
        }
        if let Err(e) = std::fs::write(&self.path, body) {
            warn!(path = %self.path.display(), error = %e, "metrics snapshot failed");
        } else {
            debug!(path = %self.path.display(), "metrics snapshot written");
        }
    }
}
