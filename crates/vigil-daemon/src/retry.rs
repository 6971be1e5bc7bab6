//! Bounded-attempt backoff queue for failed deliveries.
//!
//! Schedule: 5 s after the initial failure, then 10 s and 20 s between
//! retries. After the third failed attempt the item is dropped — there is
//! no dead-letter queue; drops are visible only in logs and counters. The
//! queue is in-memory and intentionally not persisted across restarts.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info};

use vigil_core::config::Destination;
use vigil_core::envelope::SendOutcome;
use vigil_core::metrics::{self, MetricsCollector};

use crate::dispatch::Dispatch;

pub const MAX_ATTEMPTS: u32 = 3;
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
pub const TICK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct RetryItem {
    destination: Arc<Destination>,
    payload: String,
    media_path: Option<PathBuf>,
    attempt: u32,
    next_ready_at: Instant,
}

/// Multi-producer retry queue drained by a single background loop.
pub struct RetryQueue {
    items: Mutex<Vec<RetryItem>>,
    metrics: Arc<MetricsCollector>,
}

impl RetryQueue {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            metrics,
        }
    }

    /// Schedule a failed delivery for its first retry.
    pub fn enqueue(
        &self,
        destination: Arc<Destination>,
        payload: String,
        media_path: Option<PathBuf>,
        reason: &str,
    ) {
        info!(destination = %destination.name, reason, "delivery queued for retry");
        self.items.lock().unwrap().push(RetryItem {
            destination,
            payload,
            media_path,
            attempt: 1,
            next_ready_at: Instant::now() + INITIAL_BACKOFF,
        });
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tick loop; exits on shutdown. Unsent items are lost at shutdown by
    /// design.
    pub async fn run(&self, dispatch: Arc<dyn Dispatch>, mut shutdown: watch::Receiver<bool>) {
        info!("retry queue loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(TICK_INTERVAL) => {
                    self.tick(dispatch.as_ref()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let pending = self.len();
                        if pending > 0 {
                            info!(pending, "retry queue stopping with unsent items");
                        }
                        return;
                    }
                }
            }
        }
    }

    /// Attempt every due item once. Due items are snapshotted up front so
    /// concurrent enqueues during dispatch are safe.
    pub async fn tick(&self, dispatch: &dyn Dispatch) {
        let now = Instant::now();
        let due: Vec<RetryItem> = {
            let mut items = self.items.lock().unwrap();
            let mut due = Vec::new();
            let mut index = 0;
            while index < items.len() {
                if items[index].next_ready_at <= now {
                    due.push(items.swap_remove(index));
                } else {
                    index += 1;
                }
            }
            due
        };

        for mut item in due {
            let outcome = dispatch
                .dispatch(&item.destination, &item.payload, item.media_path.as_deref())
                .await;

            match outcome {
                SendOutcome::Sent => {
                    self.metrics.increment(metrics::RETRY_SUCCEEDED);
                    info!(
                        destination = %item.destination.name,
                        attempt = item.attempt,
                        "retry succeeded"
                    );
                }
                SendOutcome::RateLimited(_) | SendOutcome::Failed => {
                    if item.attempt >= MAX_ATTEMPTS {
                        self.metrics.increment(metrics::RETRY_DROPPED);
                        error!(
                            destination = %item.destination.name,
                            attempts = item.attempt,
                            "message dropped after exhausting retries"
                        );
                        continue;
                    }
                    item.attempt += 1;
                    let backoff = INITIAL_BACKOFF * 2u32.pow(item.attempt - 1);
                    item.next_ready_at = Instant::now() + backoff;
                    info!(
                        destination = %item.destination.name,
                        attempt = item.attempt,
                        backoff_secs = backoff.as_secs(),
                        "retry failed, backing off"
                    );
                    self.items.lock().unwrap().push(item);
                }
            }
        }
    }
}
