//! Per-destination cooldown tracking.
//!
//! Keys are kind-qualified (`webhook:<url>`, `chat:<id>`) so a Discord
//! `retry_after` and a Telegram flood wait are tracked independently.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

/// Cooldown table mapping destination key to a monotonic deadline.
#[derive(Debug, Default)]
pub struct RateLimiter {
    deadlines: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until any active cooldown for `key` has passed, then clear it.
    ///
    /// Returns immediately when no cooldown is active. Never fails — it
    /// only delays.
    pub async fn reserve(&self, key: &str) {
        let wait = {
            let mut deadlines = self.deadlines.lock().await;
            match deadlines.get(key) {
                Some(deadline) if *deadline > Instant::now() => *deadline - Instant::now(),
                _ => {
                    deadlines.remove(key);
                    return;
                }
            }
        };
        info!(key, wait_secs = wait.as_secs_f64(), "rate limited, waiting before send");
        tokio::time::sleep(wait).await;
        self.deadlines.lock().await.remove(key);
    }

    /// Record a platform-imposed cooldown for `key`, rounded up to whole
    /// seconds.
    pub async fn register(&self, key: &str, wait: Duration) {
        let rounded = Duration::from_secs(wait.as_secs_f64().ceil() as u64);
        warn!(key, wait_secs = rounded.as_secs(), "rate limit registered");
        self.deadlines
            .lock()
            .await
            .insert(key.to_string(), Instant::now() + rounded);
    }
}

/// Canonical cooldown key for a destination endpoint.
pub fn limit_key(kind_label: &str, endpoint: &str) -> String {
    format!("{kind_label}:{endpoint}")
}
