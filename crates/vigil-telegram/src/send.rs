//! Chat wire delivery: chunking, captions, and the caption-overflow branch.

use std::path::Path;
use std::sync::Arc;

use tracing::error;

use vigil_core::chunk::chunk_text;
use vigil_core::envelope::SendOutcome;
use vigil_core::metrics::{self, MetricsCollector};
use vigil_core::ratelimit::{limit_key, RateLimiter};

use crate::client::ChatClient;
use crate::error::{Result, TelegramError};

/// Message body limit.
pub const BODY_MAX: usize = 4096;

/// Media caption limit.
pub const CAPTION_MAX: usize = 1024;

/// Sends formatted bodies to chat destinations.
///
/// The caption-overflow branch is the load-bearing part: a body longer than
/// [`CAPTION_MAX`] would silently truncate as a caption, so the media goes
/// out captionless first, followed by the body in [`BODY_MAX`] chunks.
pub struct ChatSender {
    client: Arc<dyn ChatClient>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsCollector>,
}

impl ChatSender {
    pub fn new(
        client: Arc<dyn ChatClient>,
        limiter: Arc<RateLimiter>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            client,
            limiter,
            metrics,
        }
    }

    pub async fn send(
        &self,
        endpoint: &str,
        body: &str,
        media_path: Option<&Path>,
    ) -> SendOutcome {
        self.limiter.reserve(&limit_key("chat", endpoint)).await;

        // A retry may reference media the orchestrator already cleaned up.
        let media = media_path.filter(|path| path.exists());

        match self.deliver(endpoint, body, media).await {
            Ok(()) => SendOutcome::Sent,
            Err(TelegramError::FloodWait(wait)) => {
                self.limiter
                    .register(&limit_key("chat", endpoint), wait)
                    .await;
                SendOutcome::RateLimited(wait)
            }
            Err(e) => {
                error!(endpoint, error = %e, "chat send failed");
                SendOutcome::Failed
            }
        }
    }

    async fn deliver(&self, endpoint: &str, body: &str, media: Option<&Path>) -> Result<()> {
        match media {
            None => self.send_chunked(endpoint, body).await,
            Some(path) if body.len() <= CAPTION_MAX => {
                let caption = (!body.is_empty()).then_some(body);
                self.client.send_file(endpoint, path, caption).await?;
                self.metrics.increment(metrics::SENT_CHAT);
                Ok(())
            }
            Some(path) => {
                // Caption overflow: captionless media first, then the body.
                self.client.send_file(endpoint, path, None).await?;
                self.metrics.increment(metrics::SENT_CHAT);
                self.send_chunked(endpoint, body).await
            }
        }
    }

    async fn send_chunked(&self, endpoint: &str, body: &str) -> Result<()> {
        for chunk in chunk_text(body, BODY_MAX) {
            self.client.send_text(endpoint, &chunk).await?;
            self.metrics.increment(metrics::SENT_CHAT);
        }
        Ok(())
    }
}
