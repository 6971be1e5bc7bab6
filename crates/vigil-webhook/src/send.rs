//! Webhook wire delivery: chunked POSTs with rate-limit awareness.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use vigil_core::chunk::chunk_text;
use vigil_core::envelope::SendOutcome;
use vigil_core::metrics::{self, MetricsCollector};
use vigil_core::ratelimit::{limit_key, RateLimiter};

/// Webhook message length limit.
pub const MAX_MSG_LEN: usize = 2000;

/// Files above this are not attached (free-tier webhook upload cap).
pub const MAX_FILE_BYTES: u64 = 25 * 1024 * 1024;

/// Identity presented in the webhook payload.
const SENDER_USERNAME: &str = "vigil";

const TEXT_TIMEOUT: Duration = Duration::from_secs(5);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Sends formatted bodies to webhook endpoints.
///
/// Bodies are chunked at [`MAX_MSG_LEN`]; media rides on the first chunk
/// only. HTTP 429 responses register a cooldown on the shared rate limiter
/// and surface as [`SendOutcome::RateLimited`].
pub struct WebhookSender {
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsCollector>,
}

impl WebhookSender {
    pub fn new(limiter: Arc<RateLimiter>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            http: reqwest::Client::new(),
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
        self.limiter.reserve(&limit_key("webhook", endpoint)).await;

        let media = attachable(media_path);
        let chunks = chunk_text(body, MAX_MSG_LEN);
        for (index, chunk) in chunks.iter().enumerate() {
            let outcome = match (index, &media) {
                (0, Some(path)) => self.post_multipart(endpoint, chunk, path).await,
                _ => self.post_json(endpoint, chunk).await,
            };
            if outcome != SendOutcome::Sent {
                return outcome;
            }
        }
        SendOutcome::Sent
    }

    async fn post_json(&self, endpoint: &str, content: &str) -> SendOutcome {
        let payload = serde_json::json!({
            "username": SENDER_USERNAME,
            "content": content,
        });
        let response = self
            .http
            .post(endpoint)
            .timeout(TEXT_TIMEOUT)
            .json(&payload)
            .send()
            .await;
        self.classify(endpoint, response).await
    }

    async fn post_multipart(&self, endpoint: &str, content: &str, path: &Path) -> SendOutcome {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "attachment unreadable, sending text only");
                return self.post_json(endpoint, content).await;
            }
        };
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let form = reqwest::multipart::Form::new()
            .text("username", SENDER_USERNAME)
            .text("content", content.to_string())
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        let response = self
            .http
            .post(endpoint)
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await;
        self.classify(endpoint, response).await
    }

    async fn classify(
        &self,
        endpoint: &str,
        response: reqwest::Result<reqwest::Response>,
    ) -> SendOutcome {
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "webhook request failed");
                return SendOutcome::Failed;
            }
        };

        let status = response.status();
        if status.as_u16() == 429 {
            let wait = retry_after(response).await;
            self.limiter
                .register(&limit_key("webhook", endpoint), wait)
                .await;
            return SendOutcome::RateLimited(wait);
        }
        if status.is_success() {
            debug!("webhook chunk delivered");
            self.metrics.increment(metrics::SENT_WEBHOOK);
            return SendOutcome::Sent;
        }

        let body = response.text().await.unwrap_or_default();
        error!(
            status = status.as_u16(),
            body = %body.chars().take(200).collect::<String>(),
            "webhook rejected message"
        );
        SendOutcome::Failed
    }
}

/// Parse `retry_after` seconds out of a 429 body, defaulting to 1 s.
async fn retry_after(response: reqwest::Response) -> Duration {
    let seconds = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| body.get("retry_after").and_then(|v| v.as_f64()))
        .unwrap_or_else(|| {
            warn!("rate limited (429) without parseable retry_after");
            1.0
        });
    Duration::from_secs_f64(seconds.max(0.0))
}

/// Resolve a media path to something attachable: present on disk and within
/// the upload cap. Retries may reference an already-cleaned file; that
/// degrades to text-only delivery.
fn attachable(media_path: Option<&Path>) -> Option<PathBuf> {
    let path = media_path?;
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() <= MAX_FILE_BYTES => Some(path.to_path_buf()),
        Ok(meta) => {
            warn!(
                path = %path.display(),
                size = meta.len(),
                "attachment exceeds upload cap, sending text only"
            );
            None
        }
        Err(_) => {
            debug!(path = %path.display(), "attachment no longer on disk");
            None
        }
    }
}
