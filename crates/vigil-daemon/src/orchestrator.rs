//! The per-envelope pipeline and the daemon wiring around it.
//!
//! `Orchestrator::handle` is the pipeline state machine: preprocess
//! (media download, OCR, defanged URL, attachment text), route, apply the
//! per-destination parser/formatter/sender, queue failures for retry, and
//! finally release the downloaded media file. The handler never propagates
//! an error upward; partial failures are logged and counted.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use vigil_core::envelope::{
    EnvelopeSink, MediaNote, MessageEnvelope, SourceKind, META_DEFANGED_SOURCE_URL,
    META_SOURCE_URL,
};
use vigil_core::metrics::{self, MetricsCollector};
use vigil_core::{allow, defang, extract, parse, DestinationKind, Matched, Router};
use vigil_ocr::OcrEngine;

use crate::dispatch::Dispatch;
use crate::retry::RetryQueue;

/// On-disk layout under the state directory.
#[derive(Debug, Clone)]
pub struct StatePaths {
    base: PathBuf,
}

impl StatePaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Transient downloaded media; purged at startup, emptied per envelope.
    pub fn attachments(&self) -> PathBuf {
        self.base.join("attachments")
    }

    /// Persistent feed cursors.
    pub fn rsslog(&self) -> PathBuf {
        self.base.join("rsslog")
    }

    /// Chat cursors; cleared on clean shutdown.
    pub fn telegramlog(&self) -> PathBuf {
        self.base.join("telegramlog")
    }

    pub fn metrics_file(&self) -> PathBuf {
        self.base.join("metrics.json")
    }

    /// Remove attachment stragglers left behind by a previous crash.
    pub fn purge_attachments(&self) {
        let dir = self.attachments();
        if dir.exists() {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => info!(dir = %dir.display(), "purged stale attachments"),
                Err(e) => warn!(dir = %dir.display(), error = %e, "attachment purge failed"),
            }
        }
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %e, "attachment dir creation failed");
        }
    }
}

/// Owns the shared pipeline state and processes one envelope at a time per
/// source task.
pub struct Orchestrator {
    router: Router,
    metrics: Arc<MetricsCollector>,
    retry: Arc<RetryQueue>,
    senders: Arc<dyn Dispatch>,
    ocr: OcrEngine,
    attachments_dir: PathBuf,
}

#[async_trait]
impl EnvelopeSink for Orchestrator {
    async fn submit(&self, envelope: MessageEnvelope) -> bool {
        self.handle(envelope).await
    }
}

impl Orchestrator {
    pub fn new(
        router: Router,
        metrics: Arc<MetricsCollector>,
        retry: Arc<RetryQueue>,
        senders: Arc<dyn Dispatch>,
        attachments_dir: PathBuf,
    ) -> Self {
        Self {
            router,
            metrics,
            retry,
            senders,
            ocr: OcrEngine::new(),
            attachments_dir,
        }
    }

    /// Run one envelope through the full pipeline. Returns whether at least
    /// one destination accepted it.
    pub async fn handle(&self, mut envelope: MessageEnvelope) -> bool {
        match envelope.source_kind {
            SourceKind::Chat => self.metrics.increment(metrics::MESSAGES_RECEIVED_CHAT),
            SourceKind::Feed => self.metrics.increment(metrics::MESSAGES_RECEIVED_FEED),
        }

        let attachment_text = self.preprocess(&mut envelope).await;

        let selected = self
            .router
            .destinations(&envelope, attachment_text.as_deref());
        if selected.is_empty() {
            self.metrics.increment(metrics::NO_DESTINATION);
            info!(
                channel = %envelope.channel_name,
                author = %envelope.author,
                "no destinations"
            );
            self.cleanup(&envelope);
            return false;
        }

        let media_safe = allow::is_safe(
            envelope.media_filename.as_deref(),
            envelope.media_mime.as_deref(),
        );

        // Download once if any selected destination will actually get the
        // media.
        if envelope.has_media
            && selected
                .iter()
                .any(|m| !m.rule.restricted || media_safe)
        {
            self.ensure_media(&mut envelope).await;
        }

        let mut delivered = 0usize;
        for matched in &selected {
            if self.deliver(&envelope, matched, media_safe).await {
                delivered += 1;
            }
        }

        if delivered > 0 {
            self.metrics.increment(metrics::ROUTED_SUCCESS);
        } else {
            self.metrics.increment(metrics::ROUTED_FAILED);
        }

        self.cleanup(&envelope);
        delivered > 0
    }

    /// Preprocessing: OCR, defanged source URL, and attachment text for
    /// keyword search. Every step is best-effort; failures degrade to
    /// partial information.
    async fn preprocess(&self, envelope: &mut MessageEnvelope) -> Option<String> {
        if envelope.source_kind != SourceKind::Chat {
            return None;
        }

        if envelope.has_media
            && self.router.needs_ocr(&envelope.channel_id)
            && self.ocr.available()
        {
            envelope.ocr_enabled = true;
            self.ensure_media(envelope).await;
            if let Some(path) = envelope.media_path.clone() {
                self.metrics.increment(metrics::OCR_PROCESSED);
                envelope.ocr_text = self.ocr.extract(&path).await;
            }
        }

        if let Some(url) = envelope.metadata.get(META_SOURCE_URL) {
            let defanged = defang::defang(url);
            envelope
                .metadata
                .insert(META_DEFANGED_SOURCE_URL.to_string(), defanged);
        }

        if envelope.has_media && self.router.needs_attachment_scan(&envelope.channel_id) {
            let filename = envelope.media_filename.clone();
            let mime = envelope.media_mime.clone();
            if allow::is_safe(filename.as_deref(), mime.as_deref()) {
                self.ensure_media(envelope).await;
                if let Some(path) = &envelope.media_path {
                    return extract::read_searchable(path, filename.as_deref(), mime.as_deref());
                }
            }
        }
        None
    }

    /// Parser → formatter → sender for one destination; failures go to the
    /// retry queue.
    async fn deliver(
        &self,
        envelope: &MessageEnvelope,
        matched: &Matched,
        media_safe: bool,
    ) -> bool {
        let include_media = envelope.has_media
            && (!matched.rule.restricted || media_safe)
            && envelope.media_path.is_some();
        let media_note = if envelope.has_media && !include_media {
            if matched.rule.restricted && !media_safe {
                Some(MediaNote::Filtered)
            } else {
                Some(MediaNote::Undeliverable)
            }
        } else {
            None
        };

        let parsed = parse::apply(matched.rule.parser, envelope);
        let payload = match matched.destination.kind {
            DestinationKind::Webhook => {
                vigil_webhook::format_message(&parsed, &matched.matched_keywords, media_note)
            }
            DestinationKind::Chat => vigil_telegram::format::format_message(
                &parsed,
                &matched.matched_keywords,
                media_note,
            ),
        };
        let media_path = if include_media {
            envelope.media_path.clone()
        } else {
            None
        };

        let outcome = self
            .senders
            .dispatch(&matched.destination, &payload, media_path.as_deref())
            .await;

        match outcome {
            vigil_core::SendOutcome::Sent => {
                info!(
                    channel = %envelope.channel_name,
                    destination = %matched.destination.name,
                    "delivered"
                );
                true
            }
            vigil_core::SendOutcome::RateLimited(wait) => {
                self.metrics.increment(metrics::QUEUED_RETRY);
                self.retry.enqueue(
                    Arc::clone(&matched.destination),
                    payload,
                    media_path,
                    &format!("rate limited for {}s", wait.as_secs()),
                );
                false
            }
            vigil_core::SendOutcome::Failed => {
                self.metrics.increment(metrics::QUEUED_RETRY);
                self.retry.enqueue(
                    Arc::clone(&matched.destination),
                    payload,
                    media_path,
                    "send error",
                );
                false
            }
        }
    }

    /// Download the envelope's media if not already on disk.
    async fn ensure_media(&self, envelope: &mut MessageEnvelope) {
        if envelope.media_path.is_some() || !envelope.has_media {
            return;
        }
        let Some(handle) = envelope.original.clone() else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(&self.attachments_dir) {
            warn!(error = %e, "attachment dir creation failed");
            return;
        }
        match handle.fetch(&self.attachments_dir).await {
            Some(path) => envelope.media_path = Some(path),
            None => warn!(channel = %envelope.channel_name, "media download failed"),
        }
    }

    /// Release the downloaded media file. Runs on every exit path of the
    /// handler; deletion failures are logged and swallowed.
    fn cleanup(&self, envelope: &MessageEnvelope) {
        let Some(path) = &envelope.media_path else {
            return;
        };
        if !path.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "media cleanup failed");
        }
    }
}
