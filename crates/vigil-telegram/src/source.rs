//! Live subscription plus gap recovery for monitored chat channels.
//!
//! The event path and the polling path feed the same envelope builder, so a
//! recovered message is indistinguishable downstream from one that arrived
//! live. Cursors advance only after the pipeline has accepted a message.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use vigil_core::defang;
use vigil_core::envelope::{
    EnvelopeSink, MessageEnvelope, ReplyContext, SourceKind, META_SOURCE_URL, REPLY_TEXT_MAX,
};
use vigil_core::metrics::{self, MetricsCollector};

use crate::client::{ChatClient, ChatMessage, ChatRef};
use crate::cursor::ChatCursorLog;

/// Cadence of the per-channel gap-recovery scan.
pub const GAP_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// A configured channel bound to its resolved chat.
#[derive(Debug, Clone)]
pub struct MonitoredChannel {
    /// The key as written in the config document; envelopes carry this so
    /// routing matches exactly.
    pub config_key: String,
    pub chat: ChatRef,
}

/// The chat source: owns channel resolution, the event loop, and the
/// per-channel recovery loops.
pub struct ChatSource {
    client: Arc<dyn ChatClient>,
    cursors: ChatCursorLog,
    metrics: Arc<MetricsCollector>,
    channels: Vec<MonitoredChannel>,
}

impl ChatSource {
    /// Resolve every configured channel key. Unresolvable channels are
    /// logged and skipped; the source runs with whatever resolved.
    pub async fn connect(
        client: Arc<dyn ChatClient>,
        cursors: ChatCursorLog,
        metrics: Arc<MetricsCollector>,
        channel_keys: &[&str],
    ) -> Self {
        let mut channels = Vec::new();
        for key in channel_keys {
            match client.resolve(key).await {
                Ok(chat) => {
                    info!(key, id = %chat.marked_id, name = %chat.display_name, "channel resolved");
                    channels.push(MonitoredChannel {
                        config_key: key.to_string(),
                        chat,
                    });
                }
                Err(e) => warn!(key, error = %e, "channel resolution failed, skipping"),
            }
        }
        info!(
            configured = channel_keys.len(),
            resolved = channels.len(),
            "chat source connected"
        );
        Self {
            client,
            cursors,
            metrics,
            channels,
        }
    }

    pub fn channels(&self) -> &[MonitoredChannel] {
        &self.channels
    }

    /// Startup proof: fetch the latest message per channel, log the
    /// connection block, and anchor the cursor at that message.
    pub async fn startup_proof(&self) {
        for channel in &self.channels {
            match self.client.latest_message(&channel.chat).await {
                Ok(Some(latest)) => {
                    info!(
                        channel = %channel.chat.display_name,
                        author = %latest.author,
                        timestamp = %latest.timestamp,
                        "connection established"
                    );
                    if let Err(e) = self.cursors.init(
                        &channel.config_key,
                        &channel.chat.display_name,
                        latest.id,
                    ) {
                        warn!(channel = %channel.config_key, error = %e, "cursor init failed");
                    }
                }
                Ok(None) => {
                    info!(channel = %channel.chat.display_name, "connection established (empty channel)");
                    let _ = self
                        .cursors
                        .init(&channel.config_key, &channel.chat.display_name, 0);
                }
                Err(e) => {
                    warn!(channel = %channel.chat.display_name, error = %e, "startup fetch failed");
                }
            }
        }
    }

    /// Drive the live subscription until shutdown.
    ///
    /// Events for chats outside the monitored set are dropped. Event errors
    /// are logged and the loop continues; the subscription is never
    /// abandoned.
    pub async fn run_events(&self, sink: Arc<dyn EnvelopeSink>, mut shutdown: watch::Receiver<bool>) {
        info!("chat event loop started");
        loop {
            tokio::select! {
                event = self.client.next_event() => {
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "event subscription hiccup");
                            continue;
                        }
                    };
                    let Some(channel) = self.channel_for(&event.chat_marked_id) else {
                        continue;
                    };
                    self.process_message(channel, event.message, &sink).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("chat event loop stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Periodically scan one channel for messages the subscription missed.
    pub async fn run_gap_recovery(
        &self,
        channel: MonitoredChannel,
        sink: Arc<dyn EnvelopeSink>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(GAP_POLL_INTERVAL) => {
                    self.recover_gap(&channel, &sink).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// One recovery scan: everything with id above the cursor, in ascending
    /// id order, through the normal pipeline.
    pub async fn recover_gap(&self, channel: &MonitoredChannel, sink: &Arc<dyn EnvelopeSink>) {
        let Some(cursor) = self.cursors.read(&channel.config_key) else {
            return;
        };
        let missed = match self.client.messages_after(&channel.chat, cursor).await {
            Ok(missed) => missed,
            Err(e) => {
                warn!(channel = %channel.chat.display_name, error = %e, "gap scan failed");
                return;
            }
        };
        if missed.is_empty() {
            return;
        }
        info!(
            channel = %channel.chat.display_name,
            count = missed.len(),
            "recovering missed messages"
        );
        for message in missed {
            self.metrics.increment(metrics::MISSED_CAUGHT);
            self.process_message(channel, message, sink).await;
        }
    }

    /// Delete all chat cursors (clean shutdown).
    pub fn shutdown(&self) {
        self.cursors.clear_all();
    }

    async fn process_message(
        &self,
        channel: &MonitoredChannel,
        message: ChatMessage,
        sink: &Arc<dyn EnvelopeSink>,
    ) {
        let id = message.id;
        let envelope = self.build_envelope(channel, message).await;
        sink.submit(envelope).await;
        // Cursor moves once the pipeline has seen the message, so a crash
        // mid-handling re-delivers rather than drops.
        self.cursors
            .update(&channel.config_key, &channel.chat.display_name, id);
    }

    async fn build_envelope(
        &self,
        channel: &MonitoredChannel,
        message: ChatMessage,
    ) -> MessageEnvelope {
        let mut envelope = MessageEnvelope::new(
            SourceKind::Chat,
            channel.config_key.clone(),
            channel.chat.display_name.clone(),
            message.author,
            message.timestamp,
        );
        envelope.text = message.text;
        envelope.message_id = Some(message.id);

        if let Some(media) = message.media {
            envelope.has_media = true;
            envelope.media_kind = media.kind;
            envelope.media_filename = media.filename;
            envelope.media_mime = media.mime;
        }
        envelope.original = message.media_handle;

        if let Some(url) = defang::message_url(channel.chat.key(), message.id) {
            envelope.metadata.insert(META_SOURCE_URL.to_string(), url);
        }

        if let Some(reply_id) = message.reply_to {
            envelope.reply_context = self.reply_context(&channel.chat, reply_id).await;
        }

        envelope
    }

    async fn reply_context(&self, chat: &ChatRef, reply_id: i32) -> Option<ReplyContext> {
        let replied = match self.client.get_message(chat, reply_id).await {
            Ok(replied) => replied?,
            Err(e) => {
                warn!(chat = %chat.display_name, reply_id, error = %e, "reply lookup failed");
                return None;
            }
        };

        let mut text: String = replied.text.chars().take(REPLY_TEXT_MAX).collect();
        if replied.text.chars().count() > REPLY_TEXT_MAX {
            text.push_str(" ...");
        }
        let media_kind = replied
            .media
            .as_ref()
            .map(|m| m.kind)
            .unwrap_or_default();
        Some(ReplyContext {
            author: replied.author,
            timestamp: replied.timestamp,
            text,
            media_kind,
            has_media: replied.media.is_some(),
        })
    }

    fn channel_for(&self, marked_id: &str) -> Option<&MonitoredChannel> {
        self.channels
            .iter()
            .find(|channel| channel.chat.marked_id == marked_id)
    }
}
