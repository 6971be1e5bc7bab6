//! Library-agnostic view of the chat platform.
//!
//! The pipeline, the gap-recovery protocol and the sender all work against
//! [`ChatClient`]; the MTProto binding in [`crate::mtproto`] is the only
//! module that knows the underlying library. Tests substitute mock
//! implementations.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vigil_core::envelope::{MediaHandle, MediaKind};

use crate::error::Result;

/// A resolved chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatRef {
    /// Signed numeric id in the conventional marked form (`-100…` for
    /// channels and supergroups).
    pub marked_id: String,
    /// `@handle` when the chat is public.
    pub handle: Option<String>,
    /// Display name: the handle when public, the title otherwise.
    pub display_name: String,
}

impl ChatRef {
    /// Preferred key for URLs and logs: handle when public, marked id
    /// otherwise.
    pub fn key(&self) -> &str {
        self.handle.as_deref().unwrap_or(&self.marked_id)
    }
}

/// Media description carried alongside a message.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub kind: MediaKind,
    /// Original filename for documents, when the platform exposes one.
    pub filename: Option<String>,
    /// Declared MIME type for documents.
    pub mime: Option<String>,
}

/// A platform message, already shorn of library-specific types.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: i32,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub media: Option<MediaInfo>,
    /// Id of the message this one replies to, if any.
    pub reply_to: Option<i32>,
    /// Downloader for the attached media, if any.
    pub media_handle: Option<MediaHandle>,
}

/// Inbound event from the live subscription.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    /// Marked id of the chat the message arrived in.
    pub chat_marked_id: String,
    pub message: ChatMessage,
}

/// The chat-platform binding surface.
///
/// Send operations report platform back-pressure as
/// [`crate::error::TelegramError::FloodWait`]; everything else maps onto the
/// remaining error variants.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Resolve `@handle` or signed-numeric-id to a chat.
    async fn resolve(&self, key: &str) -> Result<ChatRef>;

    /// The newest message in a chat, if the history is non-empty.
    async fn latest_message(&self, chat: &ChatRef) -> Result<Option<ChatMessage>>;

    /// Messages with id strictly greater than `min_id`, ascending by id.
    async fn messages_after(&self, chat: &ChatRef, min_id: i32) -> Result<Vec<ChatMessage>>;

    /// Fetch a single message by id (used for reply context).
    async fn get_message(&self, chat: &ChatRef, id: i32) -> Result<Option<ChatMessage>>;

    /// Next inbound message from the live subscription. Blocks until one
    /// arrives.
    async fn next_event(&self) -> Result<ChatEvent>;

    /// All dialogs the session can see (discovery).
    async fn dialogs(&self) -> Result<Vec<ChatRef>>;

    async fn send_text(&self, endpoint: &str, text: &str) -> Result<()>;

    async fn send_file(&self, endpoint: &str, path: &Path, caption: Option<&str>) -> Result<()>;
}
