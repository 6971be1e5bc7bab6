//! Source-agnostic message envelope passed through the pipeline.
//!
//! An envelope is created by a source (Telegram subscription or feed poller)
//! and is logically immutable afterwards, except for the fields preprocessing
//! populates: `media_path`, `ocr_text` and `metadata`. Parsers never mutate an
//! envelope; they produce a new one so every destination sees the pre-parse
//! text.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Metadata key holding the clickable source URL (chat source only).
pub const META_SOURCE_URL: &str = "source_url";

/// Metadata key holding the defanged source URL (chat source only).
pub const META_DEFANGED_SOURCE_URL: &str = "defanged_source_url";

/// Reply-context text is truncated to this many characters.
pub const REPLY_TEXT_MAX: usize = 200;

/// Where an envelope originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Chat,
    Feed,
}

impl SourceKind {
    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Chat => "chat",
            SourceKind::Feed => "feed",
        }
    }
}

/// Coarse classification of an attached media object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaKind {
    #[default]
    None,
    Image,
    Document,
    Other,
}

impl MediaKind {
    /// Human-readable label used by the formatters.
    pub fn label(self) -> &'static str {
        match self {
            MediaKind::None => "None",
            MediaKind::Image => "Image",
            MediaKind::Document => "Document",
            MediaKind::Other => "Other",
        }
    }
}

/// Context about the message an envelope replies to (chat source only).
#[derive(Debug, Clone)]
pub struct ReplyContext {
    pub author: String,
    pub timestamp: DateTime<Utc>,
    /// Original text, truncated to [`REPLY_TEXT_MAX`] characters.
    pub text: String,
    pub media_kind: MediaKind,
    pub has_media: bool,
}

/// Downloader for an envelope's source-native media object.
///
/// Implemented by the chat adapter; the pipeline only ever sees the trait so
/// tests can substitute fakes. `fetch` is best-effort: download errors are
/// logged by the implementation and surface as `None`.
#[async_trait]
pub trait MediaFetch: Send + Sync {
    /// Download the media into `dir` and return the created file's path.
    async fn fetch(&self, dir: &Path) -> Option<PathBuf>;
}

/// Cloneable opaque handle to a [`MediaFetch`] implementation.
#[derive(Clone)]
pub struct MediaHandle(Arc<dyn MediaFetch>);

impl MediaHandle {
    pub fn new<F: MediaFetch + 'static>(fetch: F) -> Self {
        Self(Arc::new(fetch))
    }

    pub async fn fetch(&self, dir: &Path) -> Option<PathBuf> {
        self.0.fetch(dir).await
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MediaHandle(..)")
    }
}

/// The unit of work flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub source_kind: SourceKind,

    /// Channel key: `@handle` or signed numeric id for chat, feed URL for
    /// feeds.
    pub channel_id: String,

    /// Display name; may be the literal `Unresolved:<id>` until resolved.
    pub channel_name: String,

    /// Sender handle or feed name.
    pub author: String,

    pub timestamp: DateTime<Utc>,

    /// Primary content; may be empty.
    pub text: String,

    pub has_media: bool,
    pub media_kind: MediaKind,

    /// Original filename of an attached document, when the platform exposes
    /// one. `None` for photos and feed entries.
    pub media_filename: Option<String>,

    /// Declared MIME type of an attached document, when available.
    pub media_mime: Option<String>,

    /// Local path once the media has been downloaded. Set at most once;
    /// owned by the orchestrator for cleanup.
    pub media_path: Option<PathBuf>,

    /// Platform message id (chat source only; drives cursor updates and
    /// source-URL construction).
    pub message_id: Option<i32>,

    pub ocr_enabled: bool,
    pub ocr_text: Option<String>,

    pub reply_context: Option<ReplyContext>,

    /// Opaque handle used only to trigger a media download.
    pub original: Option<MediaHandle>,

    /// Free-form metadata; holds [`META_DEFANGED_SOURCE_URL`] when
    /// applicable.
    pub metadata: HashMap<String, String>,
}

impl MessageEnvelope {
    pub fn new(
        source_kind: SourceKind,
        channel_id: impl Into<String>,
        channel_name: impl Into<String>,
        author: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source_kind,
            channel_id: channel_id.into(),
            channel_name: channel_name.into(),
            author: author.into(),
            timestamp,
            text: String::new(),
            has_media: false,
            media_kind: MediaKind::None,
            media_filename: None,
            media_mime: None,
            media_path: None,
            message_id: None,
            ocr_enabled: false,
            ocr_text: None,
            reply_context: None,
            original: None,
            metadata: HashMap::new(),
        }
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered.
    Sent,
    /// The platform asked us to back off for the given duration.
    RateLimited(Duration),
    /// Failed for any other reason.
    Failed,
}

/// Annotation appended by the formatters when an envelope's media is not
/// delivered to a particular destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaNote {
    /// Dropped by a restricted destination's allow-list.
    Filtered,
    /// Download failed or the file was too large to attach.
    Undeliverable,
}

/// Entry point of the pipeline; sources hand every envelope to this.
///
/// `submit` runs the full pipeline for one envelope and only returns once
/// every selected destination has been attempted, so a source that awaits it
/// preserves its own ordering guarantees.
#[async_trait]
pub trait EnvelopeSink: Send + Sync {
    /// Returns `true` when at least one destination accepted the envelope.
    async fn submit(&self, envelope: MessageEnvelope) -> bool;
}
