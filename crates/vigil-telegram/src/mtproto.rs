//! MTProto binding for [`ChatClient`] built on grammers.
//!
//! This is the only module that touches the platform library. The session
//! must already be authorized (interactive login is a separate, one-time
//! concern); an unauthorized session is a startup error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use grammers_client::types::{Chat, Media, Message};
use grammers_client::{Client, Config, InitParams, InputMessage, Update};
use grammers_mtsender::InvocationError;
use grammers_session::{PackedChat, PackedType, Session};
use tracing::warn;
use uuid::Uuid;

use vigil_core::envelope::{MediaFetch, MediaHandle, MediaKind};
use vigil_core::route::channel_matches;

use crate::client::{ChatClient, ChatEvent, ChatMessage, ChatRef, MediaInfo};
use crate::error::{Result, TelegramError};

/// Upper bound on messages pulled per gap-recovery scan.
const GAP_SCAN_LIMIT: usize = 500;

pub struct MtprotoClient {
    client: Client,
    /// Resolution cache: config key -> resolved chat.
    resolved: Mutex<HashMap<String, ChatRef>>,
    /// Addressing cache: marked id -> packed chat for API calls.
    packed: Mutex<HashMap<String, PackedChat>>,
}

impl MtprotoClient {
    /// Connect with an on-disk session file and verify it is authorized.
    pub async fn connect(session_path: &Path, api_id: i32, api_hash: &str) -> Result<Self> {
        let session = Session::load_file_or_create(session_path)?;
        let client = Client::connect(Config {
            session,
            api_id,
            api_hash: api_hash.to_string(),
            params: InitParams::default(),
        })
        .await
        .map_err(|e| TelegramError::Platform(e.to_string()))?;

        let authorized = client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Platform(e.to_string()))?;
        if !authorized {
            return Err(TelegramError::Unauthorized(format!(
                "session {} is not logged in",
                session_path.display()
            )));
        }
        Ok(Self {
            client,
            resolved: Mutex::new(HashMap::new()),
            packed: Mutex::new(HashMap::new()),
        })
    }

    fn remember(&self, key: &str, chat: &Chat) -> ChatRef {
        let packed = chat.pack();
        let chat_ref = chat_ref_from(chat);
        self.packed
            .lock()
            .unwrap()
            .insert(chat_ref.marked_id.clone(), packed);
        self.resolved
            .lock()
            .unwrap()
            .insert(key.to_string(), chat_ref.clone());
        chat_ref
    }

    fn packed_for(&self, chat: &ChatRef) -> Result<PackedChat> {
        self.packed
            .lock()
            .unwrap()
            .get(&chat.marked_id)
            .copied()
            .ok_or_else(|| TelegramError::ChatNotFound(chat.marked_id.clone()))
    }

    async fn resolve_chat(&self, key: &str) -> Result<ChatRef> {
        if let Some(hit) = self.resolved.lock().unwrap().get(key) {
            return Ok(hit.clone());
        }

        if let Some(username) = key.strip_prefix('@') {
            let chat = self
                .client
                .resolve_username(username)
                .await
                .map_err(map_rpc)?
                .ok_or_else(|| TelegramError::ChatNotFound(key.to_string()))?;
            return Ok(self.remember(key, &chat));
        }

        // Numeric ids can only be addressed once their access hash is known,
        // so scan the session's dialogs for a match.
        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await.map_err(map_rpc)? {
            let chat = dialog.chat();
            let marked = marked_id(chat.pack());
            if channel_matches(key, &marked) {
                let chat = chat.clone();
                return Ok(self.remember(key, &chat));
            }
        }
        Err(TelegramError::ChatNotFound(key.to_string()))
    }

    fn to_chat_message(&self, message: &Message) -> ChatMessage {
        let media = message.media().and_then(|media| describe_media(&media));
        let media_handle = media
            .is_some()
            .then(|| MediaHandle::new(NativeMedia::new(message.clone(), media.as_ref())));

        ChatMessage {
            id: message.id(),
            author: author_of(message),
            timestamp: message.date(),
            text: message.text().to_string(),
            media,
            reply_to: message.reply_to_message_id(),
            media_handle,
        }
    }
}

#[async_trait]
impl ChatClient for MtprotoClient {
    async fn resolve(&self, key: &str) -> Result<ChatRef> {
        self.resolve_chat(key).await
    }

    async fn latest_message(&self, chat: &ChatRef) -> Result<Option<ChatMessage>> {
        let packed = self.packed_for(chat)?;
        let mut iter = self.client.iter_messages(packed).limit(1);
        let message = iter.next().await.map_err(map_rpc)?;
        Ok(message.map(|m| self.to_chat_message(&m)))
    }

    async fn messages_after(&self, chat: &ChatRef, min_id: i32) -> Result<Vec<ChatMessage>> {
        let packed = self.packed_for(chat)?;
        // History iterates newest-first; collect down to the cursor and
        // reverse into ascending order.
        let mut iter = self.client.iter_messages(packed).limit(GAP_SCAN_LIMIT);
        let mut missed = Vec::new();
        while let Some(message) = iter.next().await.map_err(map_rpc)? {
            if message.id() <= min_id {
                break;
            }
            missed.push(self.to_chat_message(&message));
        }
        missed.reverse();
        Ok(missed)
    }

    async fn get_message(&self, chat: &ChatRef, id: i32) -> Result<Option<ChatMessage>> {
        let packed = self.packed_for(chat)?;
        let mut messages = self
            .client
            .get_messages_by_id(packed, &[id])
            .await
            .map_err(map_rpc)?;
        Ok(messages
            .pop()
            .flatten()
            .map(|m| self.to_chat_message(&m)))
    }

    async fn next_event(&self) -> Result<ChatEvent> {
        loop {
            let update = self.client.next_update().await.map_err(map_rpc)?;
            if let Update::NewMessage(message) = update {
                if message.outgoing() {
                    continue;
                }
                let chat = message.chat();
                return Ok(ChatEvent {
                    chat_marked_id: marked_id(chat.pack()),
                    message: self.to_chat_message(&message),
                });
            }
        }
    }

    async fn dialogs(&self) -> Result<Vec<ChatRef>> {
        let mut out = Vec::new();
        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await.map_err(map_rpc)? {
            out.push(chat_ref_from(dialog.chat()));
        }
        Ok(out)
    }

    async fn send_text(&self, endpoint: &str, text: &str) -> Result<()> {
        let chat = self.resolve_chat(endpoint).await?;
        let packed = self.packed_for(&chat)?;
        self.client
            .send_message(packed, InputMessage::html(text))
            .await
            .map_err(map_rpc)?;
        Ok(())
    }

    async fn send_file(&self, endpoint: &str, path: &Path, caption: Option<&str>) -> Result<()> {
        let chat = self.resolve_chat(endpoint).await?;
        let packed = self.packed_for(&chat)?;
        let uploaded = self.client.upload_file(path).await?;
        let message = match caption {
            Some(caption) => InputMessage::html(caption),
            None => InputMessage::text(""),
        };
        self.client
            .send_message(packed, message.file(uploaded))
            .await
            .map_err(map_rpc)?;
        Ok(())
    }
}

/// Translate platform errors, surfacing flood waits as their own kind.
fn map_rpc(error: InvocationError) -> TelegramError {
    if let InvocationError::Rpc(rpc) = &error {
        if rpc.name.starts_with("FLOOD_WAIT") {
            let seconds = rpc.value.unwrap_or(1);
            return TelegramError::FloodWait(Duration::from_secs(u64::from(seconds)));
        }
    }
    TelegramError::Platform(error.to_string())
}

fn chat_ref_from(chat: &Chat) -> ChatRef {
    let handle = chat.username().map(|u| format!("@{u}"));
    let display_name = handle.clone().unwrap_or_else(|| {
        let name = chat.name();
        if name.is_empty() {
            format!("Unresolved:{}", chat.id())
        } else {
            name.to_string()
        }
    });
    ChatRef {
        marked_id: marked_id(chat.pack()),
        handle,
        display_name,
    }
}

/// Conventional signed ("marked") id: users keep their id, small groups are
/// negated, channels and supergroups gain the `-100` prefix.
fn marked_id(packed: PackedChat) -> String {
    match packed.ty {
        PackedType::User | PackedType::Bot => packed.id.to_string(),
        PackedType::Chat => format!("-{}", packed.id),
        _ => format!("-100{}", packed.id),
    }
}

fn author_of(message: &Message) -> String {
    match message.sender() {
        Some(sender) => {
            if let Some(username) = sender.username() {
                format!("@{username}")
            } else {
                let name = sender.name().to_string();
                if name.is_empty() {
                    "Unknown".to_string()
                } else {
                    name
                }
            }
        }
        None => "Unknown".to_string(),
    }
}

fn describe_media(media: &Media) -> Option<MediaInfo> {
    match media {
        Media::Photo(_) => Some(MediaInfo {
            kind: MediaKind::Image,
            filename: None,
            mime: None,
        }),
        Media::Document(document) => {
            let filename = {
                let name = document.name();
                (!name.is_empty()).then(|| name.to_string())
            };
            Some(MediaInfo {
                kind: MediaKind::Document,
                filename,
                mime: document.mime_type().map(str::to_string),
            })
        }
        Media::Sticker(_) => Some(MediaInfo {
            kind: MediaKind::Other,
            filename: None,
            mime: None,
        }),
        _ => Some(MediaInfo {
            kind: MediaKind::Other,
            filename: None,
            mime: None,
        }),
    }
}

/// Downloader handed to the pipeline inside the envelope.
struct NativeMedia {
    message: Message,
    extension: String,
}

impl NativeMedia {
    fn new(message: Message, media: Option<&MediaInfo>) -> Self {
        let extension = media
            .and_then(|info| {
                info.filename
                    .as_deref()
                    .and_then(|name| name.rfind('.').map(|at| name[at..].to_string()))
                    .or_else(|| info.mime.as_deref().and_then(extension_for_mime))
                    .or_else(|| {
                        (info.kind == MediaKind::Image).then(|| ".jpg".to_string())
                    })
            })
            .unwrap_or_else(|| ".bin".to_string());
        Self { message, extension }
    }
}

#[async_trait]
impl MediaFetch for NativeMedia {
    async fn fetch(&self, dir: &Path) -> Option<PathBuf> {
        let target = dir.join(format!("{}{}", Uuid::new_v4(), self.extension));
        match self.message.download_media(&target).await {
            Ok(true) => Some(target),
            Ok(false) => None,
            Err(e) => {
                warn!(error = %e, "media download failed");
                None
            }
        }
    }
}

fn extension_for_mime(mime: &str) -> Option<String> {
    let ext = match mime {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/webp" => ".webp",
        "image/gif" => ".gif",
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "text/plain" => ".txt",
        "text/csv" => ".csv",
        "application/json" => ".json",
        "video/mp4" => ".mp4",
        _ => return None,
    };
    Some(ext.to_string())
}
