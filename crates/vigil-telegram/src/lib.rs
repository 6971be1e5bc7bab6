//! Telegram adapter: event subscription with gap recovery on the source
//! side, chunked/caption-aware sending on the destination side.
//!
//! Everything except [`mtproto`] is written against the [`client::ChatClient`]
//! trait, so the protocol logic is testable without a live session.

pub mod client;
pub mod cursor;
pub mod error;
pub mod format;
pub mod mtproto;
pub mod send;
pub mod source;

pub use client::{ChatClient, ChatEvent, ChatMessage, ChatRef, MediaInfo};
pub use cursor::ChatCursorLog;
pub use error::{Result, TelegramError};
pub use mtproto::MtprotoClient;
pub use send::{ChatSender, BODY_MAX, CAPTION_MAX};
pub use source::{ChatSource, MonitoredChannel, GAP_POLL_INTERVAL};
