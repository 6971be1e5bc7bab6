use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("flood wait: retry in {0:?}")]
    FloodWait(Duration),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("chat not found: {0}")]
    ChatNotFound(String),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TelegramError>;
