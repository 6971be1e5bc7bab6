//! Chat session bootstrap from the environment.

use std::path::Path;

use anyhow::Context;

use vigil_telegram::MtprotoClient;

/// Connect the MTProto session using `TELEGRAM_API_ID` / `TELEGRAM_API_HASH`
/// and the session file named by `VIGIL_SESSION_FILE` (default
/// `vigil.session`). Missing credentials are fatal: only invoked when the
/// run actually needs a chat session.
pub async fn connect_chat() -> anyhow::Result<MtprotoClient> {
    let api_id: i32 = std::env::var("TELEGRAM_API_ID")
        .context("TELEGRAM_API_ID is required for the chat session")?
        .parse()
        .context("TELEGRAM_API_ID must be an integer")?;
    let api_hash = std::env::var("TELEGRAM_API_HASH")
        .context("TELEGRAM_API_HASH is required for the chat session")?;
    let session_file =
        std::env::var("VIGIL_SESSION_FILE").unwrap_or_else(|_| "vigil.session".to_string());

    MtprotoClient::connect(Path::new(&session_file), api_id, &api_hash)
        .await
        .context("connecting the Telegram session")
}
