//! URL defanging and chat message URL construction.

/// Render a URL non-clickable for safe sharing.
///
/// `https` becomes `hxxps`, `http` becomes `hxxp`, and the dot before `me`
/// in `t.me` / `telegram.me` is bracketed. Idempotent: defanging a defanged
/// URL is a no-op.
pub fn defang(url: &str) -> String {
    let mut out = if let Some(rest) = url.strip_prefix("https://") {
        format!("hxxps://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("hxxp://{rest}")
    } else {
        url.to_string()
    };
    // telegram.me first: it must not be re-matched by the t.me rule.
    out = out.replace("telegram.me", "telegram[.]me");
    out = out.replace("t.me", "t[.]me");
    out
}

/// Build the public URL of a chat message, when one exists.
///
/// Public channels: `https://t.me/<handle>/<mid>`. Private channels with the
/// `-100` supergroup prefix: `https://t.me/c/<bare-id>/<mid>`. Anything else
/// has no routable URL.
pub fn message_url(channel_id: &str, message_id: i32) -> Option<String> {
    if let Some(handle) = channel_id.strip_prefix('@') {
        return Some(format!("https://t.me/{handle}/{message_id}"));
    }
    if let Some(bare) = channel_id.strip_prefix("-100") {
        if !bare.is_empty() && bare.bytes().all(|b| b.is_ascii_digit()) {
            return Some(format!("https://t.me/c/{bare}/{message_id}"));
        }
    }
    None
}
