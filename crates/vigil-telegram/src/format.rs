//! HTML rendering of envelopes for Telegram delivery.
//!
//! Telegram accepts a small HTML subset. Every piece of interpolated user
//! text goes through [`escape`]; the markup itself is ours.

use vigil_core::envelope::{MediaNote, MessageEnvelope, ReplyContext};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Escape text for the Telegram HTML subset.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render an envelope as a single HTML message.
pub fn format_message(
    envelope: &MessageEnvelope,
    matched_keywords: &[String],
    media_note: Option<MediaNote>,
) -> String {
    let mut lines = vec![
        format!("<b>New message from:</b> {}", escape(&envelope.channel_name)),
        format!("<b>By:</b> {}", escape(&envelope.author)),
        format!("<b>Time:</b> {}", envelope.timestamp.format(TIME_FORMAT)),
    ];

    if let Some(url) = envelope.metadata.get(vigil_core::envelope::META_DEFANGED_SOURCE_URL) {
        lines.push(format!("<b>Source:</b> {}", escape(url)));
    }

    if envelope.has_media {
        lines.push(format!("<b>Content:</b> {}", envelope.media_kind.label()));
    }

    if !matched_keywords.is_empty() {
        let rendered: Vec<String> = matched_keywords
            .iter()
            .map(|kw| format!("<code>{}</code>", escape(kw)))
            .collect();
        lines.push(format!("<b>Matched:</b> {}", rendered.join(", ")));
    }

    if let Some(reply) = &envelope.reply_context {
        lines.push(format_reply_context(reply));
    }

    if !envelope.text.is_empty() {
        lines.push(format!("<b>Message:</b>\n{}", escape(&envelope.text)));
    }

    if let Some(ocr) = &envelope.ocr_text {
        lines.push(format!(
            "<b>OCR:</b>\n<blockquote>{}</blockquote>",
            escape(ocr)
        ));
    }

    match media_note {
        Some(MediaNote::Filtered) => lines.push("<i>[Media filtered]</i>".to_string()),
        Some(MediaNote::Undeliverable) => {
            lines.push("<i>[Media could not be forwarded]</i>".to_string())
        }
        None => {}
    }

    lines.join("\n")
}

fn format_reply_context(reply: &ReplyContext) -> String {
    let mut parts = vec![format!(
        "<b>  Replying to:</b> {} ({})",
        escape(&reply.author),
        reply.timestamp.format(TIME_FORMAT)
    )];

    if reply.has_media {
        parts.push(format!(
            "<b>  Original content:</b> {}",
            reply.media_kind.label()
        ));
    }

    if !reply.text.is_empty() {
        parts.push(format!("<b>  Original message:</b> {}", escape(&reply.text)));
    } else if reply.has_media {
        parts.push("<b>  Original message:</b> [Attachment only, no caption]".to_string());
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use vigil_core::envelope::{MediaKind, SourceKind};

    fn envelope(text: &str) -> MessageEnvelope {
        let mut env = MessageEnvelope::new(
            SourceKind::Chat,
            "@intel",
            "@intel",
            "@reporter",
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap(),
        );
        env.text = text.to_string();
        env
    }

    #[test]
    fn user_text_is_escaped() {
        let out = format_message(&envelope("<script>alert(1)</script> & more"), &[], None);
        assert!(out.contains("&lt;script&gt;alert(1)&lt;/script&gt; &amp; more"));
        assert!(!out.contains("<script>"));
    }

    #[test]
    fn author_and_channel_are_escaped() {
        let mut env = envelope("x");
        env.channel_name = "Evil <b>Chan</b>".to_string();
        env.author = "a&b".to_string();
        let out = format_message(&env, &[], None);
        assert!(out.contains("<b>New message from:</b> Evil &lt;b&gt;Chan&lt;/b&gt;"));
        assert!(out.contains("<b>By:</b> a&amp;b"));
    }

    #[test]
    fn keywords_are_inline_code() {
        let out = format_message(&envelope("x"), &["CVE".into()], None);
        assert!(out.contains("<b>Matched:</b> <code>CVE</code>"));
    }

    #[test]
    fn ocr_is_a_blockquote() {
        let mut env = envelope("x");
        env.ocr_text = Some("seen <on> screen".to_string());
        let out = format_message(&env, &[], None);
        assert!(out.contains("<blockquote>seen &lt;on&gt; screen</blockquote>"));
    }

    #[test]
    fn media_kind_line_when_present() {
        let mut env = envelope("x");
        env.has_media = true;
        env.media_kind = MediaKind::Document;
        let out = format_message(&env, &[], None);
        assert!(out.contains("<b>Content:</b> Document"));
    }

    #[test]
    fn filtered_note_is_appended_last() {
        let out = format_message(&envelope("x"), &[], Some(MediaNote::Filtered));
        assert!(out.ends_with("<i>[Media filtered]</i>"));
    }
}
