//! Markdown rendering of envelopes for webhook delivery.
//!
//! User-controlled text is interpolated bare — never wrapped in markup that
//! could combine with untrusted content into live formatting. Only
//! config-supplied keywords get inline-code ticks.

use vigil_core::envelope::{MediaNote, MessageEnvelope, ReplyContext};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Render an envelope as a single markdown message.
pub fn format_message(
    envelope: &MessageEnvelope,
    matched_keywords: &[String],
    media_note: Option<MediaNote>,
) -> String {
    let mut lines = vec![
        format!("**New message from:** {}", envelope.channel_name),
        format!("**By:** {}", envelope.author),
        format!("**Time:** {}", envelope.timestamp.format(TIME_FORMAT)),
    ];

    if let Some(url) = envelope.metadata.get(vigil_core::envelope::META_DEFANGED_SOURCE_URL) {
        lines.push(format!("**Source:** {url}"));
    }

    if envelope.has_media {
        lines.push(format!("**Content:** {}", envelope.media_kind.label()));
    }

    if !matched_keywords.is_empty() {
        let rendered: Vec<String> =
            matched_keywords.iter().map(|kw| format!("`{kw}`")).collect();
        lines.push(format!("**Matched:** {}", rendered.join(", ")));
    }

    if let Some(reply) = &envelope.reply_context {
        lines.push(format_reply_context(reply));
    }

    if !envelope.text.is_empty() {
        lines.push(format!("**Message:**\n{}", envelope.text));
    }

    if let Some(ocr) = &envelope.ocr_text {
        let quoted: Vec<String> = ocr.split('\n').map(|line| format!("> {line}")).collect();
        lines.push(format!("**OCR:**\n{}", quoted.join("\n")));
    }

    match media_note {
        Some(MediaNote::Filtered) => lines.push("*[Media filtered]*".to_string()),
        Some(MediaNote::Undeliverable) => {
            lines.push("*[Media could not be forwarded]*".to_string())
        }
        None => {}
    }

    lines.join("\n")
}

fn format_reply_context(reply: &ReplyContext) -> String {
    let mut parts = vec![format!(
        "**  Replying to:** {} ({})",
        reply.author,
        reply.timestamp.format(TIME_FORMAT)
    )];

    if reply.has_media {
        parts.push(format!("**  Original content:** {}", reply.media_kind.label()));
    }

    if !reply.text.is_empty() {
        parts.push(format!("**  Original message:** {}", reply.text));
    } else if reply.has_media {
        parts.push("**  Original message:** [Attachment only, no caption]".to_string());
    }

    parts.join("\n")
}
