//! Line-wise text transforms applied per destination.

use crate::envelope::MessageEnvelope;

/// Placeholder emitted when a trim removes every line.
const EMPTY_PLACEHOLDER: &str = "[Message content removed by parser]";

/// Fully-validated parser specification for one destination rule.
///
/// Validation happens at configuration load; routing only ever sees one of
/// these three shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserSpec {
    /// Leave the text unchanged.
    #[default]
    None,
    /// Drop the first `front` and last `back` lines.
    Trim { front: usize, back: usize },
    /// Keep only the first `count` lines, noting how many were dropped.
    KeepFirst { count: usize },
}

/// Apply `spec` to the envelope's text, returning a new envelope.
///
/// Pure in the text: everything outside `text` is carried over unchanged,
/// and the input envelope is untouched so other destinations still see the
/// pre-parse content.
pub fn apply(spec: ParserSpec, envelope: &MessageEnvelope) -> MessageEnvelope {
    let text = match spec {
        ParserSpec::None => return envelope.clone(),
        ParserSpec::Trim { front, back } => trim_lines(&envelope.text, front, back),
        ParserSpec::KeepFirst { count } => keep_first_lines(&envelope.text, count),
    };
    let mut parsed = envelope.clone();
    parsed.text = text;
    parsed
}

fn trim_lines(text: &str, front: usize, back: usize) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    if front + back >= lines.len() {
        return EMPTY_PLACEHOLDER.to_string();
    }
    lines[front..lines.len() - back].join("\n")
}

fn keep_first_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() <= count {
        return text.to_string();
    }
    let omitted = lines.len() - count;
    let mut kept = lines[..count].join("\n");
    kept.push_str(&format!("\n[... {omitted} line(s) omitted]"));
    kept
}
