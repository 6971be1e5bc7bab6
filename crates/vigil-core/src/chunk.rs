//! Platform-aware splitting of long text at preferred boundaries.

/// Split `text` into chunks of at most `max_len` bytes each.
///
/// At each step the split point is the last newline within the first
/// `max_len` bytes; when no newline is available the text is hard-broken at
/// the largest UTF-8 boundary not exceeding `max_len`. Leading newlines are
/// stripped from every chunk after the first, so the chunks concatenate back
/// to `text` modulo that stripping.
///
/// Empty input yields `[""]`; text within the limit yields a single chunk.
pub fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    debug_assert!(max_len > 0);
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    loop {
        if rest.len() <= max_len {
            chunks.push(rest.to_string());
            break;
        }
        let mut window = floor_char_boundary(rest, max_len);
        if window == 0 {
            // max_len smaller than one character; take the character anyway
            // rather than loop forever.
            window = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let split = match rest[..window].rfind('\n') {
            // A newline at position 0 would produce an empty chunk.
            Some(0) | None => window,
            Some(at) => at,
        };
        chunks.push(rest[..split].to_string());
        rest = rest[split..].trim_start_matches('\n');
    }
    chunks
}

/// Largest index `<= at` that falls on a UTF-8 character boundary.
fn floor_char_boundary(s: &str, mut at: usize) -> usize {
    while !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejoin(chunks: &[String]) -> String {
        chunks.concat()
    }

    #[test]
    fn empty_input_yields_single_empty_chunk() {
        assert_eq!(chunk_text("", 100), vec![""]);
    }

    #[test]
    fn text_within_limit_is_single_chunk() {
        assert_eq!(chunk_text("hello", 100), vec!["hello"]);
    }

    #[test]
    fn exactly_at_limit_is_single_chunk() {
        let text = "a".repeat(100);
        assert_eq!(chunk_text(&text, 100), vec![text]);
    }

    #[test]
    fn splits_at_last_newline_in_window() {
        let text = format!("{}\n{}", "a".repeat(50), "b".repeat(70));
        let chunks = chunk_text(&text, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(50));
        assert_eq!(chunks[1], "b".repeat(70));
    }

    #[test]
    fn hard_breaks_without_newline() {
        let text = "x".repeat(250);
        let chunks = chunk_text(&text, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[1].len(), 100);
        assert_eq!(chunks[2].len(), 50);
        assert_eq!(rejoin(&chunks), text);
    }

    #[test]
    fn every_chunk_respects_max_len() {
        let text = format!("{}\n{}\n{}", "a".repeat(90), "b".repeat(90), "c".repeat(90));
        for chunk in chunk_text(&text, 100) {
            assert!(chunk.len() <= 100);
        }
    }

    #[test]
    fn concatenation_round_trips_modulo_leading_newlines() {
        let text = format!("{}\n\n{}\n{}", "a".repeat(80), "b".repeat(80), "c".repeat(80));
        let chunks = chunk_text(&text, 100);
        let rejoined = rejoin(&chunks);
        let normalized: String = text.split('\n').filter(|s| !s.is_empty()).collect();
        let rejoined_normalized: String =
            rejoined.split('\n').filter(|s| !s.is_empty()).collect();
        assert_eq!(normalized, rejoined_normalized);
    }

    #[test]
    fn never_splits_inside_a_multibyte_character() {
        let text = "é".repeat(120); // 2 bytes each
        let chunks = chunk_text(&text, 101);
        for chunk in &chunks {
            assert!(chunk.len() <= 101);
            assert!(std::str::from_utf8(chunk.as_bytes()).is_ok());
        }
        assert_eq!(rejoin(&chunks), text);
    }
}
