//! HTML cleanup for feed titles and summaries.

use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Strip every HTML tag and decode entities.
///
/// Feed parsers keep benign markup (`<p>`, `<a>`, …) in summaries; the
/// formatted envelope wants plain text.
pub fn strip_html(text: &str) -> String {
    let stripped = TAG_RE.replace_all(text, "");
    html_escape::decode_html_entities(stripped.as_ref()).into_owned()
}
