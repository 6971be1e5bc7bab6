//! Bounded-size text extraction from safe attachments.

use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use crate::allow;

/// Files larger than this are skipped entirely.
pub const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// Upper bound on bytes actually read; enough for keyword search without
/// pulling a whole dump into memory.
pub const MAX_READ_BYTES: u64 = 256 * 1024;

/// Read a downloaded attachment as UTF-8 (lossy) for keyword search.
///
/// Returns `None` when the classifier rejects the (filename, MIME) pair,
/// when the file exceeds [`MAX_FILE_BYTES`], or on any read error. All
/// failures are logged and non-fatal.
pub fn read_searchable(
    path: &Path,
    filename: Option<&str>,
    mime: Option<&str>,
) -> Option<String> {
    if !allow::is_safe(filename, mime) {
        return None;
    }

    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "attachment stat failed");
            return None;
        }
    };
    if meta.len() > MAX_FILE_BYTES {
        debug!(
            path = %path.display(),
            size = meta.len(),
            "attachment too large for text scan, skipping"
        );
        return None;
    }

    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "attachment open failed");
            return None;
        }
    };

    let mut buf = Vec::new();
    if let Err(e) = file.take(MAX_READ_BYTES).read_to_end(&mut buf) {
        warn!(path = %path.display(), error = %e, "attachment read failed");
        return None;
    }

    Some(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_safe_text_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leak.txt");
        std::fs::write(&path, "credentials: hunter2\n").unwrap();

        let text = read_searchable(&path, Some("leak.txt"), Some("text/plain"));
        assert_eq!(text.as_deref(), Some("credentials: hunter2\n"));
    }

    #[test]
    fn classifier_unsafe_returns_none_without_touching_disk() {
        let text = read_searchable(
            Path::new("/nonexistent/evil.exe"),
            Some("evil.exe"),
            Some("text/plain"),
        );
        assert!(text.is_none());
    }

    #[test]
    fn oversized_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.log");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(MAX_FILE_BYTES + 1).unwrap();

        assert!(read_searchable(&path, Some("big.log"), Some("text/plain")).is_none());
    }

    #[test]
    fn read_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        let row = "a,".repeat(512);
        for _ in 0..600 {
            writeln!(file, "{row}").unwrap();
        }

        let text = read_searchable(&path, Some("wide.csv"), Some("text/csv")).unwrap();
        assert!(text.len() as u64 <= MAX_READ_BYTES);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.dat");
        std::fs::write(&path, [0x68, 0x69, 0xff, 0xfe, 0x21]).unwrap();

        let text =
            read_searchable(&path, Some("mixed.dat"), Some("application/octet-stream")).unwrap();
        assert!(text.starts_with("hi"));
        assert!(text.ends_with('!'));
    }
}
