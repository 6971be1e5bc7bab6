//! Safe-attachment allow-list.
//!
//! A file is safe only when *both* its extension and its declared MIME type
//! are on the allow-lists. The same verdict gates two things: the restricted
//! mode pre-filter on chat media, and attachment text extraction for keyword
//! search.

/// Extensions considered text-like and searchable.
const ALLOWED_EXTENSIONS: &[&str] = &[
    ".txt", ".csv", ".log", ".sql", ".xml", ".dat", ".db", ".mdb", ".json",
];

/// MIME types matching the extension set.
const ALLOWED_MIME_TYPES: &[&str] = &[
    "text/plain",
    "text/csv",
    "text/xml",
    "application/sql",
    "application/octet-stream",
    "application/x-sql",
    "application/x-msaccess",
    "application/json",
];

/// Returns `true` iff both the filename extension and the MIME type are on
/// the allow-lists. A missing filename or MIME type is always unsafe.
pub fn is_safe(filename: Option<&str>, mime: Option<&str>) -> bool {
    let Some(filename) = filename else {
        return false;
    };
    let Some(mime) = mime else {
        return false;
    };

    let ext = match filename.rfind('.') {
        Some(at) => filename[at..].to_ascii_lowercase(),
        None => return false,
    };

    ALLOWED_EXTENSIONS.contains(&ext.as_str())
        && ALLOWED_MIME_TYPES.contains(&mime.to_ascii_lowercase().as_str())
}
