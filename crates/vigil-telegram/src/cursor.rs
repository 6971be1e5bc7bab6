//! Per-channel cursor files for gap recovery.
//!
//! One file per monitored chat channel: `display_name\nlast_message_id`.
//! Created at startup, advanced after each processed message, and deleted
//! on clean shutdown — after an outage the next start re-anchors at the
//! then-latest message instead of backfilling a flood.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ChatCursorLog {
    dir: PathBuf,
}

impl ChatCursorLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write the startup cursor for a channel.
    pub fn init(&self, channel_key: &str, display_name: &str, latest_id: i32) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(
            self.path(channel_key),
            format!("{display_name}\n{latest_id}"),
        )?;
        Ok(())
    }

    /// Last processed message id for a channel, if a cursor exists.
    pub fn read(&self, channel_key: &str) -> Option<i32> {
        let content = std::fs::read_to_string(self.path(channel_key)).ok()?;
        content.lines().nth(1)?.trim().parse().ok()
    }

    /// Advance the cursor to `max(current, id)`.
    pub fn update(&self, channel_key: &str, display_name: &str, id: i32) {
        let current = self.read(channel_key).unwrap_or(0);
        if id <= current {
            return;
        }
        if let Err(e) = self.init(channel_key, display_name, id) {
            warn!(channel = %channel_key, error = %e, "cursor update failed");
        }
    }

    /// Delete every cursor file. Called on clean shutdown.
    pub fn clear_all(&self) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        let mut removed = 0usize;
        for entry in entries.flatten() {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!(path = %entry.path().display(), error = %e, "cursor delete failed");
            } else {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "chat cursors cleared");
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, channel_key: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", sanitize(channel_key)))
    }
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatCursorLog::new(dir.path());
        log.init("@intel", "@intel", 4321).unwrap();
        assert_eq!(log.read("@intel"), Some(4321));
    }

    #[test]
    fn update_only_moves_forward() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatCursorLog::new(dir.path());
        log.init("@intel", "@intel", 100).unwrap();

        log.update("@intel", "@intel", 90);
        assert_eq!(log.read("@intel"), Some(100));

        log.update("@intel", "@intel", 150);
        assert_eq!(log.read("@intel"), Some(150));
    }

    #[test]
    fn file_holds_display_name_then_id() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatCursorLog::new(dir.path());
        log.init("-1001234", "Intel Leaks", 7).unwrap();
        let content = std::fs::read_to_string(dir.path().join("-1001234.txt")).unwrap();
        assert_eq!(content, "Intel Leaks\n7");
    }

    #[test]
    fn clear_all_removes_every_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatCursorLog::new(dir.path());
        log.init("@a", "@a", 1).unwrap();
        log.init("@b", "@b", 2).unwrap();
        log.clear_all();
        assert_eq!(log.read("@a"), None);
        assert_eq!(log.read("@b"), None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_cursor_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatCursorLog::new(dir.path());
        assert_eq!(log.read("@ghost"), None);
    }
}
