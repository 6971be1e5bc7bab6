//! Optional image-to-text extraction backed by a local `tesseract` binary.
//!
//! The engine is probed once, on first use. A missing binary degrades to
//! `available() == false` and `extract() == None` forever — OCR is an
//! enrichment, never a hard dependency. Invocations are serialized through
//! an internal mutex; the engine is not required to be concurrent-safe.

use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const TESSERACT_BIN: &str = "tesseract";

/// Lazily-initialized OCR adapter.
#[derive(Debug, Default)]
pub struct OcrEngine {
    probe: OnceLock<bool>,
    run_lock: Mutex<()>,
}

impl OcrEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an OCR engine is present. The probe runs once and the
    /// verdict is cached for the lifetime of the process.
    pub fn available(&self) -> bool {
        *self.probe.get_or_init(|| {
            let found = std::process::Command::new(TESSERACT_BIN)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false);
            if found {
                info!("tesseract found, OCR enabled");
            } else {
                warn!("tesseract not found, OCR disabled");
            }
            found
        })
    }

    /// Run OCR on an image, returning recognized text.
    ///
    /// Returns `None` when the engine is unavailable, recognition fails, or
    /// no text was found. Failures are logged and non-fatal.
    pub async fn extract(&self, image: &Path) -> Option<String> {
        if !self.available() {
            return None;
        }

        // One recognition at a time; tesseract is memory-hungry.
        let _guard = self.run_lock.lock().await;

        // `--psm 6`: assume a uniform block of text, the right mode for
        // chat screenshots.
        let output = match tokio::process::Command::new(TESSERACT_BIN)
            .arg(image)
            .arg("stdout")
            .arg("--psm")
            .arg("6")
            .stderr(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(image = %image.display(), error = %e, "OCR invocation failed");
                return None;
            }
        };

        if !output.status.success() {
            warn!(image = %image.display(), status = ?output.status.code(), "OCR failed");
            return None;
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            debug!(image = %image.display(), "OCR produced no text");
            None
        } else {
            Some(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_probe_is_cached() {
        let engine = OcrEngine::new();
        let first = engine.available();
        assert_eq!(engine.available(), first);
    }

    #[tokio::test]
    async fn extract_on_missing_file_is_none_not_panic() {
        let engine = OcrEngine::new();
        // Whatever the probe found, a nonexistent image must yield None.
        assert!(engine
            .extract(Path::new("/nonexistent/shot.png"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn extract_on_non_image_is_none() {
        let engine = OcrEngine::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-an-image.png");
        std::fs::write(&path, "plain text pretending to be a png").unwrap();
        assert!(engine.extract(&path).await.is_none());
    }
}
