//! Screenshots of pages that failed extraction

use log::{info, warn};
use std::fs;
use std::path::PathBuf;

use crate::browser::BrowserSession;

/// Receives failure artifacts. Never fails the caller: problems are logged
/// and reported as `None`.
pub trait ArtifactSink: Send + Sync {
    /// Store `bytes` captured for `url` and return a reference to them.
    fn store(&self, prefix: &str, url: &str, bytes: &[u8]) -> Option<String>;
}

/// Writes `<dir>/<prefix>_<sanitized url>.png`
pub struct ScreenshotSink {
    dir: PathBuf,
}

impl ScreenshotSink {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, prefix: &str, url: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.png", prefix, sanitize(url)))
    }
}

/// Every character other than a word character or `-` becomes `_`.
pub fn sanitize(url: &str) -> String {
    url.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

impl ArtifactSink for ScreenshotSink {
    fn store(&self, prefix: &str, url: &str, bytes: &[u8]) -> Option<String> {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Cannot create {}: {}", self.dir.display(), e);
            return None;
        }
        let path = self.path_for(prefix, url);
        match fs::write(&path, bytes) {
            Ok(()) => {
                info!("Screenshot saved to {}", path.display());
                Some(path.display().to_string())
            }
            Err(e) => {
                warn!("Failed to save screenshot {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Discards everything
pub struct NullSink;

impl ArtifactSink for NullSink {
    fn store(&self, _prefix: &str, _url: &str, _bytes: &[u8]) -> Option<String> {
        None
    }
}

/// Screenshot the session's current page into `sink`.
pub fn capture(
    session: &dyn BrowserSession,
    sink: &dyn ArtifactSink,
    prefix: &str,
    url: &str,
) -> Option<String> {
    match session.screenshot() {
        Ok(bytes) => sink.store(prefix, url, &bytes),
        Err(e) => {
            warn!("Screenshot for {} failed: {}", url, e);
            None
        }
    }
}
