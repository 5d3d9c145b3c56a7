use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;

/// File-backed store for the feed's validator token (`etag`).
///
/// File access goes through `tokio::fs`, so reads and writes run on the
/// blocking pool rather than the polling task's worker.
///
/// A single writer is assumed. A reader racing a write may see a partial
/// token, which at worst costs one unconditional fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorTokenFile {
    path: PathBuf,
}

impl ValidatorTokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored token, trimmed. `None` when the file is missing, empty or
    /// unreadable.
    pub async fn load(&self) -> Option<String> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| token.to_owned())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => None,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "could not read validator token");
                None
            }
        }
    }

    pub async fn save(&self, token: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(&self.path, token).await
    }
}
