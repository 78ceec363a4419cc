//! Transcript lookup.
//!
//! The agent appends one JSONL transcript per agent session somewhere under
//! a sessions root, with the session id embedded in the file name. Locating
//! the latest one is a directory walk, so it runs on the blocking pool and is
//! hidden behind [`TranscriptStore`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;

use tracing::{debug, warn};

/// Boxed future returned by [`TranscriptStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read-only view of persisted agent transcripts.
///
/// Both lookups are best-effort: failures are logged and surface as `None`.
pub trait TranscriptStore: Send + Sync {
    /// Most recently modified transcript whose file name contains
    /// `agent_session_id`.
    fn find_latest_file(&self, agent_session_id: &str) -> StoreFuture<'_, Option<PathBuf>>;

    /// Full contents of `path`.
    fn read_file(&self, path: &Path) -> StoreFuture<'_, Option<String>>;
}

/// [`TranscriptStore`] over a directory tree of `*.jsonl` files.
#[derive(Debug, Clone)]
pub struct FsTranscriptStore {
    root: PathBuf,
}

impl FsTranscriptStore {
    /// Create a store rooted at `root`. The directory need not exist.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Sessions root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TranscriptStore for FsTranscriptStore {
    fn find_latest_file(&self, agent_session_id: &str) -> StoreFuture<'_, Option<PathBuf>> {
        let root = self.root.clone();
        let id = agent_session_id.to_owned();
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || scan_latest(&root, &id)).await {
                Ok(found) => found,
                Err(err) => {
                    warn!(%err, "transcript scan task failed");
                    None
                }
            }
        })
    }

    fn read_file(&self, path: &Path) -> StoreFuture<'_, Option<String>> {
        let path = path.to_path_buf();
        Box::pin(async move {
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => Some(text),
                Err(err) => {
                    warn!(path = %path.display(), %err, "failed to read transcript");
                    None
                }
            }
        })
    }
}

/// Walk `root` for `*<id>*.jsonl` and pick the newest by modification time.
fn scan_latest(root: &Path, agent_session_id: &str) -> Option<PathBuf> {
    if agent_session_id.is_empty() || !root.is_dir() {
        return None;
    }

    // The root is a literal path; only the trailing segments are pattern.
    let pattern = format!(
        "{}/**/*{}*.jsonl",
        glob::Pattern::escape(&root.to_string_lossy()),
        glob::Pattern::escape(agent_session_id)
    );

    let entries = match glob::glob(&pattern) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(%err, "invalid transcript glob pattern");
            return None;
        }
    };

    let mut best: Option<(SystemTime, PathBuf)> = None;
    for path in entries.flatten() {
        let Ok(modified) = std::fs::metadata(&path).and_then(|m| m.modified()) else {
            continue;
        };
        let newer = match &best {
            Some((newest, _)) => modified > *newest,
            None => true,
        };
        if newer {
            best = Some((modified, path));
        }
    }

    let found = best.map(|(_, path)| path);
    debug!(
        agent_session_id,
        found = ?found.as_ref().map(|p| p.display().to_string()),
        "transcript lookup finished"
    );
    found
}
