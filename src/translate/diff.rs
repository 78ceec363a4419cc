//! Turn diff accumulation and summary rendering.
//!
//! The agent reports the turn's *cumulative* unified diff after every
//! change, so only the latest one matters. It is rendered once, at turn
//! end, as a per-file `+adds/-dels` summary. A diff identical to the one
//! already emitted is not emitted again.

use diffy::{Line, Patch};

use crate::models::normalized::NormalizedMessage;

/// Reducer state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DiffState {
    /// No diff seen since the last reset.
    #[default]
    Idle,
    /// Holding the latest cumulative diff.
    Accumulating {
        /// Most recent cumulative diff.
        latest: String,
        /// Diff emitted by the previous flush, if any.
        last_emitted: Option<String>,
    },
    /// The latest diff was emitted.
    Flushed {
        /// Diff that was emitted.
        emitted: String,
    },
}

/// Per-file line counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Path as named in the diff header, without `a/` / `b/` prefixes.
    pub path: String,
    /// Inserted lines.
    pub additions: usize,
    /// Deleted lines.
    pub deletions: usize,
}

/// Accumulates `turn_diff` events into one [`NormalizedMessage::Diff`].
#[derive(Debug, Default)]
pub struct DiffTranslator {
    state: DiffState,
}

impl DiffTranslator {
    /// Create an idle translator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &DiffState {
        &self.state
    }

    /// Record the latest cumulative diff.
    pub fn on_turn_diff(&mut self, unified_diff: &str) {
        let last_emitted = match std::mem::take(&mut self.state) {
            DiffState::Idle => None,
            DiffState::Accumulating { last_emitted, .. } => last_emitted,
            DiffState::Flushed { emitted } => Some(emitted),
        };
        self.state = DiffState::Accumulating {
            latest: unified_diff.to_owned(),
            last_emitted,
        };
    }

    /// Render the latest diff if it differs from what was last emitted.
    pub fn flush(&mut self) -> Option<NormalizedMessage> {
        match std::mem::take(&mut self.state) {
            DiffState::Accumulating {
                latest,
                last_emitted,
            } => {
                if latest.trim().is_empty() || last_emitted.as_deref() == Some(latest.as_str()) {
                    self.state = last_emitted
                        .map_or(DiffState::Idle, |emitted| DiffState::Flushed { emitted });
                    return None;
                }
                let summary = render_summary(&summarize(&latest));
                self.state = DiffState::Flushed {
                    emitted: latest.clone(),
                };
                Some(NormalizedMessage::Diff {
                    summary,
                    unified_diff: latest,
                })
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Discard any held diff without emitting.
    pub fn reset(&mut self) {
        self.state = DiffState::Idle;
    }
}

/// Count insertions and deletions per file in a (possibly multi-file)
/// unified diff.
#[must_use]
pub fn summarize(unified_diff: &str) -> Vec<FileChange> {
    let normalized = unified_diff.replace("\r\n", "\n");
    split_files(&normalized)
        .into_iter()
        .filter_map(summarize_file)
        .collect()
}

/// Render `path +N/-M` lines, one per file.
#[must_use]
pub fn render_summary(changes: &[FileChange]) -> String {
    changes
        .iter()
        .map(|c| format!("{} +{}/-{}", c.path, c.additions, c.deletions))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split a multi-file diff into one chunk per file.
fn split_files(diff: &str) -> Vec<&str> {
    let lines: Vec<&str> = diff.split_inclusive('\n').collect();
    let git_style = lines.iter().any(|l| l.starts_with("diff --git "));
    let mut starts = Vec::new();
    let mut offset = 0;
    for (i, line) in lines.iter().enumerate() {
        let boundary = if git_style {
            line.starts_with("diff --git ")
        } else {
            line.starts_with("--- ") && lines.get(i + 1).is_some_and(|n| n.starts_with("+++ "))
        };
        if boundary {
            starts.push(offset);
        }
        offset += line.len();
    }

    let mut chunks = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(diff.len());
        chunks.push(&diff[start..end]);
    }
    chunks
}

fn summarize_file(chunk: &str) -> Option<FileChange> {
    let body_start = chunk
        .match_indices("--- ")
        .find(|&(i, _)| i == 0 || chunk.as_bytes()[i - 1] == b'\n')
        .map(|(i, _)| i);

    if let Some(start) = body_start {
        if let Ok(patch) = Patch::from_str(&chunk[start..]) {
            let path = patch
                .modified()
                .filter(|p| *p != "/dev/null")
                .or_else(|| patch.original())
                .map(strip_prefix)
                .unwrap_or_default();
            let mut additions = 0;
            let mut deletions = 0;
            for hunk in patch.hunks() {
                for line in hunk.lines() {
                    match line {
                        Line::Insert(_) => additions += 1,
                        Line::Delete(_) => deletions += 1,
                        Line::Context(_) => {}
                    }
                }
            }
            return Some(FileChange {
                path,
                additions,
                deletions,
            });
        }
    }

    count_lines(chunk)
}

/// Fallback for chunks `diffy` cannot parse (binary, rename-only, odd headers).
fn count_lines(chunk: &str) -> Option<FileChange> {
    let mut path = None;
    let mut additions = 0;
    let mut deletions = 0;
    for line in chunk.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            path = rest.split_whitespace().next_back().map(strip_prefix);
            continue;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            if rest.trim() != "/dev/null" {
                path = Some(strip_prefix(rest.trim()));
            }
            continue;
        }
        if line.starts_with("--- ") {
            continue;
        }
        if line.starts_with('+') {
            additions += 1;
        } else if line.starts_with('-') {
            deletions += 1;
        }
    }
    path.map(|path| FileChange {
        path,
        additions,
        deletions,
    })
}

fn strip_prefix(path: &str) -> String {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
        .to_owned()
}
