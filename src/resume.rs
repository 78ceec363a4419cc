//! Resume context reconstruction.
//!
//! After an abort, a stall restart, or a mode change the next agent session
//! starts empty. To keep the conversation coherent, the previous session's
//! transcript is replayed through the same normalization used live and
//! condensed into a bounded block of role-tagged lines that is prepended to
//! the next prompt.
//!
//! Every failure here (no transcript, unreadable file, nothing usable in it)
//! means "no resume context" and is never an error.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ResumeConfig;
use crate::models::normalized::NormalizedMessage;
use crate::protocol::client::ResumePointer;
use crate::transcript::TranscriptStore;
use crate::translate::normalize::{normalize_transcript_line, value_text};

/// Header prefixed to complete context.
pub const HEADER: &str = "[Context from the previous session]";

/// Header prefixed when items were dropped or shortened.
pub const HEADER_TRUNCATED: &str =
    "[Context from the previous session (truncated; older or oversized items were shortened)]";

/// Reconstructed context ready to seed a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeContext {
    /// Header plus role-tagged lines.
    pub text: String,
    /// Items kept.
    pub items: usize,
    /// Whether anything was dropped or shortened.
    pub truncated: bool,
}

/// Locates transcripts and condenses them into [`ResumeContext`].
pub struct ResumeReconstructor {
    store: Arc<dyn TranscriptStore>,
    limits: ResumeConfig,
}

impl ResumeReconstructor {
    /// Create a reconstructor over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TranscriptStore>, limits: ResumeConfig) -> Self {
        Self { store, limits }
    }

    /// Build context from the transcript `pointer` refers to.
    pub async fn reconstruct(&self, pointer: &ResumePointer) -> Option<ResumeContext> {
        let path = match pointer {
            ResumePointer::Path(path) => path.clone(),
            ResumePointer::SessionId(id) => {
                let Some(path) = self.store.find_latest_file(id).await else {
                    debug!(agent_session_id = id.as_str(), "no transcript for resume");
                    return None;
                };
                path
            }
        };

        let raw = self.store.read_file(&path).await?;
        let context = build_context(&raw, &self.limits);
        match &context {
            Some(ctx) => info!(
                path = %path.display(),
                items = ctx.items,
                truncated = ctx.truncated,
                "resume context reconstructed"
            ),
            None => debug!(path = %path.display(), "transcript yielded no resume items"),
        }
        context
    }
}

/// Condense transcript text into bounded resume context.
///
/// Lines are replayed in order, consecutive duplicates are collapsed, each
/// item is capped by its kind's limit, and the oldest items are dropped
/// until both `max_items` and `max_chars` hold.
#[must_use]
pub fn build_context(transcript: &str, limits: &ResumeConfig) -> Option<ResumeContext> {
    let mut shortened = false;
    let mut lines: Vec<String> = Vec::new();

    for raw in transcript.lines() {
        let Some(message) = normalize_transcript_line(raw) else {
            continue;
        };
        let Some((line, cut)) = render_item(&message, limits) else {
            continue;
        };
        if lines.last() == Some(&line) {
            continue;
        }
        shortened |= cut;
        lines.push(line);
    }

    let mut total: usize = lines.iter().map(|l| l.chars().count()).sum();
    let mut start = 0;
    while start < lines.len() && (lines.len() - start > limits.max_items || total > limits.max_chars)
    {
        total -= lines[start].chars().count();
        start += 1;
    }
    let dropped = start > 0;
    let kept = &lines[start..];
    if kept.is_empty() {
        return None;
    }

    let truncated = dropped || shortened;
    let header = if truncated { HEADER_TRUNCATED } else { HEADER };
    let mut text = String::from(header);
    for line in kept {
        text.push('\n');
        text.push_str(line);
    }

    Some(ResumeContext {
        text,
        items: kept.len(),
        truncated,
    })
}

/// Render one message as a role-tagged line, reporting whether it was cut.
fn render_item(message: &NormalizedMessage, limits: &ResumeConfig) -> Option<(String, bool)> {
    let (label, body, cap) = match message {
        NormalizedMessage::User { text } => ("User".to_owned(), text.clone(), limits.max_item_chars),
        NormalizedMessage::Assistant { text } => {
            ("Assistant".to_owned(), text.clone(), limits.max_item_chars)
        }
        NormalizedMessage::Reasoning { title, text } => {
            let body = match title {
                Some(title) if text.is_empty() => title.clone(),
                Some(title) => format!("{title}: {text}"),
                None => text.clone(),
            };
            ("Reasoning".to_owned(), body, limits.max_reasoning_chars)
        }
        NormalizedMessage::ToolCall { name, input, .. } => (
            format!("Tool call ({name})"),
            value_text(input),
            limits.max_tool_input_chars,
        ),
        NormalizedMessage::ToolResult {
            output, is_error, ..
        } => {
            let label = if *is_error { "Tool error" } else { "Tool result" };
            (label.to_owned(), output.clone(), limits.max_tool_result_chars)
        }
        NormalizedMessage::Diff { .. } => return None,
    };

    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    let (body, cut) = truncate_chars(body, cap);
    Some((format!("{label}: {body}"), cut))
}

/// Keep the first `max_chars` characters, noting how many were removed.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    let count = text.chars().count();
    if count <= max_chars {
        return (text.to_owned(), false);
    }
    let head: String = text.chars().take(max_chars).collect();
    (
        format!("{head}… [{} chars truncated]", count - max_chars),
        true,
    )
}
