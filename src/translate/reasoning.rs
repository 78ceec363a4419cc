//! Reasoning paragraph assembly.
//!
//! Streaming `agent_reasoning_delta` fragments accumulate into one paragraph
//! until an `agent_reasoning_section_break` flushes it. A full
//! `agent_reasoning` event carries the authoritative text for the paragraph
//! in progress and replaces whatever was accumulated.

use crate::models::normalized::NormalizedMessage;

/// Reducer state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReasoningState {
    /// Nothing received since the last reset.
    #[default]
    Idle,
    /// A paragraph is being assembled from deltas.
    Accumulating {
        /// Text received so far.
        buffer: String,
    },
    /// The last paragraph was emitted; the next delta opens a new one.
    Flushed,
}

/// Assembles reasoning deltas into [`NormalizedMessage::Reasoning`] paragraphs.
#[derive(Debug, Default)]
pub struct ReasoningTranslator {
    state: ReasoningState,
}

impl ReasoningTranslator {
    /// Create an idle translator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &ReasoningState {
        &self.state
    }

    /// Append a streamed fragment to the paragraph in progress.
    pub fn push_delta(&mut self, delta: &str) {
        match &mut self.state {
            ReasoningState::Accumulating { buffer } => buffer.push_str(delta),
            ReasoningState::Idle | ReasoningState::Flushed => {
                self.state = ReasoningState::Accumulating {
                    buffer: delta.to_owned(),
                };
            }
        }
    }

    /// Close the paragraph in progress.
    ///
    /// Returns `None` when nothing (or only whitespace) was accumulated.
    pub fn section_break(&mut self) -> Option<NormalizedMessage> {
        match std::mem::take(&mut self.state) {
            ReasoningState::Accumulating { buffer } => {
                self.state = ReasoningState::Flushed;
                paragraph(&buffer)
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Emit the authoritative text of a finished reasoning block.
    ///
    /// Any partial accumulation is discarded. An empty `text` falls back to
    /// the accumulated buffer.
    pub fn complete(&mut self, text: &str) -> Option<NormalizedMessage> {
        let previous = std::mem::replace(&mut self.state, ReasoningState::Flushed);
        if !text.trim().is_empty() {
            return paragraph(text);
        }
        match previous {
            ReasoningState::Accumulating { buffer } => paragraph(&buffer),
            ReasoningState::Idle | ReasoningState::Flushed => None,
        }
    }

    /// Flush any trailing paragraph at turn end.
    pub fn flush(&mut self) -> Option<NormalizedMessage> {
        self.section_break()
    }

    /// Discard partial state without emitting.
    pub fn reset(&mut self) {
        self.state = ReasoningState::Idle;
    }
}

fn paragraph(text: &str) -> Option<NormalizedMessage> {
    let (title, body) = split_title(text);
    if title.is_none() && body.is_empty() {
        return None;
    }
    Some(NormalizedMessage::Reasoning { title, text: body })
}

/// Split a leading `**Title**` heading from a reasoning paragraph.
///
/// ```
/// use agent_relay::translate::reasoning::split_title;
///
/// let (title, body) = split_title("**Planning**\n\nRead the tests first.");
/// assert_eq!(title.as_deref(), Some("Planning"));
/// assert_eq!(body, "Read the tests first.");
/// ```
#[must_use]
pub fn split_title(text: &str) -> (Option<String>, String) {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("**") {
        if let Some(end) = rest.find("**") {
            let title = rest[..end].trim();
            if !title.is_empty() && !title.contains('\n') {
                let body = rest[end + 2..].trim();
                return (Some(title.to_owned()), body.to_owned());
            }
        }
    }
    (None, trimmed.to_owned())
}
