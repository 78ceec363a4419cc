//! User-facing messages and session events produced from raw agent events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A normalized, user-facing message derived from one or more raw events.
///
/// Produced identically on the live path and when replaying a transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedMessage {
    /// A message the user sent to the agent.
    User {
        /// Message text.
        text: String,
    },
    /// A reply from the agent.
    Assistant {
        /// Message text.
        text: String,
    },
    /// A completed reasoning paragraph.
    Reasoning {
        /// Section title, when the paragraph opened with a bold heading.
        title: Option<String>,
        /// Paragraph text without the heading.
        text: String,
    },
    /// The agent invoked a tool.
    ToolCall {
        /// Correlation id shared with the matching result.
        call_id: String,
        /// Tool name (`shell`, `apply_patch`, or an MCP tool).
        name: String,
        /// Tool input as structured JSON.
        input: Value,
    },
    /// A tool finished.
    ToolResult {
        /// Correlation id shared with the originating call.
        call_id: String,
        /// Captured output.
        output: String,
        /// Whether the tool reported failure.
        is_error: bool,
    },
    /// Rendered summary of the turn's cumulative file changes.
    Diff {
        /// Per-file `+adds/-dels` summary.
        summary: String,
        /// The full unified diff.
        unified_diff: String,
    },
}

impl NormalizedMessage {
    /// Short role label used when rendering transcripts.
    #[must_use]
    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Reasoning { .. } => "reasoning",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Diff { .. } => "diff",
        }
    }
}

/// Session-level notifications for the transport and UI layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The orchestrator is idle and ready for the next message.
    Ready,
    /// Informational text for the user.
    Message {
        /// Text to display.
        text: String,
    },
}
