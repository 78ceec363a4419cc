//! Raw agent events and inbound line parsing.
//!
//! Every notification the agent pushes carries one [`RawEvent`] under
//! `params.msg`. The set is closed: consumers dispatch through a single
//! exhaustive `match`, and anything unrecognised lands in
//! [`RawEvent::Unknown`] instead of failing the stream.
//!
//! | Inbound shape                                 | Parsed as               |
//! |-----------------------------------------------|-------------------------|
//! | `{"method":"event","params":{"msg":{…}}}`     | [`Inbound::Event`]      |
//! | `{"id":N,"result":{…}}`                       | [`Inbound::Response`]   |
//! | `{"id":N,"error":{"code":…,"message":…}}`     | [`Inbound::Response`]   |
//! | *(any other method)*                          | Skipped; logged `DEBUG` |

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{AppError, Result};

/// One low-level event emitted by the agent while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    /// The agent created (or resumed) its own session.
    SessionConfigured {
        /// Agent-assigned session id.
        session_id: String,
        /// Model serving the session.
        #[serde(default)]
        model: Option<String>,
    },
    /// The agent accepted the turn.
    TaskStarted {},
    /// Echo of the user's message as recorded by the agent.
    UserMessage {
        /// Message text.
        message: String,
    },
    /// A complete assistant message.
    AgentMessage {
        /// Message text.
        message: String,
    },
    /// Streaming fragment of an assistant message.
    AgentMessageDelta {
        /// Text fragment.
        delta: String,
    },
    /// A complete reasoning block.
    AgentReasoning {
        /// Reasoning text.
        text: String,
    },
    /// Streaming fragment of reasoning.
    AgentReasoningDelta {
        /// Text fragment.
        delta: String,
    },
    /// Boundary between reasoning paragraphs.
    AgentReasoningSectionBreak {},
    /// A shell command started.
    ExecCommandBegin {
        /// Correlation id.
        call_id: String,
        /// Command argv.
        #[serde(default)]
        command: Vec<String>,
        /// Working directory.
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    /// A shell command finished.
    ExecCommandEnd {
        /// Correlation id.
        call_id: String,
        /// Process exit code.
        #[serde(default)]
        exit_code: i32,
        /// Captured standard output.
        #[serde(default)]
        stdout: String,
        /// Captured standard error.
        #[serde(default)]
        stderr: String,
    },
    /// An MCP tool call started.
    McpToolCallBegin {
        /// Correlation id.
        call_id: String,
        /// MCP server name.
        #[serde(default)]
        server: String,
        /// Tool name.
        tool: String,
        /// Tool arguments.
        #[serde(default)]
        arguments: Value,
    },
    /// An MCP tool call finished.
    McpToolCallEnd {
        /// Correlation id.
        call_id: String,
        /// Tool result payload.
        #[serde(default)]
        result: Value,
        /// Whether the tool reported failure.
        #[serde(default)]
        is_error: bool,
    },
    /// The agent asks permission to run a command.
    ExecApprovalRequest {
        /// Correlation id echoed in the decision.
        call_id: String,
        /// Command argv.
        #[serde(default)]
        command: Vec<String>,
        /// Working directory.
        #[serde(default)]
        cwd: Option<PathBuf>,
        /// Agent-supplied justification.
        #[serde(default)]
        reason: Option<String>,
    },
    /// The agent asks permission to apply file changes.
    ApplyPatchApprovalRequest {
        /// Correlation id echoed in the decision.
        call_id: String,
        /// Per-path change descriptions.
        #[serde(default)]
        changes: BTreeMap<String, Value>,
        /// Agent-supplied justification.
        #[serde(default)]
        reason: Option<String>,
    },
    /// A patch application started.
    PatchApplyBegin {
        /// Correlation id.
        call_id: String,
        /// Per-path change descriptions.
        #[serde(default)]
        changes: BTreeMap<String, Value>,
    },
    /// A patch application finished.
    PatchApplyEnd {
        /// Correlation id.
        call_id: String,
        /// Whether every change applied.
        #[serde(default)]
        success: bool,
        /// Tool output.
        #[serde(default)]
        stdout: String,
        /// Tool error output.
        #[serde(default)]
        stderr: String,
    },
    /// Cumulative unified diff for the current turn.
    TurnDiff {
        /// Unified diff text.
        unified_diff: String,
    },
    /// Token accounting update.
    TokenCount {
        /// Usage payload, passed through untouched.
        #[serde(default)]
        info: Value,
    },
    /// The agent finished the turn.
    TaskComplete {
        /// Final assistant message, if any.
        #[serde(default)]
        last_agent_message: Option<String>,
    },
    /// The agent stopped the turn early.
    TurnAborted {
        /// Abort reason.
        #[serde(default)]
        reason: Option<String>,
    },
    /// The agent reported an error.
    Error {
        /// Error text.
        message: String,
    },
    /// Any event type this relay does not model.
    #[serde(other)]
    Unknown,
}

impl RawEvent {
    /// The wire `type` tag, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionConfigured { .. } => "session_configured",
            Self::TaskStarted {} => "task_started",
            Self::UserMessage { .. } => "user_message",
            Self::AgentMessage { .. } => "agent_message",
            Self::AgentMessageDelta { .. } => "agent_message_delta",
            Self::AgentReasoning { .. } => "agent_reasoning",
            Self::AgentReasoningDelta { .. } => "agent_reasoning_delta",
            Self::AgentReasoningSectionBreak {} => "agent_reasoning_section_break",
            Self::ExecCommandBegin { .. } => "exec_command_begin",
            Self::ExecCommandEnd { .. } => "exec_command_end",
            Self::McpToolCallBegin { .. } => "mcp_tool_call_begin",
            Self::McpToolCallEnd { .. } => "mcp_tool_call_end",
            Self::ExecApprovalRequest { .. } => "exec_approval_request",
            Self::ApplyPatchApprovalRequest { .. } => "apply_patch_approval_request",
            Self::PatchApplyBegin { .. } => "patch_apply_begin",
            Self::PatchApplyEnd { .. } => "patch_apply_end",
            Self::TurnDiff { .. } => "turn_diff",
            Self::TokenCount { .. } => "token_count",
            Self::TaskComplete { .. } => "task_complete",
            Self::TurnAborted { .. } => "turn_aborted",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// JSON-RPC error body carried by a failed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    /// Numeric error code.
    #[serde(default)]
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// A parsed inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to a request this relay issued.
    Response {
        /// Correlation id of the originating request.
        id: u64,
        /// Result payload or error body.
        outcome: std::result::Result<Value, RpcError>,
    },
    /// An agent event notification.
    Event(RawEvent),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct EventParams {
    msg: RawEvent,
}

/// Parse one NDJSON line from the agent's stdout.
///
/// - `Ok(Some(_))`: a response or an event notification.
/// - `Ok(None)`: blank line or a method this relay does not consume.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if the line is not valid JSON, an `event`
/// notification lacks `params.msg`, or an envelope is neither a response nor
/// a notification.
pub fn parse_inbound_line(line: &str) -> Result<Option<Inbound>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let envelope: Envelope = serde_json::from_str(line)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

    if let Some(method) = envelope.method.as_deref() {
        if method != "event" {
            debug!(method, "agent reader: skipping unconsumed method");
            return Ok(None);
        }
        let params = envelope
            .params
            .ok_or_else(|| AppError::Protocol("event notification without params".into()))?;
        let params: EventParams = serde_json::from_value(params)
            .map_err(|e| AppError::Protocol(format!("invalid event params: {e}")))?;
        return Ok(Some(Inbound::Event(params.msg)));
    }

    let Some(id) = envelope.id.as_ref().and_then(Value::as_u64) else {
        return Err(AppError::Protocol(
            "envelope has neither method nor numeric id".into(),
        ));
    };

    let outcome = match envelope.error {
        Some(err) => Err(err),
        None => Ok(envelope.result.unwrap_or(Value::Null)),
    };
    Ok(Some(Inbound::Response { id, outcome }))
}
