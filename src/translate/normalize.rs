//! Stateless mapping from raw agent records to [`NormalizedMessage`]s.
//!
//! Shared by the live event path and transcript replay so both produce the
//! same messages for the same input.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::normalized::NormalizedMessage;
use crate::protocol::events::RawEvent;
use crate::translate::reasoning::split_title;

/// Map one raw event to a user-facing message.
///
/// Streaming deltas, section breaks, approval requests, diffs, and
/// bookkeeping events have no standalone representation and yield `None`;
/// the stateful translators handle them.
#[must_use]
pub fn normalize_event(event: &RawEvent) -> Option<NormalizedMessage> {
    match event {
        RawEvent::UserMessage { message } => {
            non_empty(message).map(|text| NormalizedMessage::User { text })
        }
        RawEvent::AgentMessage { message } => {
            non_empty(message).map(|text| NormalizedMessage::Assistant { text })
        }
        RawEvent::AgentReasoning { text } => {
            let (title, text) = split_title(text);
            (title.is_some() || !text.is_empty())
                .then_some(NormalizedMessage::Reasoning { title, text })
        }
        RawEvent::ExecCommandBegin {
            call_id,
            command,
            cwd,
        } => Some(NormalizedMessage::ToolCall {
            call_id: call_id.clone(),
            name: "shell".into(),
            input: json!({ "command": command, "cwd": cwd }),
        }),
        RawEvent::ExecCommandEnd {
            call_id,
            exit_code,
            stdout,
            stderr,
        } => Some(NormalizedMessage::ToolResult {
            call_id: call_id.clone(),
            output: join_output(stdout, stderr),
            is_error: *exit_code != 0,
        }),
        RawEvent::McpToolCallBegin {
            call_id,
            server,
            tool,
            arguments,
        } => Some(NormalizedMessage::ToolCall {
            call_id: call_id.clone(),
            name: if server.is_empty() {
                tool.clone()
            } else {
                format!("{server}.{tool}")
            },
            input: arguments.clone(),
        }),
        RawEvent::McpToolCallEnd {
            call_id,
            result,
            is_error,
        } => Some(NormalizedMessage::ToolResult {
            call_id: call_id.clone(),
            output: value_text(result),
            is_error: *is_error,
        }),
        RawEvent::PatchApplyBegin { call_id, changes } => Some(NormalizedMessage::ToolCall {
            call_id: call_id.clone(),
            name: "apply_patch".into(),
            input: json!({ "changes": changes }),
        }),
        RawEvent::PatchApplyEnd {
            call_id,
            success,
            stdout,
            stderr,
        } => Some(NormalizedMessage::ToolResult {
            call_id: call_id.clone(),
            output: join_output(stdout, stderr),
            is_error: !success,
        }),
        RawEvent::SessionConfigured { .. }
        | RawEvent::TaskStarted {}
        | RawEvent::AgentMessageDelta { .. }
        | RawEvent::AgentReasoningDelta { .. }
        | RawEvent::AgentReasoningSectionBreak {}
        | RawEvent::ExecApprovalRequest { .. }
        | RawEvent::ApplyPatchApprovalRequest { .. }
        | RawEvent::TurnDiff { .. }
        | RawEvent::TokenCount { .. }
        | RawEvent::TaskComplete { .. }
        | RawEvent::TurnAborted { .. }
        | RawEvent::Error { .. }
        | RawEvent::Unknown => None,
    }
}

// ── Transcript records ────────────────────────────────────────────────────────

/// One line of an on-disk transcript.
#[derive(Debug, Deserialize)]
struct TranscriptRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// Model-facing conversation items recorded alongside events.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseItem {
    Message {
        role: String,
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    Reasoning {
        #[serde(default)]
        summary: Vec<ContentPart>,
    },
    FunctionCall {
        name: String,
        #[serde(default)]
        arguments: String,
        call_id: String,
    },
    FunctionCallOutput {
        call_id: String,
        #[serde(default)]
        output: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

/// Normalize one transcript line.
///
/// Lines are `{"type":"event_msg","payload":<event>}` or
/// `{"type":"response_item","payload":<item>}`. Unparseable lines and
/// record kinds without a user-facing form yield `None`.
#[must_use]
pub fn normalize_transcript_line(line: &str) -> Option<NormalizedMessage> {
    let record: TranscriptRecord = serde_json::from_str(line.trim()).ok()?;
    match record.kind.as_str() {
        "event_msg" => {
            let event: RawEvent = serde_json::from_value(record.payload).ok()?;
            normalize_event(&event)
        }
        "response_item" => serde_json::from_value(record.payload)
            .ok()
            .and_then(normalize_response_item),
        _ => None,
    }
}

fn normalize_response_item(item: ResponseItem) -> Option<NormalizedMessage> {
    match item {
        ResponseItem::Message { role, content } => {
            let text = join_parts(&content);
            let text = non_empty(&text)?;
            match role.as_str() {
                "user" => Some(NormalizedMessage::User { text }),
                "assistant" => Some(NormalizedMessage::Assistant { text }),
                _ => None,
            }
        }
        ResponseItem::Reasoning { summary } => {
            let (title, text) = split_title(&join_parts(&summary));
            (title.is_some() || !text.is_empty())
                .then_some(NormalizedMessage::Reasoning { title, text })
        }
        ResponseItem::FunctionCall {
            name,
            arguments,
            call_id,
        } => {
            let input = serde_json::from_str(&arguments).unwrap_or(Value::String(arguments));
            Some(NormalizedMessage::ToolCall {
                call_id,
                name,
                input,
            })
        }
        ResponseItem::FunctionCallOutput { call_id, output } => {
            Some(NormalizedMessage::ToolResult {
                call_id,
                output: value_text(&output),
                is_error: false,
            })
        }
        ResponseItem::Other => None,
    }
}

fn join_parts(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn join_output(stdout: &str, stderr: &str) -> String {
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (_, true) => stdout.to_owned(),
        (true, false) => stderr.to_owned(),
        (false, false) => format!("{stdout}\n{stderr}"),
    }
}

/// Render a JSON value as text: strings verbatim, everything else as JSON.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
