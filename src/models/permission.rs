//! Approval requests raised by the agent and the caller's decisions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the agent is asking permission to do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalKind {
    /// Run a shell command.
    Exec {
        /// Command argv.
        command: Vec<String>,
        /// Directory the command would run in.
        cwd: Option<PathBuf>,
    },
    /// Apply file changes.
    Patch {
        /// Paths touched by the change.
        files: Vec<String>,
    },
}

/// Caller's verdict on a pending approval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Allow this one request.
    Approved,
    /// Allow this and identical requests for the rest of the session.
    ApprovedForSession,
    /// Refuse; the agent continues without it.
    Denied,
    /// Refuse and stop the turn.
    Abort,
}

/// An approval request awaiting the caller's decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PendingApproval {
    /// Relay-assigned identifier used to resolve the request.
    pub id: String,
    /// Agent-side correlation id written back with the decision.
    pub call_id: String,
    /// What is being requested.
    pub kind: ApprovalKind,
    /// Agent-supplied justification.
    pub reason: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl PendingApproval {
    /// Construct a pending approval with a generated identifier.
    #[must_use]
    pub fn new(call_id: String, kind: ApprovalKind, reason: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            call_id,
            kind,
            reason,
            created_at: Utc::now(),
        }
    }
}
