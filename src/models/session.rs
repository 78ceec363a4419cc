//! Session model and lifecycle helpers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why [`launch`](crate::orchestrator::session_loop::Orchestrator::launch) returned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Input ended or shutdown was requested.
    Exit,
    /// Control is handed back to the local terminal.
    Switch,
}

/// One conversation with the agent.
///
/// The local id is stable for the lifetime of the orchestrator and across
/// agent restarts; the agent-assigned id is learned from the agent and may
/// change whenever a fresh agent session is started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Stable local identifier.
    pub id: String,
    /// Identifier assigned by the agent process, once known.
    pub agent_session_id: Option<String>,
    /// Working directory the agent operates in.
    pub cwd: PathBuf,
    /// Hash of the mode the current agent session was started with.
    pub mode_hash: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last time the agent session identity changed.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Construct a session with a generated local identifier.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), cwd)
    }

    /// Construct a session with a pre-assigned local identifier.
    #[must_use]
    pub fn with_id(id: String, cwd: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            agent_session_id: None,
            cwd,
            mode_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record the agent-assigned identifier.
    ///
    /// Returns `true` when the identifier is new (first learned or changed).
    pub fn record_agent_session(&mut self, agent_session_id: &str) -> bool {
        if self.agent_session_id.as_deref() == Some(agent_session_id) {
            return false;
        }
        self.agent_session_id = Some(agent_session_id.to_owned());
        self.updated_at = Utc::now();
        true
    }

    /// Forget the agent session and the mode it was started with.
    pub fn clear_agent_session(&mut self) {
        self.agent_session_id = None;
        self.mode_hash = None;
        self.updated_at = Utc::now();
    }
}
