//! Coarse classification of what the agent is currently doing.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// What the agent is currently believed to be doing.
///
/// Exactly one phase is active at a time. The orchestrator loop is the only
/// writer; the stall monitor reads it to pick a liveness timeout. `Idle`
/// holds whenever no turn is in flight.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No turn in flight.
    #[default]
    Idle,
    /// Turn just submitted, nothing heard back yet.
    Request,
    /// Agent is reasoning or streaming a reply.
    Thinking,
    /// Agent is executing a command or tool.
    Tool,
    /// Agent is applying a file change.
    Patch,
    /// Agent reported task completion; the turn call has not returned yet.
    Complete,
}

impl Phase {
    /// Whether this phase can carry outstanding sub-operations.
    #[must_use]
    pub fn tracks_active_operations(self) -> bool {
        matches!(self, Self::Tool | Self::Patch)
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Request => "request",
            Self::Thinking => "thinking",
            Self::Tool => "tool",
            Self::Patch => "patch",
            Self::Complete => "complete",
        };
        f.write_str(label)
    }
}
