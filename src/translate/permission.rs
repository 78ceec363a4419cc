//! Approval request tracking.
//!
//! Agent approval requests become [`PendingApproval`]s keyed by a
//! relay-assigned id. Resolving an id hands back the agent's `call_id` so the
//! decision can be written to the agent; ids that are unknown (or were
//! discarded by a reset) resolve to nothing.

use crate::models::permission::{ApprovalKind, PendingApproval};
use crate::protocol::events::RawEvent;

/// Reducer state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PermissionState {
    /// No approvals outstanding.
    #[default]
    Idle,
    /// At least one approval awaits a decision, oldest first.
    Awaiting {
        /// Outstanding approvals.
        pending: Vec<PendingApproval>,
    },
}

/// Turns approval-request events into pending decisions.
#[derive(Debug, Default)]
pub struct PermissionTranslator {
    state: PermissionState,
}

impl PermissionTranslator {
    /// Create an idle translator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &PermissionState {
        &self.state
    }

    /// Whether any approval is outstanding.
    #[must_use]
    pub fn is_awaiting(&self) -> bool {
        matches!(self.state, PermissionState::Awaiting { .. })
    }

    /// Record an approval request. Non-approval events are ignored.
    pub fn on_event(&mut self, event: &RawEvent) -> Option<PendingApproval> {
        let approval = match event {
            RawEvent::ExecApprovalRequest {
                call_id,
                command,
                cwd,
                reason,
            } => PendingApproval::new(
                call_id.clone(),
                ApprovalKind::Exec {
                    command: command.clone(),
                    cwd: cwd.clone(),
                },
                reason.clone(),
            ),
            RawEvent::ApplyPatchApprovalRequest {
                call_id,
                changes,
                reason,
            } => PendingApproval::new(
                call_id.clone(),
                ApprovalKind::Patch {
                    files: changes.keys().cloned().collect(),
                },
                reason.clone(),
            ),
            _ => return None,
        };

        match &mut self.state {
            PermissionState::Awaiting { pending } => pending.push(approval.clone()),
            PermissionState::Idle => {
                self.state = PermissionState::Awaiting {
                    pending: vec![approval.clone()],
                };
            }
        }
        Some(approval)
    }

    /// Remove and return the approval with relay id `id`.
    pub fn resolve(&mut self, id: &str) -> Option<PendingApproval> {
        let PermissionState::Awaiting { pending } = &mut self.state else {
            return None;
        };
        let index = pending.iter().position(|a| a.id == id)?;
        let approval = pending.remove(index);
        if pending.is_empty() {
            self.state = PermissionState::Idle;
        }
        Some(approval)
    }

    /// Discard every outstanding approval.
    pub fn reset(&mut self) {
        self.state = PermissionState::Idle;
    }
}
