//! Raw event translation.
//!
//! Three stateful reducers ([`reasoning`], [`diff`], [`permission`]) plus
//! the stateless [`normalize`] mapping. [`Translators`] bundles them so the
//! orchestrator loop can route every live event through one call and reset
//! all partial state at once.

pub mod diff;
pub mod normalize;
pub mod permission;
pub mod reasoning;

use crate::models::normalized::NormalizedMessage;
use crate::models::permission::PendingApproval;
use crate::protocol::events::RawEvent;

use self::diff::DiffTranslator;
use self::normalize::normalize_event;
use self::permission::PermissionTranslator;
use self::reasoning::ReasoningTranslator;

/// Output of translating one raw event.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Translation {
    /// Messages for the session sink, in order.
    pub messages: Vec<NormalizedMessage>,
    /// A new approval request for the permission sink.
    pub approval: Option<PendingApproval>,
}

/// The per-session translator set.
#[derive(Debug, Default)]
pub struct Translators {
    /// Reasoning paragraph assembly.
    pub reasoning: ReasoningTranslator,
    /// Turn diff summaries.
    pub diff: DiffTranslator,
    /// Outstanding approvals.
    pub permission: PermissionTranslator,
}

impl Translators {
    /// Create an idle set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one live event through the reducers.
    pub fn apply(&mut self, event: &RawEvent) -> Translation {
        let mut out = Translation::default();
        match event {
            RawEvent::AgentReasoningDelta { delta } => self.reasoning.push_delta(delta),
            RawEvent::AgentReasoningSectionBreak {} => {
                out.messages.extend(self.reasoning.section_break());
            }
            RawEvent::AgentReasoning { text } => {
                out.messages.extend(self.reasoning.complete(text));
            }
            RawEvent::TurnDiff { unified_diff } => self.diff.on_turn_diff(unified_diff),
            RawEvent::ExecApprovalRequest { .. } | RawEvent::ApplyPatchApprovalRequest { .. } => {
                out.approval = self.permission.on_event(event);
            }
            RawEvent::TaskComplete { .. } => {
                out.messages.extend(self.reasoning.flush());
                out.messages.extend(self.diff.flush());
            }
            RawEvent::AgentMessage { .. } => {
                out.messages.extend(self.reasoning.flush());
                out.messages.extend(normalize_event(event));
            }
            other => out.messages.extend(normalize_event(other)),
        }
        out
    }

    /// Discard all partial state. Emits nothing.
    pub fn reset_all(&mut self) {
        self.reasoning.reset();
        self.diff.reset();
        self.permission.reset();
    }
}
