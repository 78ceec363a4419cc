//! Outbound collaborators: where session output goes.

use tokio::sync::mpsc;
use tracing::debug;

use crate::models::normalized::{NormalizedMessage, SessionEvent};
use crate::models::permission::PendingApproval;
use crate::models::phase::Phase;

/// Receives everything the session produces for the transport/UI layer.
pub trait SessionSink: Send + Sync {
    /// A normalized, user-facing message.
    fn send_normalized_message(&self, message: NormalizedMessage);

    /// A session-level event (`ready`, informational text).
    fn send_session_event(&self, event: SessionEvent);

    /// The thinking indicator flipped.
    fn on_thinking_changed(&self, thinking: bool);

    /// The agent assigned a (new) session id.
    fn on_agent_session_id_discovered(&self, agent_session_id: &str);

    /// The loop's phase tracking moved.
    fn on_phase_changed(&self, _phase: Phase) {}
}

/// Receives approval requests; resolves them through
/// [`OrchestratorHandle::resolve_permission`](crate::orchestrator::control::OrchestratorHandle::resolve_permission).
pub trait PermissionSink: Send + Sync {
    /// A new approval awaits a decision.
    fn on_permission_requested(&self, approval: PendingApproval);
}

/// Everything a [`ChannelSink`] forwards.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// See [`SessionSink::send_normalized_message`].
    Message(NormalizedMessage),
    /// See [`SessionSink::send_session_event`].
    Session(SessionEvent),
    /// See [`SessionSink::on_thinking_changed`].
    Thinking(bool),
    /// See [`SessionSink::on_agent_session_id_discovered`].
    AgentSessionId(String),
    /// See [`SessionSink::on_phase_changed`].
    Phase(Phase),
    /// See [`PermissionSink::on_permission_requested`].
    Permission(PendingApproval),
}

/// Sink that forwards every callback, in order, over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its events arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SinkEvent) {
        if self.tx.send(event).is_err() {
            debug!("sink receiver dropped");
        }
    }
}

impl SessionSink for ChannelSink {
    fn send_normalized_message(&self, message: NormalizedMessage) {
        self.forward(SinkEvent::Message(message));
    }

    fn send_session_event(&self, event: SessionEvent) {
        self.forward(SinkEvent::Session(event));
    }

    fn on_thinking_changed(&self, thinking: bool) {
        self.forward(SinkEvent::Thinking(thinking));
    }

    fn on_agent_session_id_discovered(&self, agent_session_id: &str) {
        self.forward(SinkEvent::AgentSessionId(agent_session_id.to_owned()));
    }

    fn on_phase_changed(&self, phase: Phase) {
        self.forward(SinkEvent::Phase(phase));
    }
}

impl PermissionSink for ChannelSink {
    fn on_permission_requested(&self, approval: PendingApproval) {
        self.forward(SinkEvent::Permission(approval));
    }
}
