//! Protocol-agnostic agent client abstraction.
//!
//! The [`AgentClient`] trait decouples the orchestrator loop from the wire
//! protocol spoken with the agent process. Inbound events are not part of
//! the trait: implementations push them into the `mpsc` channel they were
//! constructed with, and the loop owns the receiving end.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::models::message::EnhancedMode;
use crate::models::permission::ApprovalDecision;
use crate::Result;

/// Boxed future returned by [`AgentClient`] methods.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Parameters for starting a fresh agent session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    /// User instruction.
    pub prompt: String,
    /// Working directory for the agent session.
    pub cwd: PathBuf,
    /// Mode the session is started with.
    pub mode: EnhancedMode,
    /// Context reconstructed from a previous transcript, if any.
    pub resume_context: Option<String>,
}

impl TurnRequest {
    /// The prompt as delivered to the agent, seeded with resume context.
    #[must_use]
    pub fn effective_prompt(&self) -> String {
        match &self.resume_context {
            Some(context) => format!("{context}\n\n{}", self.prompt),
            None => self.prompt.clone(),
        }
    }
}

/// What the agent reported when a turn finished.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TurnOutcome {
    /// Agent session the turn ran in.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Final assistant message, if reported.
    #[serde(default)]
    pub last_agent_message: Option<String>,
}

/// Reference kept across an abort or restart so the next turn can be seeded
/// with reconstructed context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResumePointer {
    /// Locate the transcript by agent session id.
    SessionId(String),
    /// A transcript file already located.
    Path(PathBuf),
}

/// Connection to one agent process.
///
/// `start_turn` and `continue_turn` resolve only once the turn has fully
/// finished or `cancel` fired; cancellation yields
/// [`AppError::Aborted`](crate::AppError::Aborted), distinct from transport
/// failures. Cancelling never disconnects by itself.
pub trait AgentClient: Send + Sync {
    /// Launch or attach to the agent and complete the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ConnectTimeout`](crate::AppError::ConnectTimeout)
    /// if the handshake does not complete within `timeout`.
    fn connect(&self, timeout: Duration) -> ClientFuture<'_, Result<()>>;

    /// Tear down the connection. Idempotent.
    fn disconnect(&self) -> ClientFuture<'_, ()>;

    /// Whether a handshaken connection is currently live.
    fn is_connected(&self) -> bool;

    /// Start a new agent session with the first turn.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Aborted` when `cancel` fires, otherwise a transport
    /// or protocol error if the turn fails.
    fn start_turn(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> ClientFuture<'_, Result<TurnOutcome>>;

    /// Continue the existing agent session with another turn.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Aborted` when `cancel` fires, `AppError::NotFound`
    /// without an active session, otherwise a transport or protocol error.
    fn continue_turn(
        &self,
        prompt: String,
        cancel: CancellationToken,
    ) -> ClientFuture<'_, Result<TurnOutcome>>;

    /// Deliver the caller's decision on an approval request.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the agent cannot be reached.
    fn respond_to_approval(
        &self,
        call_id: String,
        decision: ApprovalDecision,
    ) -> ClientFuture<'_, Result<()>>;

    /// Whether the agent has created a session.
    fn has_active_session(&self) -> bool;

    /// Agent-assigned session id, if any.
    fn session_id(&self) -> Option<String>;

    /// Capture the current agent session as a resume pointer.
    fn store_session_for_resume(&self) -> Option<ResumePointer>;

    /// Forget the agent session so the next turn starts fresh.
    fn clear_session(&self);
}
