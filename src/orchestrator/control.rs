//! External control surface: abort, switch-to-local, shutdown, approvals.
//!
//! Every method is safe to call at any time, from any task, with or without
//! a turn in flight, and any number of times.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::permission::ApprovalDecision;
use crate::orchestrator::queue::SessionQueue;

/// Commands the loop must execute itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Deliver a decision for the approval with relay id `id`.
    ResolvePermission {
        /// Relay-assigned approval id.
        id: String,
        /// Decision to deliver.
        decision: ApprovalDecision,
    },
}

struct ControlState {
    exiting: AtomicBool,
    switch_requested: AtomicBool,
    turn_cancel: Mutex<Option<CancellationToken>>,
    wait_cancel: Mutex<Option<CancellationToken>>,
    queue: Arc<dyn SessionQueue>,
    command_tx: mpsc::UnboundedSender<ControlCommand>,
}

/// Cloneable handle for steering a running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    inner: Arc<ControlState>,
}

impl OrchestratorHandle {
    /// Create a handle and the command receiver the loop drains.
    #[must_use]
    pub fn new(queue: Arc<dyn SessionQueue>) -> (Self, mpsc::UnboundedReceiver<ControlCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = Self {
            inner: Arc::new(ControlState {
                exiting: AtomicBool::new(false),
                switch_requested: AtomicBool::new(false),
                turn_cancel: Mutex::new(None),
                wait_cancel: Mutex::new(None),
                queue,
                command_tx,
            }),
        };
        (handle, command_rx)
    }

    /// Abort the in-flight turn and drop queued messages. The session keeps
    /// running.
    pub fn abort(&self) {
        info!("abort requested");
        self.cancel_turn();
        self.inner.queue.reset();
    }

    /// Stop the session and hand control back to the local terminal.
    pub fn switch_to_local(&self) {
        info!("switch to local requested");
        self.inner.switch_requested.store(true, Ordering::SeqCst);
        self.stop();
    }

    /// Stop the session.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.stop();
    }

    /// Deliver a decision for a pending approval.
    ///
    /// Unknown or stale ids are ignored by the loop.
    pub fn resolve_permission(&self, id: impl Into<String>, decision: ApprovalDecision) {
        let command = ControlCommand::ResolvePermission {
            id: id.into(),
            decision,
        };
        if self.inner.command_tx.send(command).is_err() {
            debug!("orchestrator stopped; approval decision dropped");
        }
    }

    /// Whether the loop should stop after the current step.
    #[must_use]
    pub fn is_exiting(&self) -> bool {
        self.inner.exiting.load(Ordering::SeqCst)
    }

    /// Whether the stop was a switch to local control.
    #[must_use]
    pub fn is_switch_requested(&self) -> bool {
        self.inner.switch_requested.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.inner.exiting.store(true, Ordering::SeqCst);
        self.cancel_turn();
        if let Some(token) = lock(&self.inner.wait_cancel).as_ref() {
            token.cancel();
        }
        self.inner.queue.reset();
    }

    fn cancel_turn(&self) {
        if let Some(token) = lock(&self.inner.turn_cancel).as_ref() {
            token.cancel();
        }
    }

    /// Register a fresh cancellation token for the turn about to start.
    pub(crate) fn begin_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut slot = lock(&self.inner.turn_cancel);
        if self.is_exiting() {
            token.cancel();
        }
        *slot = Some(token.clone());
        token
    }

    /// Forget the turn token.
    pub(crate) fn end_turn(&self) {
        *lock(&self.inner.turn_cancel) = None;
    }

    /// Register a fresh cancellation token for a queue wait.
    pub(crate) fn begin_wait(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut slot = lock(&self.inner.wait_cancel);
        if self.is_exiting() {
            token.cancel();
        }
        *slot = Some(token.clone());
        token
    }

    /// Forget the wait token.
    pub(crate) fn end_wait(&self) {
        *lock(&self.inner.wait_cancel) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
