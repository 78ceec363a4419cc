//! Orchestrator loop.
//!
//! One routine owns the session: it pulls messages from the queue, issues
//! exactly one agent turn at a time, routes the turn's events through the
//! translators, and reacts to stall verdicts and control commands while the
//! turn runs. Everything that talks to the agent happens here; the stall
//! monitor only reports.
//!
//! ```text
//! waiting-for-message ──dequeue──▶ starting-turn | continuing-turn
//!        ▲                                   │
//!        └──────────── turn-finishing ◀──────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::RelayConfig;
use crate::models::message::PendingMessage;
use crate::models::normalized::SessionEvent;
use crate::models::phase::Phase;
use crate::models::session::{ExitReason, Session};
use crate::orchestrator::control::{ControlCommand, OrchestratorHandle};
use crate::orchestrator::queue::{SessionQueue, WaitOutcome};
use crate::orchestrator::sink::{PermissionSink, SessionSink};
use crate::orchestrator::stall_monitor::{Activity, StallEvent, StallMonitor, StallMonitorHandle};
use crate::protocol::client::{AgentClient, ResumePointer, TurnOutcome, TurnRequest};
use crate::protocol::events::RawEvent;
use crate::resume::ResumeReconstructor;
use crate::transcript::TranscriptStore;
use crate::translate::Translators;
use crate::{AppError, Result};

/// Stall verdict channel depth.
const STALL_CHANNEL_CAPACITY: usize = 8;

/// First delay after a spurious queue-wait cancellation.
const WAIT_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Upper bound for the queue-wait backoff.
const WAIT_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Why a turn call returned an error, as seen by the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnFailure {
    /// The stall monitor tore the turn down.
    StallRecovery,
    /// The caller aborted the turn.
    Aborted,
    /// Anything else: transport loss, agent crash, protocol error.
    Unexpected(AppError),
}

/// External collaborators the loop drives.
pub struct OrchestratorDeps {
    /// Connection to the agent.
    pub client: Arc<dyn AgentClient>,
    /// Source of user messages.
    pub queue: Arc<dyn SessionQueue>,
    /// Destination for session output.
    pub sink: Arc<dyn SessionSink>,
    /// Destination for approval requests.
    pub permissions: Arc<dyn PermissionSink>,
    /// Transcript lookup for resume context.
    pub transcripts: Arc<dyn TranscriptStore>,
}

/// A configured, not yet running session.
pub struct Orchestrator {
    config: RelayConfig,
    session: Session,
    deps: OrchestratorDeps,
    events: mpsc::Receiver<RawEvent>,
    handle: OrchestratorHandle,
    control_rx: mpsc::UnboundedReceiver<ControlCommand>,
}

impl Orchestrator {
    /// Assemble an orchestrator. `events` must be the receiving end of the
    /// channel the agent client was constructed with.
    #[must_use]
    pub fn new(
        config: RelayConfig,
        session: Session,
        deps: OrchestratorDeps,
        events: mpsc::Receiver<RawEvent>,
    ) -> (Self, OrchestratorHandle) {
        let (handle, control_rx) = OrchestratorHandle::new(Arc::clone(&deps.queue));
        let orchestrator = Self {
            config,
            session,
            deps,
            events,
            handle: handle.clone(),
            control_rx,
        };
        (orchestrator, handle)
    }

    /// The session this orchestrator drives.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Connect to the agent and process messages until input ends, a
    /// shutdown is requested, or control switches back to local.
    ///
    /// # Errors
    ///
    /// Returns the connect error (typically
    /// [`AppError::ConnectTimeout`]) if the initial handshake fails. Nothing
    /// after start-up is fatal.
    pub async fn launch(self) -> Result<ExitReason> {
        let Self {
            config,
            session,
            deps,
            events,
            handle,
            control_rx,
        } = self;
        let span = info_span!("orchestrator", session_id = %session.id);

        async move {
            info!(cwd = %session.cwd.display(), "connecting to agent");
            if let Err(err) = deps.client.connect(config.connect_timeout()).await {
                error!(%err, "agent connect failed");
                deps.client.disconnect().await;
                return Err(err);
            }

            let (stall_tx, stall_rx) = mpsc::channel(STALL_CHANNEL_CAPACITY);
            let monitor =
                StallMonitor::new(config.stall.clone(), stall_tx, CancellationToken::new()).spawn();

            let mut inbox = Inbox {
                events,
                stall: stall_rx,
                control: control_rx,
            };
            let mut runner = Runner {
                resume: ResumeReconstructor::new(
                    Arc::clone(&deps.transcripts),
                    config.resume.clone(),
                ),
                client: Arc::clone(&deps.client),
                queue: deps.queue,
                sink: deps.sink,
                permissions: deps.permissions,
                handle,
                monitor,
                connect_timeout: config.connect_timeout(),
                session,
                translators: Translators::new(),
                phase: Phase::Idle,
                active_operations: 0,
                thinking: false,
                turn_in_flight: false,
                ignore_events: false,
                restart_in_progress: false,
                mode_change_pointer: None,
                recovery_pointer: None,
                first_turn: true,
                turn_generation: 0,
                requeued: None,
                wait_failures: 0,
            };

            let reason = runner.run(&mut inbox).await;
            runner.set_thinking(false);
            runner.monitor.await_completion().await;
            deps.client.disconnect().await;
            info!(?reason, "orchestrator stopped");
            Ok(reason)
        }
        .instrument(span)
        .await
    }
}

/// Receivers drained by the loop, kept apart from the mutable loop state so
/// `select!` arms can borrow both.
struct Inbox {
    events: mpsc::Receiver<RawEvent>,
    stall: mpsc::Receiver<StallEvent>,
    control: mpsc::UnboundedReceiver<ControlCommand>,
}

enum Next {
    Message(PendingMessage),
    Retry,
    Closed,
}

#[allow(clippy::struct_excessive_bools)] // Independent loop flags, not a state encoding.
struct Runner {
    client: Arc<dyn AgentClient>,
    queue: Arc<dyn SessionQueue>,
    sink: Arc<dyn SessionSink>,
    permissions: Arc<dyn PermissionSink>,
    resume: ResumeReconstructor,
    handle: OrchestratorHandle,
    monitor: StallMonitorHandle,
    connect_timeout: Duration,
    session: Session,
    translators: Translators,
    phase: Phase,
    active_operations: u32,
    thinking: bool,
    turn_in_flight: bool,
    ignore_events: bool,
    restart_in_progress: bool,
    mode_change_pointer: Option<ResumePointer>,
    recovery_pointer: Option<ResumePointer>,
    first_turn: bool,
    turn_generation: u64,
    requeued: Option<PendingMessage>,
    wait_failures: u32,
}

impl Runner {
    async fn run(&mut self, inbox: &mut Inbox) -> ExitReason {
        loop {
            if self.handle.is_exiting() {
                break;
            }

            let message = if let Some(message) = self.requeued.take() {
                message
            } else {
                match self.next_message(inbox).await {
                    Next::Message(message) => message,
                    Next::Retry => continue,
                    Next::Closed => {
                        info!("input closed");
                        break;
                    }
                }
            };

            if self.mode_changed(&message) {
                self.tear_down_for_mode_change(message);
                continue;
            }

            self.run_turn(message, inbox).await;
        }

        if self.handle.is_switch_requested() {
            ExitReason::Switch
        } else {
            ExitReason::Exit
        }
    }

    // ── Waiting for a message ────────────────────────────────────────────────

    async fn next_message(&mut self, inbox: &mut Inbox) -> Next {
        let cancel = self.handle.begin_wait();
        let queue = Arc::clone(&self.queue);
        let wait = queue.wait_for_next_message(cancel);
        tokio::pin!(wait);

        let outcome = loop {
            tokio::select! {
                outcome = &mut wait => break outcome,
                Some(command) = inbox.control.recv() => self.handle_command(command).await,
                Some(event) = inbox.events.recv() => {
                    debug!(kind = event.kind(), "dropping event with no turn in flight");
                }
                Some(verdict) = inbox.stall.recv() => {
                    debug!(?verdict, "ignoring stall verdict with no turn in flight");
                }
            }
        };
        self.handle.end_wait();

        match outcome {
            WaitOutcome::Message(message) => {
                self.wait_failures = 0;
                Next::Message(message)
            }
            WaitOutcome::Closed => Next::Closed,
            WaitOutcome::Cancelled if self.handle.is_exiting() => Next::Retry,
            WaitOutcome::Cancelled => {
                self.wait_failures = self.wait_failures.saturating_add(1);
                let delay = wait_backoff(self.wait_failures);
                warn!(
                    attempt = self.wait_failures,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "queue wait cancelled unexpectedly; backing off"
                );
                tokio::time::sleep(delay).await;
                Next::Retry
            }
        }
    }

    // ── Mode changes ─────────────────────────────────────────────────────────

    fn mode_changed(&self, message: &PendingMessage) -> bool {
        self.client.has_active_session()
            && self
                .session
                .mode_hash
                .as_deref()
                .is_some_and(|active| active != message.mode_hash)
    }

    fn tear_down_for_mode_change(&mut self, message: PendingMessage) {
        info!(
            agent_session_id = ?self.client.session_id(),
            "mode changed; starting a fresh agent session"
        );
        if let Some(pointer) = self.client.store_session_for_resume() {
            self.mode_change_pointer = Some(pointer);
        }
        self.client.clear_session();
        self.session.clear_agent_session();
        self.translators.reset_all();
        self.set_thinking(false);
        self.requeued = Some(message);
    }

    // ── Turns ────────────────────────────────────────────────────────────────

    async fn run_turn(&mut self, message: PendingMessage, inbox: &mut Inbox) {
        // Registered before any await so an abort during reconnect or resume
        // lookup is not lost.
        let cancel = self.handle.begin_turn();

        if !self.client.is_connected() {
            info!("agent disconnected; reconnecting");
            if let Err(err) = self.client.connect(self.connect_timeout).await {
                warn!(%err, "agent reconnect failed");
                self.notify_user(format!("Could not reconnect to the agent: {err}"));
                self.finish_turn();
                return;
            }
        }
        if !self.client.has_active_session() && self.session.agent_session_id.is_some() {
            self.session.clear_agent_session();
        }

        let mut stale = 0_usize;
        while inbox.events.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "discarded events buffered before the turn");
        }
        while let Ok(verdict) = inbox.stall.try_recv() {
            debug!(?verdict, "discarded stall verdict from an earlier turn");
        }
        self.ignore_events = false;
        self.restart_in_progress = false;

        let starting = !self.client.has_active_session();
        let resume_context = if starting {
            self.resolve_resume_context().await
        } else {
            None
        };

        if cancel.is_cancelled() {
            info!("turn aborted before it was issued");
            self.notify_user("Aborted.".into());
            self.finish_turn();
            return;
        }
        if starting {
            self.mode_change_pointer = None;
            self.recovery_pointer = None;
        }
        self.first_turn = false;

        self.turn_generation += 1;
        self.turn_in_flight = true;
        self.monitor.report(Activity::TurnStarted {
            turn: self.turn_generation,
        });
        self.set_phase(Phase::Request, 0);
        self.set_thinking(true);

        let client = Arc::clone(&self.client);
        let turn = if starting {
            self.session.mode_hash = Some(message.mode_hash.clone());
            info!(resumed = resume_context.is_some(), "starting agent session");
            client.start_turn(
                TurnRequest {
                    prompt: message.message,
                    cwd: self.session.cwd.clone(),
                    mode: message.mode,
                    resume_context,
                },
                cancel.clone(),
            )
        } else {
            debug!(agent_session_id = ?self.session.agent_session_id, "continuing agent session");
            client.continue_turn(message.message, cancel.clone())
        };
        tokio::pin!(turn);

        let result = loop {
            tokio::select! {
                result = &mut turn => break result,
                Some(event) = inbox.events.recv() => self.handle_event(event),
                Some(verdict) = inbox.stall.recv() => self.handle_stall(verdict, &cancel).await,
                Some(command) = inbox.control.recv() => self.handle_command(command).await,
            }
        };

        if !self.ignore_events {
            while let Ok(event) = inbox.events.try_recv() {
                self.handle_event(event);
            }
        }

        match result {
            Ok(outcome) => self.on_turn_success(outcome),
            Err(err) => {
                let failure = self.classify(err);
                self.on_turn_failure(failure);
            }
        }
        self.finish_turn();
    }

    /// Pick at most one resume source: a mode-change pointer, then an
    /// abort/stall pointer, then (first turn only) the local session's own
    /// transcript. Pointers stay in place until the turn is actually issued.
    async fn resolve_resume_context(&self) -> Option<String> {
        let pointer = match (&self.mode_change_pointer, &self.recovery_pointer) {
            (Some(pointer), _) | (None, Some(pointer)) => pointer.clone(),
            (None, None) if self.first_turn => ResumePointer::SessionId(self.session.id.clone()),
            (None, None) => return None,
        };
        debug!(?pointer, "resolving resume context");
        self.resume
            .reconstruct(&pointer)
            .await
            .map(|context| context.text)
    }

    fn classify(&self, err: AppError) -> TurnFailure {
        if self.restart_in_progress {
            TurnFailure::StallRecovery
        } else if err.is_aborted() {
            TurnFailure::Aborted
        } else {
            TurnFailure::Unexpected(err)
        }
    }

    fn on_turn_success(&mut self, outcome: TurnOutcome) {
        if let Some(id) = outcome.session_id {
            self.record_agent_session(&id);
        }
        self.mode_change_pointer = None;
        self.recovery_pointer = None;
        debug!("turn completed");
    }

    fn on_turn_failure(&mut self, failure: TurnFailure) {
        match failure {
            TurnFailure::StallRecovery => {
                warn!("turn ended by stall recovery");
                self.client.clear_session();
                self.session.clear_agent_session();
                self.notify_user(
                    "The agent stopped responding and was restarted. \
                     Your next message will continue from the saved context."
                        .into(),
                );
            }
            TurnFailure::Aborted => {
                info!("turn aborted");
                if let Some(pointer) = self.client.store_session_for_resume() {
                    self.recovery_pointer = Some(pointer);
                }
                self.client.clear_session();
                self.session.clear_agent_session();
                self.notify_user("Aborted.".into());
            }
            TurnFailure::Unexpected(err) => {
                warn!(%err, "turn failed unexpectedly");
                if let Some(pointer) = self.client.store_session_for_resume() {
                    self.recovery_pointer = Some(pointer);
                }
                self.notify_user(format!("Agent process exited unexpectedly: {err}"));
            }
        }
    }

    fn finish_turn(&mut self) {
        self.handle.end_turn();
        self.turn_in_flight = false;
        self.monitor.report(Activity::TurnEnded);
        self.set_phase(Phase::Idle, 0);
        self.restart_in_progress = false;
        self.translators.reset_all();
        self.set_thinking(false);
        if self.queue.size() == 0 && !self.handle.is_exiting() {
            self.sink.send_session_event(SessionEvent::Ready);
        }
    }

    // ── Inbound events ───────────────────────────────────────────────────────

    fn handle_event(&mut self, event: RawEvent) {
        if self.ignore_events || !self.turn_in_flight {
            debug!(kind = event.kind(), "dropping event outside the active turn");
            return;
        }
        self.restart_in_progress = false;

        if let RawEvent::SessionConfigured { session_id, .. } = &event {
            self.record_agent_session(session_id);
        }

        let (phase, active) = next_phase(&event, self.phase, self.active_operations);
        if phase == self.phase && active == self.active_operations {
            self.monitor.report(Activity::EventSeen);
        } else {
            self.set_phase(phase, active);
            self.monitor.report(Activity::PhaseChanged {
                phase,
                active_operations: active,
            });
        }

        if let RawEvent::Error { message } = &event {
            warn!(error = message.as_str(), "agent reported an error");
            self.notify_user(format!("Agent error: {message}"));
        }

        let translation = self.translators.apply(&event);
        for message in translation.messages {
            self.sink.send_normalized_message(message);
        }
        if let Some(approval) = translation.approval {
            info!(
                approval_id = approval.id.as_str(),
                call_id = approval.call_id.as_str(),
                "approval requested"
            );
            self.monitor.report(Activity::Paused);
            self.permissions.on_permission_requested(approval);
        }
    }

    async fn handle_stall(&mut self, verdict: StallEvent, cancel: &CancellationToken) {
        if verdict.turn() != self.turn_generation {
            debug!(
                verdict_turn = verdict.turn(),
                current_turn = self.turn_generation,
                "ignoring stall verdict from an earlier turn"
            );
            return;
        }
        match verdict {
            StallEvent::RestartRequested {
                phase,
                idle,
                restart_count,
                ..
            } => {
                if !self.turn_in_flight || self.restart_in_progress {
                    return;
                }
                warn!(
                    %phase,
                    idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
                    restart_count,
                    "restarting stalled agent"
                );
                self.restart_in_progress = true;
                self.ignore_events = true;
                if self.client.has_active_session() {
                    if let Some(pointer) = self.client.store_session_for_resume() {
                        self.recovery_pointer = Some(pointer);
                    }
                }
                cancel.cancel();
                self.client.disconnect().await;
                self.translators.reset_all();
                self.set_phase(Phase::Idle, 0);
            }
            StallEvent::RestartSuppressed {
                phase,
                restart_count,
                ..
            } => {
                warn!(
                    %phase,
                    restart_count,
                    "stall restart suppressed; waiting for the agent or the next message"
                );
                self.notify_user(
                    "The agent looks stuck, but the automatic restart limit has been reached. \
                     Abort the turn to stop waiting."
                        .into(),
                );
            }
        }
    }

    async fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::ResolvePermission { id, decision } => {
                let Some(approval) = self.translators.permission.resolve(&id) else {
                    debug!(approval_id = id.as_str(), "ignoring decision for unknown approval");
                    return;
                };
                info!(
                    approval_id = id.as_str(),
                    call_id = approval.call_id.as_str(),
                    ?decision,
                    "approval resolved"
                );
                if let Err(err) = self
                    .client
                    .respond_to_approval(approval.call_id, decision)
                    .await
                {
                    warn!(%err, "failed to deliver approval decision");
                }
                if !self.translators.permission.is_awaiting() {
                    self.monitor.report(Activity::Resumed);
                }
            }
        }
    }

    // ── Outbound state ───────────────────────────────────────────────────────

    fn record_agent_session(&mut self, agent_session_id: &str) {
        if self.session.record_agent_session(agent_session_id) {
            info!(agent_session_id, "agent session id discovered");
            self.sink.on_agent_session_id_discovered(agent_session_id);
        }
    }

    fn set_phase(&mut self, phase: Phase, active_operations: u32) {
        self.active_operations = active_operations;
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "phase changed");
            self.phase = phase;
            self.sink.on_phase_changed(phase);
        }
    }

    fn set_thinking(&mut self, thinking: bool) {
        if self.thinking != thinking {
            self.thinking = thinking;
            self.sink.on_thinking_changed(thinking);
        }
    }

    fn notify_user(&self, text: String) {
        self.sink.send_session_event(SessionEvent::Message { text });
    }
}

/// Phase and outstanding sub-operation count after `event`.
fn next_phase(event: &RawEvent, phase: Phase, active: u32) -> (Phase, u32) {
    match event {
        RawEvent::TaskStarted {}
        | RawEvent::AgentReasoning { .. }
        | RawEvent::AgentReasoningDelta { .. }
        | RawEvent::AgentReasoningSectionBreak {}
        | RawEvent::AgentMessage { .. }
        | RawEvent::AgentMessageDelta { .. } => {
            if active > 0 {
                (phase, active)
            } else {
                (Phase::Thinking, 0)
            }
        }
        RawEvent::ExecCommandBegin { .. } | RawEvent::McpToolCallBegin { .. } => {
            (Phase::Tool, active.saturating_add(1))
        }
        RawEvent::PatchApplyBegin { .. } => (Phase::Patch, active.saturating_add(1)),
        RawEvent::ExecCommandEnd { .. }
        | RawEvent::McpToolCallEnd { .. }
        | RawEvent::PatchApplyEnd { .. } => (phase, active.saturating_sub(1)),
        RawEvent::TaskComplete { .. } => (Phase::Complete, 0),
        RawEvent::SessionConfigured { .. }
        | RawEvent::UserMessage { .. }
        | RawEvent::ExecApprovalRequest { .. }
        | RawEvent::ApplyPatchApprovalRequest { .. }
        | RawEvent::TurnDiff { .. }
        | RawEvent::TokenCount { .. }
        | RawEvent::TurnAborted { .. }
        | RawEvent::Error { .. }
        | RawEvent::Unknown => (phase, active),
    }
}

/// Exponential backoff for spurious wait cancellations, capped.
fn wait_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    WAIT_BACKOFF_BASE
        .saturating_mul(1_u32 << exponent)
        .min(WAIT_BACKOFF_MAX)
}
