//! Shared fixtures for orchestrator-level integration tests.
//!
//! [`MockAgentClient`] plays back scripted turns: it announces a session,
//! pushes the script's events into the loop's event channel, and then ends
//! the turn the way the script says. Every call is recorded for assertions.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use agent_relay::config::RelayConfig;
use agent_relay::models::message::{EnhancedMode, PendingMessage};
use agent_relay::models::permission::ApprovalDecision;
use agent_relay::models::session::{ExitReason, Session};
use agent_relay::orchestrator::control::OrchestratorHandle;
use agent_relay::orchestrator::queue::MessageQueue;
use agent_relay::orchestrator::session_loop::{Orchestrator, OrchestratorDeps};
use agent_relay::orchestrator::sink::{ChannelSink, SinkEvent};
use agent_relay::protocol::client::{
    AgentClient, ClientFuture, ResumePointer, TurnOutcome, TurnRequest,
};
use agent_relay::protocol::events::RawEvent;
use agent_relay::transcript::{StoreFuture, TranscriptStore};
use agent_relay::{AppError, Result};

/// Local session id used by every harness.
pub const LOCAL_SESSION_ID: &str = "local-1";

/// One recorded client call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Disconnect,
    StartTurn {
        prompt: String,
        resume_context: Option<String>,
        permission_mode: String,
    },
    ContinueTurn {
        prompt: String,
    },
    RespondToApproval {
        call_id: String,
        decision: ApprovalDecision,
    },
    ClearSession,
}

/// How a scripted turn ends after its events are delivered.
#[derive(Debug, Clone)]
pub enum TurnEnd {
    Complete,
    Fail(AppError),
    /// The agent process dies mid-turn: the connection drops and the turn
    /// fails with a transport error.
    Crash,
    /// Never finishes on its own; resolves as aborted once cancelled.
    Hang,
    /// Finishes after the next approval decision.
    AwaitApproval,
    /// Finishes after a delay with no further events; aborted if cancelled
    /// first.
    CompleteAfter(Duration),
}

/// Events for one turn plus its ending.
#[derive(Debug, Clone)]
pub struct TurnScript {
    pub events: Vec<RawEvent>,
    pub end: TurnEnd,
}

impl TurnScript {
    pub fn replying(text: &str) -> Self {
        Self {
            events: vec![
                RawEvent::TaskStarted {},
                RawEvent::AgentReasoningDelta {
                    delta: "considering".into(),
                },
                RawEvent::AgentMessage {
                    message: text.into(),
                },
                RawEvent::TaskComplete {
                    last_agent_message: Some(text.into()),
                },
            ],
            end: TurnEnd::Complete,
        }
    }

    pub fn hanging() -> Self {
        Self {
            events: vec![RawEvent::TaskStarted {}],
            end: TurnEnd::Hang,
        }
    }

    pub fn failing(err: AppError) -> Self {
        Self {
            events: vec![RawEvent::TaskStarted {}],
            end: TurnEnd::Fail(err),
        }
    }

    pub fn crashing() -> Self {
        Self {
            events: vec![RawEvent::TaskStarted {}],
            end: TurnEnd::Crash,
        }
    }
}

#[derive(Default)]
struct MockState {
    connected: bool,
    session_id: Option<String>,
    sessions_started: u32,
    calls: Vec<Call>,
    scripts: VecDeque<TurnScript>,
    connect_error: Option<AppError>,
}

/// Scripted [`AgentClient`].
pub struct MockAgentClient {
    events: mpsc::Sender<RawEvent>,
    state: Mutex<MockState>,
    approvals: Notify,
}

impl MockAgentClient {
    pub fn new(events: mpsc::Sender<RawEvent>) -> Self {
        Self {
            events,
            state: Mutex::new(MockState::default()),
            approvals: Notify::new(),
        }
    }

    /// Queue a script for the next turn. Unscripted turns reply "ok".
    pub fn script(&self, script: TurnScript) {
        self.lock().scripts.push_back(script);
    }

    /// Make every subsequent connect fail with `err`.
    pub fn fail_connect(&self, err: AppError) {
        self.lock().connect_error = Some(err);
    }

    /// The agent re-keys its live session without a new turn.
    pub fn replace_session(&self, session_id: &str) {
        self.lock().session_id = Some(session_id.to_owned());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn turn_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::StartTurn { .. } | Call::ContinueTurn { .. }))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_script(&self) -> TurnScript {
        self.lock()
            .scripts
            .pop_front()
            .unwrap_or_else(|| TurnScript::replying("ok"))
    }

    async fn emit(&self, event: RawEvent) {
        let _ = self.events.send(event).await;
    }

    async fn play(&self, script: TurnScript, cancel: CancellationToken) -> Result<()> {
        for event in script.events {
            self.emit(event).await;
        }
        match script.end {
            TurnEnd::Complete => Ok(()),
            TurnEnd::Fail(err) => Err(err),
            TurnEnd::Crash => {
                self.lock().connected = false;
                Err(AppError::Protocol(
                    "agent connection closed during turn/start".into(),
                ))
            }
            TurnEnd::Hang => {
                cancel.cancelled().await;
                Err(AppError::Aborted("turn cancelled".into()))
            }
            TurnEnd::AwaitApproval => tokio::select! {
                () = self.approvals.notified() => Ok(()),
                () = cancel.cancelled() => Err(AppError::Aborted("turn cancelled".into())),
            },
            TurnEnd::CompleteAfter(delay) => tokio::select! {
                () = tokio::time::sleep(delay) => Ok(()),
                () = cancel.cancelled() => Err(AppError::Aborted("turn cancelled".into())),
            },
        }
    }
}

impl AgentClient for MockAgentClient {
    fn connect(&self, _timeout: Duration) -> ClientFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(Call::Connect);
            if let Some(err) = state.connect_error.clone() {
                return Err(err);
            }
            state.connected = true;
            state.session_id = None;
            Ok(())
        })
    }

    fn disconnect(&self) -> ClientFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(Call::Disconnect);
            state.connected = false;
        })
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn start_turn(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> ClientFuture<'_, Result<TurnOutcome>> {
        Box::pin(async move {
            let session_id = {
                let mut state = self.lock();
                state.calls.push(Call::StartTurn {
                    prompt: request.prompt.clone(),
                    resume_context: request.resume_context.clone(),
                    permission_mode: request.mode.permission_mode.clone(),
                });
                state.sessions_started += 1;
                let id = format!("agent-{}", state.sessions_started);
                state.session_id = Some(id.clone());
                id
            };
            self.emit(RawEvent::SessionConfigured {
                session_id: session_id.clone(),
                model: None,
            })
            .await;
            let script = self.next_script();
            self.play(script, cancel).await?;
            Ok(TurnOutcome {
                session_id: Some(session_id),
                last_agent_message: None,
            })
        })
    }

    fn continue_turn(
        &self,
        prompt: String,
        cancel: CancellationToken,
    ) -> ClientFuture<'_, Result<TurnOutcome>> {
        Box::pin(async move {
            let session_id = {
                let mut state = self.lock();
                state.calls.push(Call::ContinueTurn { prompt });
                state.session_id.clone()
            };
            let Some(session_id) = session_id else {
                return Err(AppError::NotFound("no active agent session".into()));
            };
            let script = self.next_script();
            self.play(script, cancel).await?;
            Ok(TurnOutcome {
                session_id: Some(session_id),
                last_agent_message: None,
            })
        })
    }

    fn respond_to_approval(
        &self,
        call_id: String,
        decision: ApprovalDecision,
    ) -> ClientFuture<'_, Result<()>> {
        Box::pin(async move {
            self.lock()
                .calls
                .push(Call::RespondToApproval { call_id, decision });
            self.approvals.notify_one();
            Ok(())
        })
    }

    fn has_active_session(&self) -> bool {
        self.lock().session_id.is_some()
    }

    fn session_id(&self) -> Option<String> {
        self.lock().session_id.clone()
    }

    fn store_session_for_resume(&self) -> Option<ResumePointer> {
        self.session_id().map(ResumePointer::SessionId)
    }

    fn clear_session(&self) {
        let mut state = self.lock();
        state.calls.push(Call::ClearSession);
        state.session_id = None;
    }
}

/// In-memory transcripts keyed by session id.
#[derive(Default)]
pub struct MemoryTranscripts {
    files: Mutex<HashMap<String, String>>,
    lookup_delay: Mutex<Duration>,
}

impl MemoryTranscripts {
    /// Make every lookup take `delay`, like a slow directory walk.
    pub fn slow_lookups(&self, delay: Duration) {
        *self
            .lookup_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn insert(&self, session_id: &str, contents: String) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_owned(), contents);
    }
}

impl TranscriptStore for MemoryTranscripts {
    fn find_latest_file(&self, agent_session_id: &str) -> StoreFuture<'_, Option<PathBuf>> {
        let found = self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(agent_session_id)
            .then(|| PathBuf::from(format!("{agent_session_id}.jsonl")));
        let delay = *self
            .lookup_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            found
        })
    }

    fn read_file(&self, path: &Path) -> StoreFuture<'_, Option<String>> {
        let contents = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|id| {
                self.files
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(id)
                    .cloned()
            });
        Box::pin(async move { contents })
    }
}

/// Transcript with one user line and one assistant line.
pub fn transcript(user: &str, assistant: &str) -> String {
    [
        json!({ "type": "event_msg", "payload": { "type": "user_message", "message": user } }),
        json!({ "type": "event_msg", "payload": { "type": "agent_message", "message": assistant } }),
    ]
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("\n")
}

/// A running orchestrator plus everything a test needs to drive it.
pub struct Harness {
    pub client: Arc<MockAgentClient>,
    pub queue: Arc<MessageQueue>,
    pub transcripts: Arc<MemoryTranscripts>,
    pub handle: OrchestratorHandle,
    pub sink_rx: mpsc::UnboundedReceiver<SinkEvent>,
    pub events_tx: mpsc::Sender<RawEvent>,
    pub join: JoinHandle<Result<ExitReason>>,
}

/// Configuration with stall detection effectively disabled.
pub fn quiet_config() -> RelayConfig {
    RelayConfig::default()
}

/// Configuration whose stall timeouts fire within a few hundred ms.
pub fn fast_stall_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.stall.min_timeout_ms = 150;
    config.stall.thinking_timeout_ms = 150;
    config.stall.tool_timeout_ms = 150;
    config.stall.tool_active_timeout_ms = 150;
    config.stall.patch_timeout_ms = 150;
    config.stall.patch_active_timeout_ms = 150;
    config.stall.complete_timeout_ms = 150;
    config.stall.poll_interval_ms = 20;
    config
}

/// Build the collaborators, let `setup` script them, then launch.
pub fn launch(
    config: RelayConfig,
    setup: impl FnOnce(&MockAgentClient, &MemoryTranscripts),
) -> Harness {
    let (events_tx, events_rx) = mpsc::channel(64);
    let client = Arc::new(MockAgentClient::new(events_tx.clone()));
    let transcripts = Arc::new(MemoryTranscripts::default());
    setup(client.as_ref(), transcripts.as_ref());

    let queue = Arc::new(MessageQueue::new());
    let (sink, sink_rx) = ChannelSink::new();
    let sink = Arc::new(sink);
    let deps = OrchestratorDeps {
        client: Arc::clone(&client) as Arc<dyn AgentClient>,
        queue: Arc::clone(&queue) as _,
        sink: Arc::clone(&sink) as _,
        permissions: sink,
        transcripts: Arc::clone(&transcripts) as _,
    };
    let session = Session::with_id(LOCAL_SESSION_ID.into(), PathBuf::from("/work"));
    let (orchestrator, handle) = Orchestrator::new(config, session, deps, events_rx);
    let join = tokio::spawn(orchestrator.launch());

    Harness {
        client,
        queue,
        transcripts,
        handle,
        sink_rx,
        events_tx,
        join,
    }
}

impl Harness {
    pub fn send(&self, text: &str) {
        self.send_with_mode(text, "default");
    }

    /// Queue a message that is never batched with its neighbours.
    pub fn send_isolated(&self, text: &str) {
        self.queue
            .push(PendingMessage::new(text, EnhancedMode::new("default")).isolated());
    }

    pub fn send_with_mode(&self, text: &str, permission_mode: &str) {
        self.queue
            .push(PendingMessage::new(text, EnhancedMode::new(permission_mode)));
    }

    /// Next sink event, failing the test after five seconds.
    pub async fn next_event(&mut self) -> SinkEvent {
        tokio::time::timeout(Duration::from_secs(5), self.sink_rx.recv())
            .await
            .expect("sink event before timeout")
            .expect("sink open")
    }

    /// Collect sink events up to and including the first matching one.
    pub async fn collect_until(&mut self, stop: impl Fn(&SinkEvent) -> bool) -> Vec<SinkEvent> {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = stop(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    /// Sink events already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<SinkEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = self.sink_rx.try_recv() {
            seen.push(event);
        }
        seen
    }

    /// Collect sink events through the next `ready`.
    pub async fn until_ready(&mut self) -> Vec<SinkEvent> {
        self.collect_until(is_ready).await
    }

    /// Close input and wait for the loop to exit.
    pub async fn finish(&mut self) -> Result<ExitReason> {
        self.queue.close();
        self.join_loop().await
    }

    pub async fn join_loop(&mut self) -> Result<ExitReason> {
        tokio::time::timeout(Duration::from_secs(5), &mut self.join)
            .await
            .expect("orchestrator exits")
            .expect("orchestrator task joins")
    }
}

pub fn is_ready(event: &SinkEvent) -> bool {
    matches!(
        event,
        SinkEvent::Session(agent_relay::models::normalized::SessionEvent::Ready)
    )
}

pub fn notices(events: &[SinkEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SinkEvent::Session(agent_relay::models::normalized::SessionEvent::Message { text }) => {
                Some(text.clone())
            }
            _ => None,
        })
        .collect()
}
