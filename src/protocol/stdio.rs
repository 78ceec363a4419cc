//! [`AgentClient`] over a child process speaking NDJSON JSON-RPC on stdio.
//!
//! One connection owns three pieces:
//!
//! - the child process (spawned with `kill_on_drop`),
//! - a writer task draining an `mpsc` queue of outbound messages into stdin,
//! - a reader task decoding stdout, forwarding events and resolving pending
//!   requests by id.
//!
//! Events are forwarded *before* any response that follows them on the wire
//! is resolved, so a turn's events are always in the channel by the time its
//! `turn/start` reply wakes the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::permission::ApprovalDecision;
use crate::protocol::client::{
    AgentClient, ClientFuture, ResumePointer, TurnOutcome, TurnRequest,
};
use crate::protocol::codec::AgentCodec;
use crate::protocol::events::{parse_inbound_line, Inbound, RawEvent, RpcError};
use crate::protocol::spawner::{spawn_agent, SpawnConfig};
use crate::{AppError, Result};

/// Protocol version announced in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "1";

/// How long a disconnecting agent may take to exit before it is killed.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Outbound queue depth.
const WRITER_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, RpcError>>>>>;

struct Connection {
    child: Child,
    writer_tx: mpsc::Sender<Value>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Agent client speaking JSON-RPC over a spawned process's stdio.
pub struct StdioAgentClient {
    spawn: SpawnConfig,
    event_tx: mpsc::Sender<RawEvent>,
    connection: tokio::sync::Mutex<Option<Connection>>,
    writer_tx: Mutex<Option<mpsc::Sender<Value>>>,
    connected: Arc<AtomicBool>,
    session_id: Arc<Mutex<Option<String>>>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl StdioAgentClient {
    /// Create a disconnected client. Events are delivered on `event_tx`.
    #[must_use]
    pub fn new(spawn: SpawnConfig, event_tx: mpsc::Sender<RawEvent>) -> Self {
        Self {
            spawn,
            event_tx,
            connection: tokio::sync::Mutex::new(None),
            writer_tx: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            session_id: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn writer(&self) -> Result<mpsc::Sender<Value>> {
        lock(&self.writer_tx)
            .clone()
            .ok_or_else(|| AppError::Protocol("agent is not connected".into()))
    }

    fn set_session_id(&self, id: Option<String>) {
        *lock(&self.session_id) = id;
    }

    /// Spawn the agent and complete the `initialize` handshake.
    async fn open(&self) -> Result<Connection> {
        let process = spawn_agent(&self.spawn)?;
        let mut child = process.child;
        let mut stdin = FramedWrite::new(process.stdin, AgentCodec::new());
        let mut framed = FramedRead::new(process.stdout, AgentCodec::new());

        let init_id = self.allocate_id();
        let request = json!({
            "jsonrpc": "2.0",
            "id": init_id,
            "method": "initialize",
            "params": {
                "protocol_version": PROTOCOL_VERSION,
                "client_info": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            },
        });
        write_line(&mut stdin, &request).await?;

        loop {
            let Some(item) = framed.next().await else {
                let _ = child.start_kill();
                return Err(AppError::Protocol(
                    "agent exited before completing the handshake".into(),
                ));
            };
            let line = match item {
                Ok(line) => line,
                Err(err) => {
                    warn!(%err, "agent handshake: skipping unreadable line");
                    continue;
                }
            };
            match parse_inbound_line(&line) {
                Ok(Some(Inbound::Response { id, outcome })) if id == init_id => {
                    outcome.map_err(|e| {
                        AppError::Protocol(format!(
                            "initialize rejected: {} (code {})",
                            e.message, e.code
                        ))
                    })?;
                    break;
                }
                Ok(Some(other)) => {
                    debug!(?other, "agent handshake: ignoring message before initialize reply");
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "agent handshake: skipping malformed line"),
            }
        }

        let cancel = CancellationToken::new();
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);

        self.connected.store(true, Ordering::SeqCst);

        let reader = tokio::spawn(run_reader(
            framed,
            self.event_tx.clone(),
            Arc::clone(&self.pending),
            Arc::clone(&self.session_id),
            Arc::clone(&self.connected),
            cancel.clone(),
        ));
        let writer_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            if let Err(err) = run_writer(stdin, writer_rx, writer_cancel).await {
                warn!(%err, "agent writer stopped");
            }
        });

        Ok(Connection {
            child,
            writer_tx,
            cancel,
            reader,
            writer,
        })
    }

    /// Issue a request and wait for its reply, or for `cancel`.
    async fn request(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let writer = self.writer()?;
        let id = self.allocate_id();
        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(id, reply_tx);

        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if writer.send(message).await.is_err() {
            lock(&self.pending).remove(&id);
            return Err(AppError::Protocol(format!(
                "agent stream closed before {method} was sent"
            )));
        }

        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                lock(&self.pending).remove(&id);
                let session_id = lock(&self.session_id).clone();
                self.notify("turn/interrupt", json!({ "session_id": session_id })).await;
                Err(AppError::Aborted(format!("{method} cancelled")))
            }

            reply = reply_rx => match reply {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(AppError::Protocol(format!(
                    "{method} failed: {} (code {})",
                    err.message, err.code
                ))),
                Err(_) => Err(AppError::Protocol(format!(
                    "agent connection closed during {method}"
                ))),
            },
        }
    }

    /// Send a notification; delivery failures are logged, not returned.
    async fn notify(&self, method: &str, params: Value) {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        match self.writer() {
            Ok(writer) => {
                if writer.send(message).await.is_err() {
                    debug!(method, "agent stream closed; notification dropped");
                }
            }
            Err(_) => debug!(method, "not connected; notification dropped"),
        }
    }

    fn record_outcome(&self, value: Value) -> TurnOutcome {
        let outcome = match serde_json::from_value::<TurnOutcome>(value) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%err, "malformed turn result; agent session id unknown");
                TurnOutcome::default()
            }
        };
        if let Some(id) = &outcome.session_id {
            self.set_session_id(Some(id.clone()));
        }
        outcome
    }
}

impl AgentClient for StdioAgentClient {
    fn connect(&self, timeout: Duration) -> ClientFuture<'_, Result<()>> {
        Box::pin(async move {
            self.disconnect().await;
            self.set_session_id(None);

            let connection = match tokio::time::timeout(timeout, self.open()).await {
                Ok(result) => result?,
                Err(_) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(AppError::ConnectTimeout(format!(
                        "agent handshake did not complete within {}ms",
                        timeout.as_millis()
                    )));
                }
            };

            *lock(&self.writer_tx) = Some(connection.writer_tx.clone());
            *self.connection.lock().await = Some(connection);
            info!("agent connected");
            Ok(())
        })
    }

    fn disconnect(&self) -> ClientFuture<'_, ()> {
        Box::pin(async move {
            let taken = self.connection.lock().await.take();
            *lock(&self.writer_tx) = None;
            self.connected.store(false, Ordering::SeqCst);

            let Some(mut connection) = taken else {
                return;
            };

            connection.cancel.cancel();
            drop(connection.writer_tx);
            let _ = connection.writer.await;
            let _ = connection.reader.await;

            match tokio::time::timeout(DISCONNECT_GRACE, connection.child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "agent exited"),
                Ok(Err(err)) => warn!(%err, "failed to reap agent process"),
                Err(_) => {
                    if let Err(err) = connection.child.kill().await {
                        warn!(%err, "failed to kill agent process");
                    }
                }
            }

            lock(&self.pending).clear();
            info!("agent disconnected");
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn start_turn(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> ClientFuture<'_, Result<TurnOutcome>> {
        Box::pin(async move {
            let params = json!({
                "prompt": request.effective_prompt(),
                "cwd": request.cwd,
                "mode": request.mode,
            });
            let value = self.request("turn/start", params, &cancel).await?;
            Ok(self.record_outcome(value))
        })
    }

    fn continue_turn(
        &self,
        prompt: String,
        cancel: CancellationToken,
    ) -> ClientFuture<'_, Result<TurnOutcome>> {
        Box::pin(async move {
            let session_id = self
                .session_id()
                .ok_or_else(|| AppError::NotFound("no active agent session".into()))?;
            let params = json!({
                "session_id": session_id,
                "prompt": prompt,
            });
            let value = self.request("turn/continue", params, &cancel).await?;
            Ok(self.record_outcome(value))
        })
    }

    fn respond_to_approval(
        &self,
        call_id: String,
        decision: ApprovalDecision,
    ) -> ClientFuture<'_, Result<()>> {
        Box::pin(async move {
            let writer = self.writer()?;
            let message = json!({
                "jsonrpc": "2.0",
                "method": "approval/respond",
                "params": { "call_id": call_id, "decision": decision },
            });
            writer
                .send(message)
                .await
                .map_err(|_| AppError::Protocol("agent stream closed".into()))
        })
    }

    fn has_active_session(&self) -> bool {
        lock(&self.session_id).is_some()
    }

    fn session_id(&self) -> Option<String> {
        lock(&self.session_id).clone()
    }

    fn store_session_for_resume(&self) -> Option<ResumePointer> {
        self.session_id().map(ResumePointer::SessionId)
    }

    fn clear_session(&self) {
        self.set_session_id(None);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type AgentSink = FramedWrite<ChildStdin, AgentCodec>;

async fn write_line(stdin: &mut AgentSink, value: &Value) -> Result<()> {
    let line = serde_json::to_string(value)
        .map_err(|e| AppError::Protocol(format!("failed to serialise outbound message: {e}")))?;
    stdin.send(line).await
}

/// Drain `msg_rx` into the agent's stdin until cancelled or the queue closes.
async fn run_writer(
    mut stdin: AgentSink,
    mut msg_rx: mpsc::Receiver<Value>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("agent writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(value) = msg else {
                    debug!("agent writer: message channel closed, stopping");
                    break;
                };
                write_line(&mut stdin, &value).await?;
            }
        }
    }
    Ok(())
}

/// Decode stdout, forward events and resolve pending requests.
///
/// On EOF or a fatal read error the connection is marked dead and every
/// pending request is failed by dropping its reply sender.
async fn run_reader<R>(
    mut framed: FramedRead<R, AgentCodec>,
    event_tx: mpsc::Sender<RawEvent>,
    pending: PendingMap,
    session_id: Arc<Mutex<Option<String>>>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let item = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("agent reader: cancellation received, stopping");
                return;
            }

            item = framed.next() => item,
        };

        let line = match item {
            None => {
                info!("agent reader: stream closed");
                break;
            }
            Some(Err(AppError::Io(err))) => {
                warn!(%err, "agent reader: read failed");
                break;
            }
            Some(Err(err)) => {
                warn!(%err, "agent reader: skipping unreadable line");
                continue;
            }
            Some(Ok(line)) => line,
        };

        match parse_inbound_line(&line) {
            Ok(Some(Inbound::Event(event))) => {
                if let RawEvent::SessionConfigured { session_id: id, .. } = &event {
                    *lock(&session_id) = Some(id.clone());
                }
                let sent = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    sent = event_tx.send(event) => sent,
                };
                if sent.is_err() {
                    debug!("agent reader: event receiver dropped, stopping");
                    break;
                }
            }
            Ok(Some(Inbound::Response { id, outcome })) => {
                let waiter = lock(&pending).remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => debug!(id, "agent reader: response for unknown request"),
                }
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "agent reader: skipping malformed line"),
        }
    }

    connected.store(false, Ordering::SeqCst);
    lock(&pending).clear();
}
