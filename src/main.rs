#![forbid(unsafe_code)]

//! `agent-relay`: drive a coding agent from the terminal.
//!
//! Lines read from stdin become queued messages (or control commands);
//! session output is printed to stdout. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::models::message::{EnhancedMode, PendingMessage};
use agent_relay::models::normalized::{NormalizedMessage, SessionEvent};
use agent_relay::models::permission::{ApprovalDecision, ApprovalKind, PendingApproval};
use agent_relay::models::session::{ExitReason, Session};
use agent_relay::orchestrator::control::OrchestratorHandle;
use agent_relay::orchestrator::queue::MessageQueue;
use agent_relay::orchestrator::session_loop::{Orchestrator, OrchestratorDeps};
use agent_relay::orchestrator::sink::{ChannelSink, SinkEvent};
use agent_relay::orchestrator::EVENT_CHANNEL_CAPACITY;
use agent_relay::protocol::spawner::SpawnConfig;
use agent_relay::protocol::stdio::StdioAgentClient;
use agent_relay::transcript::FsTranscriptStore;
use agent_relay::{AppError, RelayConfig, Result};

/// How long background tasks get to finish once the session has stopped.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Remote agent session orchestrator", version, long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Working directory for the agent.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Pre-assigned local session id; its transcript seeds the first turn.
    #[arg(long)]
    session_id: Option<String>,

    /// Model override passed to the agent.
    #[arg(long)]
    model: Option<String>,

    /// Initial permission mode.
    #[arg(long, default_value = "default")]
    permission_mode: String,

    /// Agent command and arguments (overrides the configured command).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    agent: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-relay bootstrap");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(args));
    // A pending stdin read sits on the blocking pool and cannot be cancelled.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    let reason = result?;

    match reason {
        ExitReason::Exit => info!("session ended"),
        ExitReason::Switch => info!("control returned to the local terminal"),
    }
    Ok(())
}

async fn run(args: Cli) -> Result<ExitReason> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => RelayConfig::load_from_path(path)?,
        None => RelayConfig::from_env()?,
    };
    if let Some((command, rest)) = args.agent.split_first() {
        config.agent.command.clone_from(command);
        config.agent.args = rest.to_vec();
    }

    let cwd = match args.cwd.clone().or_else(|| config.agent.cwd.clone()) {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let cwd = cwd
        .canonicalize()
        .map_err(|err| AppError::Config(format!("invalid working directory: {err}")))?;

    let session = match args.session_id.clone() {
        Some(id) => Session::with_id(id, cwd.clone()),
        None => Session::new(cwd.clone()),
    };
    info!(session_id = session.id.as_str(), "configuration loaded");

    // ── Wire collaborators ──────────────────────────────
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let client = Arc::new(StdioAgentClient::new(
        SpawnConfig {
            command: config.agent.command.clone(),
            args: config.agent.args.clone(),
            cwd,
            relay_session_id: session.id.clone(),
        },
        event_tx,
    ));
    let queue = Arc::new(MessageQueue::new());
    let (sink, sink_rx) = ChannelSink::new();
    let sink = Arc::new(sink);
    let transcripts = Arc::new(FsTranscriptStore::new(config.agent.transcripts_root()));

    let deps = OrchestratorDeps {
        client,
        queue: Arc::clone(&queue) as _,
        sink: Arc::clone(&sink) as _,
        permissions: sink,
        transcripts,
    };
    let (orchestrator, handle) = Orchestrator::new(config, session, deps, event_rx);

    let mode = EnhancedMode {
        permission_mode: args.permission_mode.clone(),
        model: args.model.clone(),
    };

    let printer = tokio::spawn(print_session_output(sink_rx));
    let input = tokio::spawn(read_input(Arc::clone(&queue), handle.clone(), mode));
    let signal_handle = handle.clone();
    let signals = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_handle.shutdown();
    });

    let result = orchestrator.launch().await;

    input.abort();
    signals.abort();
    let _ = printer.await;
    if let Err(err) = &result {
        error!(%err, "orchestrator failed");
    }
    result
}

// ── Terminal input ──────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum InputLine {
    Message(String),
    Abort,
    Switch,
    Mode(String),
    Decision(String, ApprovalDecision),
    Blank,
    Invalid(String),
}

fn parse_input(line: &str) -> InputLine {
    let line = line.trim();
    if line.is_empty() {
        return InputLine::Blank;
    }
    let Some(command) = line.strip_prefix('/') else {
        return InputLine::Message(line.to_owned());
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg.is_empty()) {
        ("abort", _) => InputLine::Abort,
        ("switch", _) => InputLine::Switch,
        ("mode", false) => InputLine::Mode(arg.to_owned()),
        ("approve", false) => InputLine::Decision(arg.to_owned(), ApprovalDecision::Approved),
        ("deny", false) => InputLine::Decision(arg.to_owned(), ApprovalDecision::Denied),
        ("mode" | "approve" | "deny", true) => {
            InputLine::Invalid(format!("/{name} needs an argument"))
        }
        _ => InputLine::Message(line.to_owned()),
    }
}

async fn read_input(queue: Arc<MessageQueue>, handle: OrchestratorHandle, mut mode: EnhancedMode) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed");
                break;
            }
            Err(err) => {
                warn!(%err, "failed to read stdin");
                break;
            }
        };
        match parse_input(&line) {
            InputLine::Message(text) => queue.push(PendingMessage::new(text, mode.clone())),
            InputLine::Abort => handle.abort(),
            InputLine::Switch => handle.switch_to_local(),
            InputLine::Mode(permission_mode) => {
                info!(permission_mode = permission_mode.as_str(), "permission mode changed");
                mode.permission_mode = permission_mode;
            }
            InputLine::Decision(id, decision) => handle.resolve_permission(id, decision),
            InputLine::Blank => {}
            InputLine::Invalid(reason) => println!("[relay] {reason}"),
        }
    }
    queue.close();
}

// ── Session output ──────────────────────────────────────────────────────────

async fn print_session_output(mut rx: mpsc::UnboundedReceiver<SinkEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SinkEvent::Message(message) => print_message(&message),
            SinkEvent::Session(SessionEvent::Ready) => println!("[ready]"),
            SinkEvent::Session(SessionEvent::Message { text }) => println!("[relay] {text}"),
            SinkEvent::Permission(approval) => print_approval(&approval),
            SinkEvent::AgentSessionId(id) => debug!(agent_session_id = id.as_str(), "agent session"),
            SinkEvent::Thinking(_) | SinkEvent::Phase(_) => {}
        }
    }
}

fn print_message(message: &NormalizedMessage) {
    match message {
        NormalizedMessage::User { .. } => {}
        NormalizedMessage::Assistant { text } => println!("{text}"),
        NormalizedMessage::Reasoning { title, text } => match title {
            Some(title) => println!("[thinking] {title}: {text}"),
            None => println!("[thinking] {text}"),
        },
        NormalizedMessage::ToolCall { name, input, .. } => println!("[tool] {name} {input}"),
        NormalizedMessage::ToolResult {
            output, is_error, ..
        } => {
            let label = if *is_error { "error" } else { "result" };
            let first = output.lines().next().unwrap_or_default();
            println!("[{label}] {first}");
        }
        NormalizedMessage::Diff { summary, .. } => println!("[diff]\n{summary}"),
    }
}

fn print_approval(approval: &PendingApproval) {
    let what = match &approval.kind {
        ApprovalKind::Exec { command, .. } => format!("run `{}`", command.join(" ")),
        ApprovalKind::Patch { files } => format!("edit {}", files.join(", ")),
    };
    let reason = approval
        .reason
        .as_deref()
        .map(|r| format!(" ({r})"))
        .unwrap_or_default();
    println!(
        "[approval {id}] agent wants to {what}{reason}; reply /approve {id} or /deny {id}",
        id = approval.id
    );
}

// ── Process plumbing ────────────────────────────────────────────────────────

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
