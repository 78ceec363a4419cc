//! Agent process spawner.
//!
//! Spawns the agent with:
//! - `kill_on_drop(true)` so an abandoned handshake never leaks a process.
//! - `env_clear()` plus an allowlist, so only the variables the agent needs
//!   are inherited.
//! - piped stdio for the NDJSON protocol; stderr is inherited so agent
//!   diagnostics reach the operator's terminal.

use std::path::PathBuf;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::info;

use crate::{AppError, Result};

/// Environment variables inherited by the spawned agent process.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "RUST_LOG",
    "CODEX_HOME",
    "OPENAI_API_KEY",
    "OPENAI_BASE_URL",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// How to launch the agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Agent binary.
    pub command: String,
    /// Arguments passed to the binary.
    pub args: Vec<String>,
    /// Working directory of the child process.
    pub cwd: PathBuf,
    /// Local relay session id exported as `RELAY_SESSION_ID`.
    pub relay_session_id: String,
}

/// Handles to a freshly spawned agent process.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child handle; dropping it kills the process.
    pub child: Child,
    /// Agent's stdin.
    pub stdin: ChildStdin,
    /// Agent's stdout.
    pub stdout: ChildStdout,
}

/// Spawn the agent process described by `config`.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn agent: …")`: OS spawn failure.
/// - `AppError::Spawn("failed to capture agent stdin/stdout")`: pipes missing.
pub fn spawn_agent(config: &SpawnConfig) -> Result<AgentProcess> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.env("RELAY_SESSION_ID", &config.relay_session_id);

    cmd.current_dir(&config.cwd)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn agent: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;

    info!(
        command = config.command.as_str(),
        pid = child.id(),
        cwd = %config.cwd.display(),
        "agent process spawned"
    );

    Ok(AgentProcess {
        child,
        stdin,
        stdout,
    })
}
