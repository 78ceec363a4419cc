//! Relay configuration: TOML file parsing overlaid with environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::models::phase::Phase;
use crate::{AppError, Result};

/// Agent process launch settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent binary to launch.
    #[serde(default = "default_agent_command")]
    pub command: String,
    /// Arguments passed to the agent binary.
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    /// Working directory for the agent; defaults to the current directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Root directory holding the agent's per-session transcript files.
    #[serde(default)]
    pub transcripts_dir: Option<PathBuf>,
}

fn default_agent_command() -> String {
    "codex".into()
}

fn default_agent_args() -> Vec<String> {
    vec!["app-server".into()]
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: default_agent_args(),
            cwd: None,
            transcripts_dir: None,
        }
    }
}

impl AgentConfig {
    /// Resolve the transcript root, falling back to `~/.codex/sessions`.
    #[must_use]
    pub fn transcripts_root(&self) -> PathBuf {
        if let Some(dir) = &self.transcripts_dir {
            return dir.clone();
        }
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_owned());
        PathBuf::from(home).join(".codex").join("sessions")
    }
}

/// Phase-aware stall detection thresholds (milliseconds) and restart policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StallConfig {
    /// Shortest timeout, shared by the `request` and `idle` phases.
    #[serde(default = "default_min_ms")]
    pub min_timeout_ms: u64,
    /// Timeout while the agent is thinking.
    #[serde(default = "default_thinking_ms")]
    pub thinking_timeout_ms: u64,
    /// Timeout in the tool phase with no outstanding calls.
    #[serde(default = "default_tool_ms")]
    pub tool_timeout_ms: u64,
    /// Timeout in the tool phase with at least one outstanding call.
    #[serde(default = "default_tool_active_ms")]
    pub tool_active_timeout_ms: u64,
    /// Timeout in the patch phase with no outstanding applies.
    #[serde(default = "default_patch_ms")]
    pub patch_timeout_ms: u64,
    /// Timeout in the patch phase with at least one outstanding apply.
    #[serde(default = "default_patch_active_ms")]
    pub patch_active_timeout_ms: u64,
    /// Timeout after the agent reported completion.
    #[serde(default = "default_complete_ms")]
    pub complete_timeout_ms: u64,
    /// Watchdog poll interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum automatic restarts inside one cooldown window.
    #[serde(default = "default_restart_limit")]
    pub restart_limit: u32,
    /// Rolling window after which the restart counter resets.
    #[serde(default = "default_restart_cooldown_ms")]
    pub restart_cooldown_ms: u64,
}

fn default_min_ms() -> u64 {
    120_000
}

fn default_thinking_ms() -> u64 {
    300_000
}

fn default_tool_ms() -> u64 {
    300_000
}

fn default_tool_active_ms() -> u64 {
    900_000
}

fn default_patch_ms() -> u64 {
    180_000
}

fn default_patch_active_ms() -> u64 {
    600_000
}

fn default_complete_ms() -> u64 {
    120_000
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_restart_limit() -> u32 {
    3
}

fn default_restart_cooldown_ms() -> u64 {
    600_000
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            min_timeout_ms: default_min_ms(),
            thinking_timeout_ms: default_thinking_ms(),
            tool_timeout_ms: default_tool_ms(),
            tool_active_timeout_ms: default_tool_active_ms(),
            patch_timeout_ms: default_patch_ms(),
            patch_active_timeout_ms: default_patch_active_ms(),
            complete_timeout_ms: default_complete_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            restart_limit: default_restart_limit(),
            restart_cooldown_ms: default_restart_cooldown_ms(),
        }
    }
}

impl StallConfig {
    /// Liveness timeout for `phase` given the number of outstanding
    /// sub-operations (tool calls or patch applies).
    ///
    /// An outstanding sub-operation can only lengthen the timeout: the
    /// effective value is the larger of the base and active thresholds.
    /// No phase ever resolves below the minimum.
    #[must_use]
    pub fn timeout_for(&self, phase: Phase, active_operations: u32) -> Duration {
        let ms = match phase {
            Phase::Idle | Phase::Request => self.min_timeout_ms,
            Phase::Thinking => self.thinking_timeout_ms,
            Phase::Tool if active_operations > 0 => {
                self.tool_timeout_ms.max(self.tool_active_timeout_ms)
            }
            Phase::Tool => self.tool_timeout_ms,
            Phase::Patch if active_operations > 0 => {
                self.patch_timeout_ms.max(self.patch_active_timeout_ms)
            }
            Phase::Patch => self.patch_timeout_ms,
            Phase::Complete => self.complete_timeout_ms,
        };
        Duration::from_millis(ms.max(self.min_timeout_ms))
    }

    /// Watchdog poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Rolling restart window.
    #[must_use]
    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_millis(self.restart_cooldown_ms)
    }
}

/// Bounds for the context synthesised from a prior transcript.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ResumeConfig {
    /// Maximum number of context items kept (newest first).
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Maximum total characters across kept items.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Cap for a single user or assistant message.
    #[serde(default = "default_max_item_chars")]
    pub max_item_chars: usize,
    /// Cap for a reasoning block.
    #[serde(default = "default_max_reasoning_chars")]
    pub max_reasoning_chars: usize,
    /// Cap for a tool invocation's rendered input.
    #[serde(default = "default_max_tool_input_chars")]
    pub max_tool_input_chars: usize,
    /// Cap for a tool result.
    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,
}

fn default_max_items() -> usize {
    40
}

fn default_max_chars() -> usize {
    16_000
}

fn default_max_item_chars() -> usize {
    2_000
}

fn default_max_reasoning_chars() -> usize {
    1_000
}

fn default_max_tool_input_chars() -> usize {
    500
}

fn default_max_tool_result_chars() -> usize {
    1_000
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            max_chars: default_max_chars(),
            max_item_chars: default_max_item_chars(),
            max_reasoning_chars: default_max_reasoning_chars(),
            max_tool_input_chars: default_max_tool_input_chars(),
            max_tool_result_chars: default_max_tool_result_chars(),
        }
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// Agent process settings.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Stall detection thresholds and restart policy.
    #[serde(default)]
    pub stall: StallConfig,
    /// Resume context bounds.
    #[serde(default)]
    pub resume: ResumeConfig,
    /// Hard timeout for the agent handshake (milliseconds).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            stall: StallConfig::default(),
            resume: ResumeConfig::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if an override produces an invalid value.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overlay).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    /// Overlay values from an arbitrary key lookup.
    ///
    /// Keys that are absent are skipped; keys whose value does not parse are
    /// logged and skipped.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let stall = &mut self.stall;
        let targets: [(&str, &mut u64); 10] = [
            ("STALL_TIMEOUT_MIN_MS", &mut stall.min_timeout_ms),
            ("STALL_TIMEOUT_THINKING_MS", &mut stall.thinking_timeout_ms),
            ("STALL_TIMEOUT_TOOL_MS", &mut stall.tool_timeout_ms),
            ("STALL_TIMEOUT_TOOL_ACTIVE_MS", &mut stall.tool_active_timeout_ms),
            ("STALL_TIMEOUT_PATCH_MS", &mut stall.patch_timeout_ms),
            ("STALL_TIMEOUT_PATCH_ACTIVE_MS", &mut stall.patch_active_timeout_ms),
            ("STALL_TIMEOUT_COMPLETE_MS", &mut stall.complete_timeout_ms),
            ("STALL_POLL_INTERVAL_MS", &mut stall.poll_interval_ms),
            ("STALL_RESTART_COOLDOWN_MS", &mut stall.restart_cooldown_ms),
            ("CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms),
        ];
        for (key, slot) in targets {
            if let Some(value) = parse_override::<u64>(&lookup, key) {
                *slot = value;
            }
        }
        if let Some(limit) = parse_override::<u32>(&lookup, "STALL_RESTART_LIMIT") {
            stall.restart_limit = limit;
        }
    }

    /// Hard timeout for the agent handshake.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.stall.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "stall poll interval must be greater than zero".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(AppError::Config(
                "connect timeout must be greater than zero".into(),
            ));
        }
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent command must not be empty".into()));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = raw.as_str(), "ignoring unparseable config override");
            None
        }
    }
}
