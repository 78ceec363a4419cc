//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Stalls and an exhausted restart budget are not errors; they surface as
/// [`StallEvent`](crate::orchestrator::stall_monitor::StallEvent)s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Malformed wire data or agent transport failure.
    Protocol(String),
    /// The agent did not complete its handshake within the connect timeout.
    ConnectTimeout(String),
    /// The caller cancelled an in-flight turn.
    Aborted(String),
    /// The agent process could not be launched.
    Spawn(String),
    /// Requested entity does not exist.
    NotFound(String),
}

impl AppError {
    /// Whether this error is the caller-initiated abort class.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::ConnectTimeout(msg) => write!(f, "connect timeout: {msg}"),
            Self::Aborted(msg) => write!(f, "aborted: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
