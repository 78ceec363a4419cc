//! Pending user messages and the mode they were enqueued under.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Agent configuration active when a message was enqueued.
///
/// Two messages with different modes can never share one agent session;
/// a change forces a fresh session seeded with resume context.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EnhancedMode {
    /// Approval policy name (e.g. `default`, `read-only`, `yolo`).
    pub permission_mode: String,
    /// Model override, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl EnhancedMode {
    /// Construct a mode with the given permission policy and no model override.
    #[must_use]
    pub fn new(permission_mode: impl Into<String>) -> Self {
        Self {
            permission_mode: permission_mode.into(),
            model: None,
        }
    }

    /// SHA-256 hex digest of the mode's canonical JSON form.
    #[must_use]
    pub fn hash(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }
}

/// One user-submitted instruction awaiting delivery to the agent.
///
/// Produced by the session queue, consumed exactly once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PendingMessage {
    /// Instruction text.
    pub message: String,
    /// Mode active when the message was enqueued.
    pub mode: EnhancedMode,
    /// Hash of `mode`, precomputed at enqueue time.
    pub mode_hash: String,
    /// Deliver this message alone, never batched with neighbours.
    pub isolate: bool,
}

impl PendingMessage {
    /// Construct a message, computing the mode hash.
    #[must_use]
    pub fn new(message: impl Into<String>, mode: EnhancedMode) -> Self {
        let mode_hash = mode.hash();
        Self {
            message: message.into(),
            mode,
            mode_hash,
            isolate: false,
        }
    }

    /// Mark the message as isolated.
    #[must_use]
    pub fn isolated(mut self) -> Self {
        self.isolate = true;
        self
    }
}
