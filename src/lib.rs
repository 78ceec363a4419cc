#![forbid(unsafe_code)]

//! Remote agent session orchestrator.
//!
//! Drives a coding-agent subprocess over JSON-RPC, turning queued user
//! messages into agent turns, watching for stalls, and recovering sessions
//! with context reconstructed from the agent's transcripts.

pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod protocol;
pub mod resume;
pub mod transcript;
pub mod translate;

pub use config::RelayConfig;
pub use errors::{AppError, Result};
