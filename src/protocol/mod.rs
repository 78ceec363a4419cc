//! Agent protocol plumbing.
//!
//! The relay talks to the agent over newline-delimited JSON-RPC on the
//! agent's stdio. The orchestrator only sees the [`client::AgentClient`]
//! trait; the stdio transport is one implementation of it.
//!
//! Submodules:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing
//!   with a per-line size cap.
//! - `events`: the closed set of raw agent events and inbound line parsing.
//! - `client`: the [`client::AgentClient`] trait and turn request types.
//! - `spawner`: process spawning with environment isolation.
//! - `stdio`: [`stdio::StdioAgentClient`], the stdio JSON-RPC transport.

pub mod client;
pub mod codec;
pub mod events;
pub mod spawner;
pub mod stdio;
