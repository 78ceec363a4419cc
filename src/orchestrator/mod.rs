//! Session orchestration.
//!
//! Covers the orchestrator loop, the stall watchdog, the message queue, the
//! outbound sinks, and the external control handle.

pub mod control;
pub mod queue;
pub mod session_loop;
pub mod sink;
pub mod stall_monitor;

/// Depth of the raw event channel between an agent client and the loop.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
