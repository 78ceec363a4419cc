//! Domain model module declarations.

pub mod message;
pub mod normalized;
pub mod permission;
pub mod phase;
pub mod session;
