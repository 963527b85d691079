//! Deterministic, pure logic shared by the agent.
//!
//! Core modules are free of I/O side effects. They turn model replies into
//! command candidates and keep the conversation record, so every path is
//! testable without a network or a shell.

pub mod channels;
pub mod conversation;
pub mod heuristics;
pub mod sniffer;
pub mod types;
