//! Autonomous bash agent driven by a chat-completions model.
//!
//! The agent hands a task to the model, pulls a shell command out of whatever
//! shape the reply takes, runs it, feeds the result back, and repeats until the
//! model answers or the iteration bound is hit. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (turn records, channel decoding,
//!   command sniffing). No I/O.
//! - **[`io`]**: Side-effecting operations (config, HTTP, subprocesses).
//!   Behind traits so tests can script them.
//!
//! [`agent_loop`] coordinates the two to run one task.

pub mod agent_loop;
pub mod core;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
