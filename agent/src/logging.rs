//! Development-time tracing for debugging the agent.
//!
//! Diagnostics go to stderr and are controlled by `RUST_LOG`. The progress
//! lines printed by the binary (iterations, commands, answers) go to stdout
//! and are unaffected by the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Defaults to `warn` when `RUST_LOG` is unset or unparsable.
///
/// # Example
/// ```bash
/// RUST_LOG=bash_agent=debug cargo run -- "how many files are here?"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
