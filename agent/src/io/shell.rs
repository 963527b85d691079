//! Shell executor for commands requested by the model.
//!
//! The [`ShellRunner`] trait decouples the agent loop from real subprocesses.
//! Tests use scripted shells that return canned results.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::types::{ExecutionResult, FAILED_EXIT_CODE};
use crate::io::process::run_command_with_timeout;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Runs one shell command to completion.
///
/// Implementations never fail: timeouts and launch errors are reported as
/// [`ExecutionResult`] text so the model can react to them.
pub trait ShellRunner {
    fn execute(&self, command: &str, workdir: &Path) -> ExecutionResult;
}

/// Runs commands through `sh -c` in a bounded subprocess.
#[derive(Debug, Clone)]
pub struct SubprocessShell {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Default for SubprocessShell {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

impl SubprocessShell {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            timeout,
            output_limit_bytes,
        }
    }
}

impl ShellRunner for SubprocessShell {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs(), workdir = %workdir.display()))]
    fn execute(&self, command: &str, workdir: &Path) -> ExecutionResult {
        info!("running shell command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(workdir);

        let output = match run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "shell command failed to run");
                return ExecutionResult::failed(root_cause(&err));
            }
        };

        if output.timed_out {
            return ExecutionResult::timed_out(self.timeout.as_secs());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&output.stdout_truncated_notice("shell"));
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        combined.push_str(&output.stderr_truncated_notice("shell"));

        let exit_code = output.status.code().unwrap_or(FAILED_EXIT_CODE);
        ExecutionResult::completed(combined.trim_end(), exit_code)
    }
}

fn root_cause(err: &anyhow::Error) -> String {
    err.root_cause().to_string()
}
