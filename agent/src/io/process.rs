//! Helpers for running child processes with timeouts and bounded output.

use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Extra time readers get to hit EOF once the deadline has passed or the group was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    /// The shell exited in time but left background processes holding the
    /// output pipes at the deadline; they were killed.
    pub killed_background: bool,
}

impl CommandOutput {
    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        truncated_notice(label, "stdout", self.stdout_truncated)
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        truncated_notice(label, "stderr", self.stderr_truncated)
    }
}

fn truncated_notice(label: &str, stream: &str, bytes: usize) -> String {
    if bytes > 0 {
        format!("\n[{label} {stream} truncated {bytes} bytes]\n")
    } else {
        String::new()
    }
}

/// Bytes kept from one stream, shared with its reader thread so partial
/// output survives a reader that never reaches EOF.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

type SharedCapture = Arc<Mutex<Captured>>;

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// The child gets a null stdin and its own process group. One deadline,
/// measured from spawn, covers both waiting for the child and draining its
/// pipes: if the child overruns, the whole group is killed and the output is
/// marked timed out; if the child exits in time but background members of the
/// group still hold the pipes at the deadline, the group is killed and the
/// output collected so far is returned. `output_limit_bytes` bounds the amount
/// of stdout/stderr kept in memory per stream.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    let deadline = Instant::now() + timeout;
    let pgid = Pid::from_raw(i32::try_from(child.id()).context("child pid out of range")?);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (done_tx, done_rx) = mpsc::channel();
    let stdout_capture = spawn_reader("stdout", stdout, output_limit_bytes, done_tx.clone());
    let stderr_capture = spawn_reader("stderr", stderr, output_limit_bytes, done_tx);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing process group"
            );
            timed_out = true;
            kill_process_group(pgid, &mut child)?;
            child.wait().context("wait command after kill")?
        }
    };

    let mut pending = 2usize;
    let drain_until = deadline.max(Instant::now() + DRAIN_GRACE);
    let mut killed_background = false;
    if !wait_for_readers(&done_rx, &mut pending, drain_until)? {
        warn!("background processes still hold the output pipes, killing process group");
        killed_background = !timed_out;
        signal_group(pgid);
        if !wait_for_readers(&done_rx, &mut pending, Instant::now() + DRAIN_GRACE)? {
            warn!(pending, "output pipes still open after kill, keeping partial output");
        }
    }

    let (stdout, stdout_truncated) = take_capture(&stdout_capture);
    let (stderr, stderr_truncated) = take_capture(&stderr_capture);

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, killed_background, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        killed_background,
    })
}

/// SIGKILL the group. Returns false if the group no longer exists.
fn signal_group(pgid: Pid) -> bool {
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) => true,
        Err(err) => {
            debug!(err = %err, "killpg failed");
            false
        }
    }
}

fn kill_process_group(pgid: Pid, child: &mut Child) -> Result<()> {
    if !signal_group(pgid) {
        child.kill().context("kill command")?;
    }
    Ok(())
}

fn spawn_reader<R: Read + Send + 'static>(
    label: &'static str,
    reader: R,
    limit: usize,
    done: Sender<Result<()>>,
) -> SharedCapture {
    let capture = SharedCapture::default();
    let shared = Arc::clone(&capture);
    thread::spawn(move || {
        let result = read_stream_limited(reader, limit, &shared)
            .with_context(|| format!("read {label}"));
        // The receiver is gone once the caller stopped waiting.
        let _ = done.send(result);
    });
    capture
}

/// Wait until every pending reader reports or `until` passes.
///
/// Returns `Ok(false)` on deadline. A reader that panicked shows up as a
/// disconnected channel.
fn wait_for_readers(
    done: &Receiver<Result<()>>,
    pending: &mut usize,
    until: Instant,
) -> Result<bool> {
    while *pending > 0 {
        let left = until.saturating_duration_since(Instant::now());
        match done.recv_timeout(left) {
            Ok(result) => {
                result?;
                *pending -= 1;
            }
            Err(RecvTimeoutError::Timeout) => return Ok(false),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("output reader thread panicked"));
            }
        }
    }
    Ok(true)
}

fn take_capture(capture: &SharedCapture) -> (Vec<u8>, usize) {
    let mut guard = capture.lock().unwrap_or_else(PoisonError::into_inner);
    let captured = std::mem::take(&mut *guard);
    (captured.bytes, captured.truncated)
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize, capture: &SharedCapture) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let mut captured = capture.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = limit.saturating_sub(captured.bytes.len());
        let keep = n.min(remaining);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.truncated += n - keep;
    }

    Ok(())
}
