//! Wraps the external video toolchain binary: locates it on `PATH`, builds
//! its argv, spawns it, and parses its textual stderr progress stream. Does
//! not implement encoding — only plumbing around an opaque child process.

mod progress;

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};

use crate::error::ToolchainError;
use crate::sync_ext::MutexExt;

use progress::parse_duration_from_metadata_line;
pub(crate) use progress::{compute_progress_percent, is_progress_end, parse_progress_line};

/// Cooperative cancellation handle for a single toolchain invocation. Forced
/// job removal calls [`CancellationToken::cancel`], which terminates the
/// child process tree promptly rather than waiting for it to notice.
#[derive(Clone)]
pub struct CancellationToken(Arc<Mutex<CancelState>>);

struct CancelState {
    cancelled: bool,
    child: Option<Child>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(CancelState {
            cancelled: false,
            child: None,
        })))
    }

    fn attach(&self, child: Child) {
        let mut state = self.0.lock_unpoisoned();
        state.child = Some(child);
        if state.cancelled {
            if let Some(child) = state.child.as_mut() {
                let _ = child.kill();
            }
        }
    }

    fn take_child(&self) -> Option<Child> {
        self.0.lock_unpoisoned().child.take()
    }

    /// Requests cancellation, killing the attached child process if one has
    /// been spawned. Safe to call before a process is attached or after it
    /// has exited.
    pub fn cancel(&self) {
        let mut state = self.0.lock_unpoisoned();
        state.cancelled = true;
        if let Some(child) = state.child.as_mut() {
            let _ = child.kill();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.lock_unpoisoned().cancelled
    }
}

/// Locates the external toolchain binary on `PATH` by name.
pub fn locate_binary(name: &str) -> Result<PathBuf, ToolchainError> {
    which::which(name).map_err(|_| ToolchainError::BinaryNotFound)
}

pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
}

/// Spawns `binary` with `args`, streaming stderr lines through
/// `on_progress` (elapsed seconds / percent computed against
/// `total_duration_seconds`, or against a duration probed from the
/// toolchain's own `Duration: HH:MM:SS.CC` metadata line when the caller
/// did not supply one). Returns once the process exits; a non-zero exit is
/// an error carrying the captured stderr, and a cancellation during the run
/// is reported as [`ToolchainError::Cancelled`] rather than a normal
/// non-zero exit.
pub fn run(
    binary: &Path,
    args: &[String],
    total_duration_seconds: Option<f64>,
    mut on_progress: impl FnMut(u8),
    cancel: &CancellationToken,
) -> Result<RunOutcome, ToolchainError> {
    let mut command = Command::new(binary);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(ToolchainError::Spawn)?;
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    cancel.attach(child);

    let mut total_duration = total_duration_seconds;
    let mut stderr_buf = String::new();
    if let Some(stderr) = stderr_handle {
        let reader = BufReader::new(stderr);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            stderr_buf.push_str(&line);
            stderr_buf.push('\n');
            if total_duration.is_none() {
                if let Some(probed) = parse_duration_from_metadata_line(&line) {
                    total_duration = Some(probed);
                }
            }
            if let Some(elapsed) = parse_progress_line(&line) {
                on_progress(compute_progress_percent(total_duration, elapsed));
            }
            if is_progress_end(&line) {
                on_progress(100);
            }
        }
    }

    let mut stdout_buf = String::new();
    if let Some(mut stdout) = stdout_handle {
        use std::io::Read;
        let _ = stdout.read_to_string(&mut stdout_buf);
    }

    let Some(mut child) = cancel.take_child() else {
        return Err(ToolchainError::Cancelled);
    };
    let status = child.wait().map_err(ToolchainError::Spawn)?;

    if cancel.is_cancelled() {
        return Err(ToolchainError::Cancelled);
    }

    if status.success() {
        Ok(RunOutcome {
            stdout: stdout_buf,
            stderr: stderr_buf,
        })
    } else {
        Err(ToolchainError::NonZeroExit {
            code: status.code(),
            stderr: stderr_buf,
        })
    }
}
