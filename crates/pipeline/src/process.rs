//! Supervised execution of external build tooling.
//!
//! Spawns a command with a wall-clock deadline, captures stdout/stderr
//! incrementally so long builds stay observable, and on expiry kills the
//! whole process group so grandchildren cannot hang the worker.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

/// Maximum bytes kept per captured stream (10 MiB).
///
/// Output beyond this is still drained (so the child never blocks on a
/// full pipe) but no longer retained.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// A fully specified supervised invocation.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Extra environment on top of the inherited one.
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

/// Captured output of a successful run.
#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("process exceeded its {timeout_ms} ms deadline")]
    TimedOut { timeout_ms: u64 },

    #[error("process exited with status {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("failed to run process: {0}")]
    Io(#[from] std::io::Error),
}

/// Run `request` to completion or deadline.
///
/// Zero exit is success; nonzero is [`ProcessError::NonZeroExit`] with
/// the captured stderr for diagnostics.
pub async fn run(request: ProcessRequest) -> Result<ProcessOutput, ProcessError> {
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .current_dir(&request.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Backstop: if the future is dropped the child still dies.
        .kill_on_drop(true);

    for (key, value) in &request.env {
        cmd.env(key, value);
    }

    // Own process group so the deadline kill reaches grandchildren too.
    #[cfg(unix)]
    cmd.process_group(0);

    let start = Instant::now();
    let mut child = cmd.spawn()?;
    let pid = child.id();

    let stdout_task = spawn_reader(child.stdout.take(), &request.program, "stdout");
    let stderr_task = spawn_reader(child.stderr.take(), &request.program, "stderr");

    match tokio::time::timeout(request.timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            let duration_ms = start.elapsed().as_millis() as u64;

            if status.success() {
                Ok(ProcessOutput {
                    stdout,
                    stderr,
                    duration_ms,
                })
            } else {
                Err(ProcessError::NonZeroExit {
                    code: status.code().unwrap_or(-1),
                    stderr,
                })
            }
        }
        Ok(Err(err)) => Err(ProcessError::Io(err)),
        Err(_elapsed) => {
            kill_process_tree(&mut child, pid).await;
            Err(ProcessError::TimedOut {
                timeout_ms: request.timeout.as_millis() as u64,
            })
        }
    }
}

/// Read a stream line by line, forwarding each line to tracing as it
/// arrives and accumulating up to [`MAX_OUTPUT_BYTES`].
fn spawn_reader<R>(
    stream: Option<R>,
    program: &str,
    channel: &'static str,
) -> tokio::task::JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let program = program.to_string();
    tokio::spawn(async move {
        let mut captured = String::new();
        let Some(stream) = stream else {
            return captured;
        };
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(%program, channel, "{line}");
            if captured.len() < MAX_OUTPUT_BYTES {
                captured.push_str(&line);
                captured.push('\n');
            }
        }
        captured
    })
}

/// Terminate the child and all of its descendants.
///
/// On unix the child was spawned as its own process-group leader, so a
/// single signal to the negative pid reaches the whole tree.
async fn kill_process_tree(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // SAFETY: plain syscall; a stale pid at worst signals a group we
        // just owned, and ESRCH is ignored.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    if let Err(err) = child.kill().await {
        tracing::warn!(error = %err, "Failed to kill timed-out process");
    }
}
