//! Worker process spawner.
//!
//! Launches the external worker with:
//! - the configured script (if any) as the first argument and the script's
//!   directory as the working directory;
//! - all three standard streams piped, so no terminal is inherited;
//! - `kill_on_drop(true)` so a dropped handle never leaks a process;
//! - `PYTHONUNBUFFERED=1` so every reply line is flushed as it is written.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::{AppError, Result};

/// Live stdio connection to a freshly spawned worker.
#[derive(Debug)]
pub struct WorkerConnection {
    /// Child process handle.
    pub child: Child,
    /// Worker's stdin, for command lines.
    pub stdin: ChildStdin,
    /// Worker's stdout, for reply and progress lines.
    pub stdout: ChildStdout,
    /// Worker's stderr, for diagnostics.
    pub stderr: ChildStderr,
}

/// Spawn the worker described by `config`.
///
/// The spawn is confirmed as soon as the OS reports success; the worker is
/// not expected to print a ready line.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn worker: …")`: executable missing or
///   not runnable.
/// - `AppError::Spawn("failed to capture worker …")`: a pipe was not created.
pub fn spawn_worker(config: &WorkerConfig) -> Result<WorkerConnection> {
    let mut cmd = Command::new(&config.executable);
    if let Some(script) = &config.script {
        cmd.arg(script);
    }
    cmd.args(&config.args);

    cmd.env("PYTHONUNBUFFERED", "1");
    for (key, val) in &config.env {
        cmd.env(key, val);
    }

    cmd.current_dir(config.working_dir())
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!(
            "failed to spawn worker {}: {err}",
            config.executable.display()
        ))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture worker stderr".into()))?;

    info!(
        pid = child.id(),
        executable = %config.executable.display(),
        script = ?config.script,
        "worker process spawned"
    );

    Ok(WorkerConnection {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Forward the worker's stderr into the log, one line per event.
///
/// Ends on EOF or the first read error.
#[must_use]
pub fn drain_stderr(stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => debug!(target: "worker_stderr", "{}", line.trim_end()),
                Ok(None) => break,
                Err(err) => {
                    debug!(%err, "worker stderr closed with error");
                    break;
                }
            }
        }
    })
}
