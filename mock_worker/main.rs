#![forbid(unsafe_code)]

//! `taqeem-mock-worker`: scripted stand-in for the automation worker.
//!
//! Speaks the same newline-delimited JSON protocol on stdin/stdout as the
//! real worker, without a browser. Used for local development and by the
//! integration tests.
//!
//! Tuning via environment:
//! - `MOCK_WORKER_STEPS` (default 3): progress steps per batch.
//! - `MOCK_WORKER_STEP_MS` (default 50): delay per step.
//! - `MOCK_WORKER_SIMULATE_MS` (default 200): `simulate_work` delay.
//! - `MOCK_WORKER_CRASH_ON`: action that makes the worker exit with code 3
//!   instead of replying.
//! - `MOCK_WORKER_SYNC_BATCH`: when set, a batch start is answered with a
//!   final `SUCCESS` reply and no progress.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const CRASH_EXIT_CODE: i32 = 3;

/// Upper bound on waiting for a stopped batch task to finish.
const STOP_WAIT: Duration = Duration::from_secs(2);

/// Shared, line-flushed stdout.
#[derive(Clone)]
struct Output(Arc<Mutex<Stdout>>);

impl Output {
    async fn emit(&self, value: &Value) {
        let mut line = value.to_string();
        line.push('\n');
        let mut out = self.0.lock().await;
        if let Err(err) = out.write_all(line.as_bytes()).await {
            warn!(%err, "stdout write failed");
            return;
        }
        if let Err(err) = out.flush().await {
            warn!(%err, "stdout flush failed");
        }
    }
}

/// Controls for one running batch.
struct BatchControl {
    paused: AtomicBool,
    stop: CancellationToken,
    /// Fired once the batch task has written its final line.
    done: CancellationToken,
}

type Tasks = Arc<Mutex<HashMap<String, Arc<BatchControl>>>>;

struct Tuning {
    steps: u64,
    step: Duration,
    simulate: Duration,
    crash_on: Option<String>,
    sync_batch: bool,
}

impl Tuning {
    fn from_env() -> Self {
        Self {
            steps: env_u64("MOCK_WORKER_STEPS", 3),
            step: Duration::from_millis(env_u64("MOCK_WORKER_STEP_MS", 50)),
            simulate: Duration::from_millis(env_u64("MOCK_WORKER_SIMULATE_MS", 200)),
            crash_on: std::env::var("MOCK_WORKER_CRASH_ON")
                .ok()
                .filter(|s| !s.is_empty()),
            sync_batch: std::env::var_os("MOCK_WORKER_SYNC_BATCH").is_some(),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    let env_filter =
        EnvFilter::try_from_env("MOCK_WORKER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the protocol; diagnostics go to stderr only.
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();

    let out = Output(Arc::new(Mutex::new(tokio::io::stdout())));
    let tuning = Arc::new(Tuning::from_env());
    let tasks: Tasks = Arc::default();

    // Not JSON: the bridge must tolerate stray output.
    {
        let mut stdout = out.0.lock().await;
        let _ = stdout.write_all(b"mock worker starting\n").await;
        let _ = stdout.flush().await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed, exiting");
                break;
            }
            Err(err) => {
                warn!(%err, "stdin read failed, exiting");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let cmd: Value = match serde_json::from_str(&line) {
            Ok(cmd) => cmd,
            Err(err) => {
                out.emit(&json!({
                    "status": "FAILED",
                    "error": format!("Invalid JSON: {err}"),
                    "received": line.trim(),
                }))
                .await;
                continue;
            }
        };

        let action = cmd.get("action").and_then(Value::as_str).unwrap_or_default();
        let command_id = cmd.get("commandId").cloned().unwrap_or(Value::Null);
        debug!(action, %command_id, "command received");

        if tuning.crash_on.as_deref() == Some(action) {
            warn!(action, "crashing on request");
            std::process::exit(CRASH_EXIT_CODE);
        }

        match action {
            "ping" | "hello" => {
                out.emit(&json!({
                    "status": "SUCCESS",
                    "message": if action == "ping" { "pong" } else { "hello from mock worker" },
                    "commandId": command_id,
                }))
                .await;
            }
            "simulate_work" => {
                let out = out.clone();
                let delay = tuning.simulate;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    out.emit(&json!({
                        "status": "SUCCESS",
                        "message": "work simulated",
                        "commandId": command_id,
                    }))
                    .await;
                });
            }
            "login" => {
                let password = cmd.get("password").and_then(Value::as_str).unwrap_or_default();
                let reply = if password == "wrong" {
                    json!({ "status": "NOT_FOUND", "recoverable": true, "commandId": command_id })
                } else {
                    json!({ "status": "OTP_REQUIRED", "message": "enter the code", "commandId": command_id })
                };
                out.emit(&reply).await;
            }
            "otp" => {
                out.emit(&json!({ "status": "SUCCESS", "message": "otp accepted", "commandId": command_id }))
                    .await;
            }
            "processTaqeemBatch" => start_batch(&cmd, command_id, &out, &tasks, &tuning).await,
            "pause" | "resume" | "stop" => control_batch(&cmd, action, command_id, &out, &tasks).await,
            "close" => {
                out.emit(&json!({ "status": "SUCCESS", "message": "browser closed", "commandId": command_id }))
                    .await;
                info!("close requested, exiting");
                break;
            }
            other => {
                out.emit(&json!({
                    "status": "FAILED",
                    "error": format!("Unknown action: {other}"),
                    "commandId": command_id,
                }))
                .await;
            }
        }
    }
}

async fn start_batch(cmd: &Value, command_id: Value, out: &Output, tasks: &Tasks, tuning: &Arc<Tuning>) {
    let batch_id = match cmd.get("batchId") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    let total = cmd
        .get("reportIds")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    if batch_id.is_empty() || total == 0 {
        out.emit(&json!({
            "status": "FAILED",
            "error": "batch has no reports to process",
            "batchId": batch_id,
            "commandId": command_id,
        }))
        .await;
        return;
    }

    if tuning.sync_batch {
        out.emit(&json!({
            "status": "SUCCESS",
            "message": format!("Batch {batch_id} processed successfully"),
            "batchId": batch_id,
            "failed_records": 0,
            "commandId": command_id,
        }))
        .await;
        return;
    }

    let control = Arc::new(BatchControl {
        paused: AtomicBool::new(false),
        stop: CancellationToken::new(),
        done: CancellationToken::new(),
    });
    tasks.lock().await.insert(batch_id.clone(), Arc::clone(&control));

    out.emit(&json!({
        "status": "ACKNOWLEDGED",
        "message": format!("Batch {batch_id} processing started"),
        "batchId": batch_id,
        "commandId": command_id,
    }))
    .await;

    let out = out.clone();
    let tasks = Arc::clone(tasks);
    let tuning = Arc::clone(tuning);
    tokio::spawn(async move {
        run_batch(&batch_id, total, command_id, &control, &out, &tuning).await;
        control.done.cancel();
        let mut tasks = tasks.lock().await;
        if tasks
            .get(&batch_id)
            .is_some_and(|current| Arc::ptr_eq(current, &control))
        {
            tasks.remove(&batch_id);
        }
    });
}

async fn run_batch(
    batch_id: &str,
    total: usize,
    command_id: Value,
    control: &BatchControl,
    out: &Output,
    tuning: &Tuning,
) {
    out.emit(&json!({
        "type": "PROGRESS",
        "batchId": batch_id,
        "status": "STARTED",
        "message": format!("Starting processing for batch {batch_id}"),
        "current": 0,
        "total": total,
        "percentage": 0,
    }))
    .await;

    for step in 1..=tuning.steps {
        while control.paused.load(Ordering::SeqCst) {
            tokio::select! {
                () = control.stop.cancelled() => break,
                () = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }

        let stopped = tokio::select! {
            () = control.stop.cancelled() => true,
            () = tokio::time::sleep(tuning.step) => false,
        };
        if stopped {
            info!(batch_id, step, "batch stopped");
            out.emit(&json!({
                "status": "STOPPED",
                "message": "Task was stopped by user",
                "batchId": batch_id,
                "commandId": command_id,
            }))
            .await;
            return;
        }

        out.emit(&json!({
            "type": "PROGRESS",
            "batchId": batch_id,
            "status": "PROCESSING",
            "current": step,
            "total": tuning.steps,
            "percentage": step * 100 / tuning.steps.max(1),
        }))
        .await;
    }

    out.emit(&json!({
        "type": "PROGRESS",
        "batchId": batch_id,
        "status": "COMPLETED",
        "message": format!("Batch {batch_id} processed successfully"),
        "current": total,
        "total": total,
        "percentage": 100,
        "failed_records": 0,
    }))
    .await;
    out.emit(&json!({
        "status": "SUCCESS",
        "batchId": batch_id,
        "failed_records": 0,
        "commandId": command_id,
    }))
    .await;
}

async fn control_batch(cmd: &Value, action: &str, command_id: Value, out: &Output, tasks: &Tasks) {
    let batch_id = match cmd.get("batchId") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    let Some(control) = tasks.lock().await.get(&batch_id).cloned() else {
        out.emit(&json!({
            "status": "FAILED",
            "error": format!("No active task found for batch {batch_id}"),
            "commandId": command_id,
        }))
        .await;
        return;
    };

    let (status, message) = match action {
        "pause" => {
            control.paused.store(true, Ordering::SeqCst);
            ("PAUSED", "Task paused")
        }
        "resume" => {
            control.paused.store(false, Ordering::SeqCst);
            ("RESUMED", "Task resumed")
        }
        _ => {
            control.paused.store(false, Ordering::SeqCst);
            control.stop.cancel();
            // The task's own STOPPED line goes out before this reply.
            if tokio::time::timeout(STOP_WAIT, control.done.cancelled())
                .await
                .is_err()
            {
                warn!(batch_id = %batch_id, "batch task did not stop in time");
            }
            ("STOPPED", "Task stopped")
        }
    };

    out.emit(&json!({
        "status": status,
        "message": message,
        "batchId": batch_id,
        "commandId": command_id,
    }))
    .await;
}
