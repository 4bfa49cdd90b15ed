//! Worker process manager.
//!
//! Owns the single external worker: spawning it on demand, writing command
//! lines to its stdin, running the reader task over its stdout, and
//! reacting to its exit.
//!
//! # State machine
//!
//! ```text
//! NotStarted ──► Starting ──► Ready ──► Exited
//!                   │                     │
//!                   └──► NotStarted       └──► Starting (next ensure_running)
//! ```
//!
//! All transitions go through `ProcessSlot::transition` while the slot
//! mutex is held, so concurrent issuers never double-spawn and the exit
//! hook always finishes failing outstanding commands before a new worker
//! can be started.

use std::fmt::{Display, Formatter};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::process::{Child, ChildStdin};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::worker::protocol::{WorkerCommand, WorkerMessage};
use crate::worker::reader::{run_reader, ReaderExit};
use crate::worker::spawner::{drain_stderr, spawn_worker, WorkerConnection};
use crate::worker::writer::{encode_command, write_json_line};
use crate::{AppError, Result};

/// How long the exit monitor waits for the reader to drain buffered lines.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Sole consumer of everything the worker emits.
///
/// Both methods run on the worker's read/monitor tasks and must not block.
pub trait WorkerHandler: Send + Sync {
    /// Called for every decoded message, in arrival order.
    fn on_message(&self, message: WorkerMessage);

    /// Called once per worker instance after it exited and all of its
    /// output has been dispatched.
    fn on_exit(&self, exit_code: Option<i32>);
}

/// Lifecycle state of the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No worker has been spawned yet (or the last spawn attempt failed).
    NotStarted,
    /// A spawn is in progress.
    Starting,
    /// The worker is running and accepts commands.
    Ready,
    /// The last worker exited.
    Exited {
        /// Exit code, when the process was not terminated by a signal.
        exit_code: Option<i32>,
    },
}

impl WorkerState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted | Self::Exited { .. }, Self::Starting)
                | (Self::Starting, Self::Ready | Self::NotStarted)
                | (Self::Ready, Self::Exited { .. })
        )
    }

    /// Short snake-case name for logs and status payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Exited { .. } => "exited",
        }
    }
}

impl Display for WorkerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Internal state ────────────────────────────────────────────────────────────

type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;

/// Handles belonging to one live worker instance.
struct RunningWorker {
    generation: u64,
    pid: Option<u32>,
    stdin: SharedStdin,
    kill: CancellationToken,
    monitor: Option<JoinHandle<()>>,
}

struct ProcessSlot {
    state: WorkerState,
    running: Option<RunningWorker>,
    generation: u64,
}

impl ProcessSlot {
    fn transition(&mut self, next: WorkerState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "unexpected worker state transition");
        }
        debug!(from = %self.state, to = %next, "worker state transition");
        self.state = next;
    }
}

struct Shared {
    slot: Mutex<ProcessSlot>,
    handler: RwLock<Option<Weak<dyn WorkerHandler>>>,
}

impl Shared {
    fn handler(&self) -> Option<Arc<dyn WorkerHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn dispatch(&self, message: WorkerMessage) {
        match self.handler() {
            Some(handler) => handler.on_message(message),
            None => warn!(?message, "no worker handler registered, dropping message"),
        }
    }

    /// Retire worker `generation`: clear its handles, mark the state
    /// `Exited`, and run the exit hook, all under the slot lock.
    async fn handle_exit(&self, generation: u64, exit_code: Option<i32>) {
        let mut slot = self.slot.lock().await;

        let is_current = slot
            .running
            .as_ref()
            .is_some_and(|running| running.generation == generation);
        if !is_current {
            debug!(generation, "exit of a retired worker instance, ignoring");
            return;
        }

        slot.running = None;
        slot.transition(WorkerState::Exited { exit_code });
        info!(generation, ?exit_code, "worker exited");

        match self.handler() {
            Some(handler) => handler.on_exit(exit_code),
            None => warn!(generation, "no worker handler registered for exit notification"),
        }
    }
}

// ── WorkerProcess ─────────────────────────────────────────────────────────────

/// Owner of the single external worker process.
pub struct WorkerProcess {
    config: WorkerConfig,
    shared: Arc<Shared>,
    shutdown_lock: Mutex<()>,
}

impl WorkerProcess {
    /// Create a manager for the worker described by `config`.
    ///
    /// Nothing is spawned until [`WorkerProcess::ensure_running`] is called.
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                slot: Mutex::new(ProcessSlot {
                    state: WorkerState::NotStarted,
                    running: None,
                    generation: 0,
                }),
                handler: RwLock::new(None),
            }),
            shutdown_lock: Mutex::new(()),
        }
    }

    /// Launch configuration.
    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Register the sole consumer of worker output.
    ///
    /// Only a weak reference is kept; the caller owns the handler. A later
    /// registration replaces the earlier one.
    pub fn on_line<H>(&self, handler: &Arc<H>)
    where
        H: WorkerHandler + 'static,
    {
        let weak = Arc::downgrade(handler);
        let weak: Weak<dyn WorkerHandler> = weak;
        *self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(weak);
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> WorkerState {
        self.shared.slot.lock().await.state
    }

    /// Whether the worker is running and accepts commands.
    pub async fn is_ready(&self) -> bool {
        self.state().await == WorkerState::Ready
    }

    /// OS process id of the live worker, if any.
    pub async fn pid(&self) -> Option<u32> {
        self.shared
            .slot
            .lock()
            .await
            .running
            .as_ref()
            .and_then(|running| running.pid)
    }

    /// Spawn the worker unless it is already `Ready`.
    ///
    /// Every spawn starts with a fresh line-framing buffer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the worker cannot be launched; the
    /// state returns to `NotStarted` and the next call retries.
    pub async fn ensure_running(&self) -> Result<()> {
        let mut slot = self.shared.slot.lock().await;
        if slot.state == WorkerState::Ready {
            return Ok(());
        }

        slot.transition(WorkerState::Starting);

        let connection = match spawn_worker(&self.config) {
            Ok(connection) => connection,
            Err(err) => {
                warn!(%err, "worker spawn failed");
                slot.transition(WorkerState::NotStarted);
                return Err(err);
            }
        };

        slot.generation += 1;
        let generation = slot.generation;
        let WorkerConnection {
            child,
            stdin,
            stdout,
            stderr,
        } = connection;
        let pid = child.id();
        let kill = CancellationToken::new();

        let dispatch_to = Arc::clone(&self.shared);
        let reader = tokio::spawn(run_reader(
            stdout,
            move |message| dispatch_to.dispatch(message),
            kill.clone(),
        ));
        // Detached: ends on its own when the worker closes stderr.
        let _stderr = drain_stderr(stderr);
        let monitor = tokio::spawn(monitor_exit(
            Arc::clone(&self.shared),
            generation,
            child,
            reader,
            kill.clone(),
        ));

        slot.running = Some(RunningWorker {
            generation,
            pid,
            stdin: Arc::new(Mutex::new(Some(stdin))),
            kill,
            monitor: Some(monitor),
        });
        slot.transition(WorkerState::Ready);
        info!(generation, pid, "worker ready");

        Ok(())
    }

    /// Write one command line, tagged with `command_id`, to the worker.
    ///
    /// # Errors
    ///
    /// - `AppError::Write("worker is not ready …")` when no worker is running.
    /// - `AppError::Write("write failed: …")` when stdin is closed.
    pub async fn send(&self, command_id: u64, command: &WorkerCommand) -> Result<()> {
        let line = encode_command(command_id, command)?;

        let stdin = {
            let slot = self.shared.slot.lock().await;
            match (&slot.state, slot.running.as_ref()) {
                (WorkerState::Ready, Some(running)) => Arc::clone(&running.stdin),
                (state, _) => {
                    return Err(AppError::Write(format!("worker is not ready ({state})")));
                }
            }
        };

        let mut guard = stdin.lock().await;
        let Some(pipe) = guard.as_mut() else {
            return Err(AppError::Write("worker stdin is closed".into()));
        };
        write_json_line(pipe, &line).await?;

        debug!(command_id, action = command.action(), "command written to worker");
        Ok(())
    }

    /// Stop the worker: close its stdin, wait up to the configured grace
    /// period for it to exit, then force-kill it.
    ///
    /// Always leaves the manager with no live worker and runs the exit hook
    /// (failing outstanding commands) before returning. A no-op when no
    /// worker is running.
    pub async fn shutdown(&self) {
        let _serial = self.shutdown_lock.lock().await;

        let (generation, stdin, kill, monitor) = {
            let mut slot = self.shared.slot.lock().await;
            let Some(running) = slot.running.as_mut() else {
                debug!("worker shutdown requested but no worker is running");
                return;
            };
            (
                running.generation,
                Arc::clone(&running.stdin),
                running.kill.clone(),
                running.monitor.take(),
            )
        };

        // EOF on stdin is the worker's cue to leave its command loop. A writer
        // stuck on a full pipe keeps the lock; the kill below covers that case.
        if let Ok(mut pipe) = stdin.try_lock() {
            pipe.take();
        }

        let Some(mut monitor) = monitor else {
            warn!(generation, "worker monitor already taken, forcing kill");
            kill.cancel();
            self.shared.handle_exit(generation, None).await;
            return;
        };

        let grace = self.config.exit_grace();
        if tokio::time::timeout(grace, &mut monitor).await.is_err() {
            warn!(generation, ?grace, "worker did not exit within grace period, forcing kill");
            kill.cancel();
            if let Err(err) = monitor.await {
                warn!(generation, %err, "worker monitor task failed");
            }
        }

        // Covers a monitor that panicked before retiring its instance.
        self.shared.handle_exit(generation, None).await;
        info!(generation, "worker shut down");
    }
}

// ── Exit monitor ──────────────────────────────────────────────────────────────

/// Await the worker's exit (or a kill request), let the reader drain, then
/// retire the instance.
async fn monitor_exit(
    shared: Arc<Shared>,
    generation: u64,
    mut child: Child,
    reader: JoinHandle<ReaderExit>,
    kill: CancellationToken,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill.cancelled() => {
            if let Err(err) = child.kill().await {
                warn!(generation, %err, "failed to kill worker process");
            }
            child.wait().await
        }
    };

    let exit_code = match status {
        Ok(status) => status.code(),
        Err(err) => {
            warn!(generation, %err, "error waiting for worker process");
            None
        }
    };

    // Replies written just before exit must reach the handler before the
    // exit hook fails the commands they answer.
    match tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await {
        Ok(Ok(exit)) => debug!(generation, ?exit, "worker reader finished"),
        Ok(Err(err)) => warn!(generation, %err, "worker reader task failed"),
        Err(_) => {
            warn!(generation, "worker reader did not drain in time, cancelling");
            kill.cancel();
        }
    }

    shared.handle_exit(generation, exit_code).await;
}
