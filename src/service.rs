//! Worker service: wires the process manager, correlator, router,
//! registry, and lifecycle controller into one handle shared by the HTTP
//! and WebSocket surfaces.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::batch::lifecycle::BatchLifecycleController;
use crate::batch::registry::{BatchRegistry, BatchSession};
use crate::batch::router::ProgressEventRouter;
use crate::config::WorkerConfig;
use crate::transport::RoomTransport;
use crate::worker::correlator::CommandCorrelator;
use crate::worker::process::{WorkerProcess, WorkerState};
use crate::worker::protocol::{WorkerCommand, WorkerReply};
use crate::Result;

/// Snapshot returned by [`WorkerService::status`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    /// The worker accepts commands.
    pub ready: bool,
    /// A worker process is alive (same as `ready` once spawning finished).
    pub worker_running: bool,
    /// Process state name.
    pub state: &'static str,
    /// OS process id of the live worker.
    pub pid: Option<u32>,
    /// Exit code of the last worker, when it has exited.
    pub exit_code: Option<i32>,
    /// Commands awaiting a reply.
    pub pending_commands: usize,
    /// Batch sessions currently registered.
    pub active_batches: usize,
}

/// Long-lived handle over the worker and its batch sessions.
pub struct WorkerService {
    process: Arc<WorkerProcess>,
    correlator: Arc<CommandCorrelator>,
    registry: Arc<BatchRegistry>,
    // Strong owner of the handler; the process keeps only a weak reference.
    _router: Arc<ProgressEventRouter>,
    lifecycle: BatchLifecycleController,
}

impl WorkerService {
    /// Build the service. Nothing is spawned until [`WorkerService::init`]
    /// or the first command.
    #[must_use]
    pub fn new(config: WorkerConfig, transport: Arc<dyn RoomTransport>) -> Self {
        let registry = Arc::new(BatchRegistry::new());
        let process = Arc::new(WorkerProcess::new(config));
        let correlator = Arc::new(CommandCorrelator::new(Arc::clone(&process)));
        let router = Arc::new(ProgressEventRouter::new(
            Arc::clone(&correlator),
            Arc::clone(&registry),
            Arc::clone(&transport),
        ));
        process.on_line(&router);

        let lifecycle = BatchLifecycleController::new(
            Arc::clone(&correlator),
            Arc::clone(&registry),
            transport,
        );

        Self {
            process,
            correlator,
            registry,
            _router: router,
            lifecycle,
        }
    }

    /// Spawn the worker eagerly when `spawn_on_start` is set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the worker cannot be launched.
    pub async fn init(&self) -> Result<()> {
        if self.process.config().spawn_on_start {
            self.process.ensure_running().await?;
        }
        Ok(())
    }

    /// Batch lifecycle verbs.
    #[must_use]
    pub fn lifecycle(&self) -> &BatchLifecycleController {
        &self.lifecycle
    }

    /// Active batch sessions.
    #[must_use]
    pub fn registry(&self) -> &Arc<BatchRegistry> {
        &self.registry
    }

    /// The underlying process manager.
    #[must_use]
    pub fn process(&self) -> &Arc<WorkerProcess> {
        &self.process
    }

    /// Send an arbitrary command and wait for its reply.
    ///
    /// # Errors
    ///
    /// Any error from [`CommandCorrelator::issue`].
    pub async fn issue(&self, command: WorkerCommand) -> Result<WorkerReply> {
        self.correlator.issue(command).await
    }

    /// Liveness round-trip.
    ///
    /// # Errors
    ///
    /// Any error from [`CommandCorrelator::issue`].
    pub async fn ping(&self) -> Result<WorkerReply> {
        self.issue(WorkerCommand::Ping).await
    }

    /// Greeting round-trip.
    ///
    /// # Errors
    ///
    /// Any error from [`CommandCorrelator::issue`].
    pub async fn hello(&self) -> Result<WorkerReply> {
        self.issue(WorkerCommand::Hello).await
    }

    /// Worker-side sleep.
    ///
    /// # Errors
    ///
    /// Any error from [`CommandCorrelator::issue`].
    pub async fn simulate_work(&self) -> Result<WorkerReply> {
        self.issue(WorkerCommand::SimulateWork).await
    }

    /// Start a portal login. The reply may be `OTP_REQUIRED`.
    ///
    /// # Errors
    ///
    /// Any error from [`CommandCorrelator::issue`].
    pub async fn login(
        &self,
        email: String,
        password: String,
        record_id: Option<String>,
    ) -> Result<WorkerReply> {
        self.issue(WorkerCommand::Login {
            email,
            password,
            record_id,
        })
        .await
    }

    /// Submit a one-time code for a pending login.
    ///
    /// # Errors
    ///
    /// Any error from [`CommandCorrelator::issue`].
    pub async fn submit_otp(&self, otp: String, record_id: Option<String>) -> Result<WorkerReply> {
        self.issue(WorkerCommand::Otp { otp, record_id }).await
    }

    /// Ask the worker to close its browser; the worker exits afterwards.
    ///
    /// # Errors
    ///
    /// Any error from [`CommandCorrelator::issue`].
    pub async fn close_browser(&self) -> Result<WorkerReply> {
        self.issue(WorkerCommand::Close).await
    }

    /// Current process and table sizes.
    pub async fn status(&self) -> ServiceStatus {
        let state = self.process.state().await;
        let ready = state == WorkerState::Ready;
        ServiceStatus {
            ready,
            worker_running: ready,
            state: state.as_str(),
            pid: self.process.pid().await,
            exit_code: match state {
                WorkerState::Exited { exit_code } => exit_code,
                _ => None,
            },
            pending_commands: self.correlator.pending_count(),
            active_batches: self.registry.len(),
        }
    }

    /// Stop the current worker and spawn a fresh one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the new worker cannot be launched.
    pub async fn restart(&self) -> Result<()> {
        async {
            self.shutdown().await;
            self.process.ensure_running().await?;
            info!("worker restarted");
            Ok(())
        }
        .instrument(info_span!("worker_restart"))
        .await
    }

    /// Retire the worker: ask it to `close` (bounded by `close_timeout`),
    /// then close stdin and force-kill after the grace period.
    ///
    /// A no-op when no worker is running.
    pub async fn shutdown(&self) {
        if self.process.is_ready().await {
            let timeout = self.process.config().close_timeout();
            match tokio::time::timeout(timeout, self.close_browser()).await {
                Ok(Ok(reply)) => info!(status = %reply.status, "worker acknowledged close"),
                Ok(Err(err)) => warn!(%err, "worker close command failed"),
                Err(_) => warn!(?timeout, "worker did not answer close in time"),
            }
        }
        self.process.shutdown().await;
    }

    /// Drop every batch session without telling the worker.
    pub fn sweep_sessions(&self) -> Vec<BatchSession> {
        let swept = self.registry.sweep();
        if !swept.is_empty() {
            warn!(count = swept.len(), "swept batch sessions");
        }
        swept
    }
}
