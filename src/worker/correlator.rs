//! Command correlator.
//!
//! Maps outgoing command ids to the `oneshot` continuations of the callers
//! waiting for their replies.
//!
//! # Entry lifecycle
//!
//! 1. [`CommandCorrelator::issue`] allocates the next id and stores a
//!    pending entry before the command line is written.
//! 2. The read loop calls [`CommandCorrelator::resolve`] when a reply with
//!    that id arrives; the entry is removed and the caller woken.
//! 3. If the worker exits first, the exit hook calls
//!    [`CommandCorrelator::reject_all`], which fails every entry with
//!    [`AppError::WorkerExited`] and empties the table.
//!
//! There is no built-in timeout: some replies legitimately arrive much
//! later (a login waiting for an out-of-band one-time code). Callers that
//! need a bound wrap [`CommandCorrelator::issue`] in
//! [`tokio::time::timeout`]; dropping the future does not withdraw the
//! command, and its late reply simply finds a closed receiver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::worker::process::WorkerProcess;
use crate::worker::protocol::{WorkerCommand, WorkerReply};
use crate::{AppError, Result};

/// Continuation for one outstanding command.
type ReplySender = oneshot::Sender<Result<WorkerReply>>;

/// Receiving half handed to the issuer of a command.
pub type ReplyReceiver = oneshot::Receiver<Result<WorkerReply>>;

/// Pending-command table plus the id allocator.
pub struct CommandCorrelator {
    process: Arc<WorkerProcess>,
    pending: Mutex<HashMap<u64, ReplySender>>,
    next_id: AtomicU64,
}

impl CommandCorrelator {
    /// Create a correlator that sends through `process`.
    #[must_use]
    pub fn new(process: Arc<WorkerProcess>) -> Self {
        Self {
            process,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// The process this correlator sends through.
    #[must_use]
    pub fn process(&self) -> &Arc<WorkerProcess> {
        &self.process
    }

    /// Send `command` to the worker and wait for its reply.
    ///
    /// Spawns the worker first if it is not running. A reply whose status
    /// is `FAILED` is returned as `Ok`; interpreting it is up to the caller.
    ///
    /// # Errors
    ///
    /// - `AppError::Spawn` if the worker cannot be started.
    /// - `AppError::Write` if the command line cannot be written.
    /// - `AppError::WorkerExited` if the worker exits before replying.
    pub async fn issue(&self, command: WorkerCommand) -> Result<WorkerReply> {
        self.process.ensure_running().await?;

        let (command_id, reply_rx) = self.register();
        let action = command.action();

        if let Err(err) = self.process.send(command_id, &command).await {
            self.forget(command_id);
            warn!(command_id, action, %err, "failed to send command to worker");
            return Err(err);
        }
        info!(command_id, action, "command issued");

        // A dropped sender means the entry vanished without an answer; the
        // only path that does that is a worker teardown.
        reply_rx
            .await
            .unwrap_or(Err(AppError::WorkerExited(None)))
    }

    /// Allocate the next command id and store its pending entry.
    ///
    /// This is the first half of [`CommandCorrelator::issue`]; the entry is
    /// settled by [`CommandCorrelator::resolve`] or
    /// [`CommandCorrelator::reject_all`].
    pub fn register(&self) -> (u64, ReplyReceiver) {
        let command_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.table().insert(command_id, reply_tx);
        (command_id, reply_rx)
    }

    /// Complete the pending command `command_id` with `reply`.
    ///
    /// Returns `false` (and logs a warning) when no such command is pending,
    /// which happens for duplicate or late replies.
    pub fn resolve(&self, command_id: u64, reply: WorkerReply) -> bool {
        let Some(reply_tx) = self.table().remove(&command_id) else {
            warn!(
                command_id,
                status = %reply.status,
                "reply for unknown command id, ignoring"
            );
            return false;
        };

        if reply_tx.send(Ok(reply)).is_err() {
            debug!(command_id, "issuer stopped waiting before the reply arrived");
        }
        true
    }

    /// Fail every pending command with `AppError::WorkerExited(exit_code)`.
    ///
    /// Returns the number of commands failed. The table is empty afterwards.
    pub fn reject_all(&self, exit_code: Option<i32>) -> usize {
        let drained: Vec<(u64, ReplySender)> = self.table().drain().collect();
        let count = drained.len();

        for (command_id, reply_tx) in drained {
            if reply_tx.send(Err(AppError::WorkerExited(exit_code))).is_err() {
                debug!(command_id, "issuer stopped waiting before the worker exited");
            }
        }

        if count > 0 {
            warn!(count, ?exit_code, "failed pending commands after worker exit");
        }
        count
    }

    /// Number of commands awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    fn forget(&self, command_id: u64) {
        self.table().remove(&command_id);
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ReplySender>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
