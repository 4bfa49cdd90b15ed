//! Progress event router.
//!
//! Sole consumer of worker output. Replies that match a pending command go
//! to the correlator; progress is fanned out to the batch's room; terminal
//! statuses retire the batch session exactly once.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::batch::events::{room_key, BatchEvent, TerminalOutcome};
use crate::batch::registry::BatchRegistry;
use crate::transport::RoomTransport;
use crate::worker::correlator::CommandCorrelator;
use crate::worker::process::WorkerHandler;
use crate::worker::protocol::{ProgressUpdate, WorkerMessage, WorkerReply, WorkerStatus};

/// Routes decoded worker messages to callers and observers.
pub struct ProgressEventRouter {
    correlator: Arc<CommandCorrelator>,
    registry: Arc<BatchRegistry>,
    transport: Arc<dyn RoomTransport>,
}

impl ProgressEventRouter {
    /// Create a router over the given correlator, registry, and transport.
    #[must_use]
    pub fn new(
        correlator: Arc<CommandCorrelator>,
        registry: Arc<BatchRegistry>,
        transport: Arc<dyn RoomTransport>,
    ) -> Self {
        Self {
            correlator,
            registry,
            transport,
        }
    }

    /// Route one decoded message.
    pub fn route(&self, message: WorkerMessage) {
        match message {
            WorkerMessage::Progress(update) => self.route_progress(update),
            WorkerMessage::Reply(reply) => self.route_reply(reply),
            WorkerMessage::Unrouted { status, raw } => match status {
                Some(WorkerStatus::Other(ref s)) if s == "FATAL" => {
                    error!(message = %raw, "worker reported a fatal error");
                }
                _ => debug!(message = %raw, "worker message without batch or command, discarding"),
            },
        }
    }

    fn route_progress(&self, update: ProgressUpdate) {
        let room = room_key(&update.batch_id);
        debug!(batch_id = %update.batch_id, status = %update.status, "batch progress");

        let outcome = TerminalOutcome::from_progress(&update);
        self.transport
            .broadcast(&room, BatchEvent::ProcessingProgress.name(), update.raw);

        if let Some(outcome) = outcome {
            self.retire(&update.batch_id, &outcome);
        }
    }

    fn route_reply(&self, reply: WorkerReply) {
        let command_id = reply.command_id;
        let terminal = reply
            .batch_id
            .clone()
            .zip(TerminalOutcome::from_reply(&reply));

        if self.correlator.resolve(command_id, reply) {
            return;
        }

        // A late terminal reply (the worker's final answer to a batch start
        // that was already acknowledged) still ends the batch.
        if let Some((batch_id, outcome)) = terminal {
            debug!(command_id, batch_id = %batch_id, "terminal reply without a waiting caller");
            self.retire(&batch_id, &outcome);
        }
    }

    fn retire(&self, batch_id: &str, outcome: &TerminalOutcome) {
        retire_batch(&self.registry, self.transport.as_ref(), batch_id, outcome);
    }
}

/// Remove the session for `batch_id` and announce `outcome` to its room.
///
/// Only the caller that actually removes the session broadcasts, so the
/// terminal event goes out once however many signals report the end.
/// Returns whether this call retired the batch.
pub fn retire_batch(
    registry: &BatchRegistry,
    transport: &dyn RoomTransport,
    batch_id: &str,
    outcome: &TerminalOutcome,
) -> bool {
    if registry.remove(batch_id).is_none() {
        debug!(batch_id, "batch already retired, suppressing terminal event");
        return false;
    }

    let event = outcome.event();
    info!(batch_id, event = event.name(), "batch finished");
    transport.broadcast(&room_key(batch_id), event.name(), outcome.payload(batch_id));
    true
}

impl WorkerHandler for ProgressEventRouter {
    fn on_message(&self, message: WorkerMessage) {
        self.route(message);
    }

    fn on_exit(&self, exit_code: Option<i32>) {
        let rejected = self.correlator.reject_all(exit_code);
        let active = self.registry.len();
        if active > 0 {
            warn!(
                ?exit_code,
                rejected, active, "worker exited with batch sessions still registered"
            );
        } else {
            info!(?exit_code, rejected, "worker exit handled");
        }
    }
}
