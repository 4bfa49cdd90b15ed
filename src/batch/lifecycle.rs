//! Batch lifecycle controller.
//!
//! Turns client intents (start, pause, resume, stop) into worker commands
//! and keeps the session registry and observers in step with the replies.
//!
//! Synchronous failures (duplicate start, transport errors, `FAILED`
//! replies) are reported to the requesting client only, as
//! `processing_error`. Successful state changes are broadcast to the
//! batch's room.

use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::batch::events::{
    control_payload, error_payload, room_key, started_payload, status_update_payload, BatchEvent,
    TerminalOutcome,
};
use crate::batch::registry::{BatchRegistry, BatchSession, BatchState};
use crate::batch::router::retire_batch;
use crate::transport::RoomTransport;
use crate::worker::correlator::CommandCorrelator;
use crate::worker::protocol::{WorkerCommand, WorkerReply, WorkerStatus};
use crate::{AppError, Result};

/// Control verbs applicable to an active batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlVerb {
    /// Pause processing.
    Pause,
    /// Resume processing.
    Resume,
    /// Stop processing and end the batch.
    Stop,
}

impl ControlVerb {
    fn command(self, batch_id: &str) -> WorkerCommand {
        let batch_id = batch_id.to_owned();
        match self {
            Self::Pause => WorkerCommand::Pause { batch_id },
            Self::Resume => WorkerCommand::Resume { batch_id },
            Self::Stop => WorkerCommand::Stop { batch_id },
        }
    }

    fn success_status(self) -> WorkerStatus {
        match self {
            Self::Pause => WorkerStatus::Paused,
            Self::Resume => WorkerStatus::Resumed,
            Self::Stop => WorkerStatus::Stopped,
        }
    }

    fn event(self) -> BatchEvent {
        match self {
            Self::Pause => BatchEvent::ProcessingPaused,
            Self::Resume => BatchEvent::ProcessingResumed,
            Self::Stop => BatchEvent::ProcessingStopped,
        }
    }

    /// Lowercase verb name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
        }
    }
}

/// Drives batch start and control verbs against the worker.
pub struct BatchLifecycleController {
    correlator: Arc<CommandCorrelator>,
    registry: Arc<BatchRegistry>,
    transport: Arc<dyn RoomTransport>,
}

impl BatchLifecycleController {
    /// Create a controller over the shared correlator, registry, and transport.
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

    /// Start processing `batch_id` on behalf of `client`.
    ///
    /// Joins the client to the batch room, registers the session, tells the
    /// caller and the room that processing started, then issues the start
    /// command. An `ACKNOWLEDGED` reply leaves the session active; progress
    /// and completion arrive later through the router. A `FAILED` reply
    /// removes the session and is returned as `Ok` after the caller has been
    /// sent `processing_error`. A `SUCCESS` or `STOPPED` reply means the
    /// batch already ended: the session is retired and the room gets the
    /// terminal event, once.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` when `batch_id` is empty.
    /// - `AppError::AlreadyActive` when the batch already has a session.
    /// - Any error from [`CommandCorrelator::issue`]; the session is removed.
    pub async fn start(
        &self,
        client: &str,
        owner: Option<String>,
        batch_id: &str,
        item_ids: Vec<String>,
    ) -> Result<WorkerReply> {
        let span = info_span!("batch_start", batch_id, client, items = item_ids.len());
        self.start_inner(client, owner, batch_id, item_ids)
            .instrument(span)
            .await
    }

    async fn start_inner(
        &self,
        client: &str,
        owner: Option<String>,
        batch_id: &str,
        item_ids: Vec<String>,
    ) -> Result<WorkerReply> {
        if batch_id.is_empty() {
            return Err(self.fail_caller(
                client,
                batch_id,
                AppError::Protocol("batchId is required".into()),
            ));
        }

        let total = item_ids.len();
        let session = BatchSession::new(batch_id.to_owned(), item_ids.clone(), owner);
        if let Err(err) = self.registry.create(session) {
            return Err(self.fail_caller(client, batch_id, err));
        }

        let room = room_key(batch_id);
        self.transport.join_room(client, &room);
        self.transport.emit(
            client,
            BatchEvent::ProcessingStarted.name(),
            started_payload(batch_id, total),
        );
        self.transport.broadcast(
            &room,
            BatchEvent::BatchStatusUpdate.name(),
            status_update_payload(batch_id, total),
        );

        let command = WorkerCommand::ProcessBatch {
            batch_id: batch_id.to_owned(),
            report_ids: item_ids,
            socket_mode: true,
        };

        match self.correlator.issue(command).await {
            Ok(reply) if reply.is_failed() => {
                self.registry.remove(batch_id);
                let text = reply.failure_text("failed to start batch processing");
                warn!(error = %text, "worker refused batch start");
                self.transport.emit(
                    client,
                    BatchEvent::ProcessingError.name(),
                    error_payload(batch_id, &text),
                );
                Ok(reply)
            }
            Ok(reply) => {
                if reply.status == WorkerStatus::Acknowledged {
                    info!("batch acknowledged by worker");
                } else if let Some(outcome) = TerminalOutcome::from_reply(&reply) {
                    // The worker finished the batch within the start command.
                    info!(status = %reply.status, "batch ended in its start reply");
                    retire_batch(&self.registry, self.transport.as_ref(), batch_id, &outcome);
                } else {
                    debug!(status = %reply.status, "batch start answered with a non-acknowledgement status");
                }
                Ok(reply)
            }
            Err(err) => {
                self.registry.remove(batch_id);
                Err(self.fail_caller(client, batch_id, err))
            }
        }
    }

    /// Pause `batch_id`.
    ///
    /// # Errors
    ///
    /// Any error from [`CommandCorrelator::issue`].
    pub async fn pause(&self, client: &str, batch_id: &str) -> Result<WorkerReply> {
        self.control(client, batch_id, ControlVerb::Pause).await
    }

    /// Resume `batch_id`.
    ///
    /// # Errors
    ///
    /// Any error from [`CommandCorrelator::issue`].
    pub async fn resume(&self, client: &str, batch_id: &str) -> Result<WorkerReply> {
        self.control(client, batch_id, ControlVerb::Resume).await
    }

    /// Stop `batch_id`. A `STOPPED` reply removes the session.
    ///
    /// # Errors
    ///
    /// Any error from [`CommandCorrelator::issue`].
    pub async fn stop(&self, client: &str, batch_id: &str) -> Result<WorkerReply> {
        self.control(client, batch_id, ControlVerb::Stop).await
    }

    /// Forward `verb` for `batch_id` and apply the reply.
    ///
    /// Verbs for batches without a local session are still forwarded; the
    /// worker is the authority on whether the batch exists.
    ///
    /// # Errors
    ///
    /// `AppError::Protocol` for an empty batch id, otherwise any error from
    /// [`CommandCorrelator::issue`]. The caller receives `processing_error`
    /// in both cases.
    pub async fn control(
        &self,
        client: &str,
        batch_id: &str,
        verb: ControlVerb,
    ) -> Result<WorkerReply> {
        let span = info_span!("batch_control", batch_id, client, verb = verb.as_str());
        self.control_inner(client, batch_id, verb)
            .instrument(span)
            .await
    }

    async fn control_inner(
        &self,
        client: &str,
        batch_id: &str,
        verb: ControlVerb,
    ) -> Result<WorkerReply> {
        if batch_id.is_empty() {
            return Err(self.fail_caller(
                client,
                batch_id,
                AppError::Protocol("batchId is required".into()),
            ));
        }
        if !self.registry.contains(batch_id) {
            debug!("no local session for batch, forwarding anyway");
        }

        let reply = match self.correlator.issue(verb.command(batch_id)).await {
            Ok(reply) => reply,
            Err(err) => return Err(self.fail_caller(client, batch_id, err)),
        };

        if reply.status == verb.success_status() {
            let state = match verb {
                ControlVerb::Pause => BatchState::Paused,
                ControlVerb::Resume => BatchState::Started,
                ControlVerb::Stop => {
                    // The worker's own terminal STOPPED may have retired the
                    // session already; the stop event goes out once.
                    let outcome = TerminalOutcome::Stopped {
                        message: reply.message.clone(),
                    };
                    let retired =
                        retire_batch(&self.registry, self.transport.as_ref(), batch_id, &outcome);
                    info!(status = %reply.status, retired, "batch control applied");
                    return Ok(reply);
                }
            };
            self.registry.set_state(batch_id, state);
            info!(status = %reply.status, "batch control applied");
            self.transport.broadcast(
                &room_key(batch_id),
                verb.event().name(),
                control_payload(batch_id, &reply.status),
            );
        } else if reply.is_failed() {
            let text = reply.failure_text(&format!("failed to {} batch", verb.as_str()));
            warn!(error = %text, "worker refused batch control");
            self.transport.emit(
                client,
                BatchEvent::ProcessingError.name(),
                error_payload(batch_id, &text),
            );
        } else {
            warn!(status = %reply.status, "unexpected reply to batch control");
        }

        Ok(reply)
    }

    /// Report `err` to the caller as `processing_error` and hand it back.
    fn fail_caller(&self, client: &str, batch_id: &str, err: AppError) -> AppError {
        warn!(%err, "batch request failed");
        self.transport.emit(
            client,
            BatchEvent::ProcessingError.name(),
            error_payload(batch_id, &err.to_string()),
        );
        err
    }
}
