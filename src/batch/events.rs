//! Observer-facing batch events and their payloads.
//!
//! Event names and payload shapes are what browser clients subscribe to,
//! so they use the clients' camelCase field names and ISO-8601 timestamps.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::worker::protocol::{ProgressUpdate, WorkerReply, WorkerStatus};

/// Room key for a batch: `"batch_" + batch_id`.
#[must_use]
pub fn room_key(batch_id: &str) -> String {
    format!("batch_{batch_id}")
}

/// Every event the bridge emits to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEvent {
    /// Caller only: the start request was accepted locally.
    ProcessingStarted,
    /// Caller only for synchronous failures; room-wide after acknowledgement.
    ProcessingError,
    /// Room: batch state changed (sent when processing starts).
    BatchStatusUpdate,
    /// Room: verbatim worker progress message.
    ProcessingProgress,
    /// Room: batch finished.
    ProcessingComplete,
    /// Room: batch paused.
    ProcessingPaused,
    /// Room: batch resumed.
    ProcessingResumed,
    /// Room: batch stopped.
    ProcessingStopped,
}

impl BatchEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ProcessingStarted => "processing_started",
            Self::ProcessingError => "processing_error",
            Self::BatchStatusUpdate => "batch_status_update",
            Self::ProcessingProgress => "processing_progress",
            Self::ProcessingComplete => "processing_complete",
            Self::ProcessingPaused => "processing_paused",
            Self::ProcessingResumed => "processing_resumed",
            Self::ProcessingStopped => "processing_stopped",
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `processing_started` payload.
#[must_use]
pub fn started_payload(batch_id: &str, total: usize) -> Value {
    json!({
        "batchId": batch_id,
        "status": "STARTED",
        "totalReports": total,
        "timestamp": timestamp(),
    })
}

/// `batch_status_update` payload announcing that processing started.
#[must_use]
pub fn status_update_payload(batch_id: &str, total: usize) -> Value {
    json!({
        "batchId": batch_id,
        "status": "PROCESSING_STARTED",
        "totalReports": total,
        "timestamp": timestamp(),
    })
}

/// `processing_paused` / `processing_resumed` / `processing_stopped`
/// payload for an acknowledged control verb.
#[must_use]
pub fn control_payload(batch_id: &str, status: &WorkerStatus) -> Value {
    json!({
        "batchId": batch_id,
        "status": status.as_str(),
        "timestamp": timestamp(),
    })
}

/// `processing_error` payload.
#[must_use]
pub fn error_payload(batch_id: &str, error: &str) -> Value {
    json!({
        "batchId": batch_id,
        "status": "FAILED",
        "error": error,
        "timestamp": timestamp(),
    })
}

/// How a batch ended, as reported by the worker on either channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// Every item was processed.
    Completed {
        /// Worker message.
        message: Option<String>,
        /// Items that failed along the way.
        failed_records: u64,
    },
    /// The batch was stopped.
    Stopped {
        /// Worker message.
        message: Option<String>,
    },
    /// The batch failed.
    Failed {
        /// Worker error text.
        error: String,
    },
}

impl TerminalOutcome {
    /// Outcome for a terminal progress message, `None` for non-terminal ones.
    #[must_use]
    pub fn from_progress(update: &ProgressUpdate) -> Option<Self> {
        if !update.status.is_terminal_progress() {
            return None;
        }
        Some(match update.status {
            WorkerStatus::Completed => Self::Completed {
                message: update.message.clone(),
                failed_records: update.failed_records.unwrap_or(0),
            },
            WorkerStatus::Stopped => Self::Stopped {
                message: update.message.clone(),
            },
            _ => Self::Failed {
                error: update
                    .raw
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .or_else(|| update.message.clone())
                    .unwrap_or_else(|| "batch failed".to_owned()),
            },
        })
    }

    /// Outcome for a terminal reply, `None` for non-terminal ones.
    #[must_use]
    pub fn from_reply(reply: &WorkerReply) -> Option<Self> {
        if !reply.status.is_terminal_reply() {
            return None;
        }
        Some(match reply.status {
            WorkerStatus::Success => Self::Completed {
                message: reply.message.clone(),
                failed_records: reply
                    .raw
                    .get("failed_records")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            },
            WorkerStatus::Stopped => Self::Stopped {
                message: reply.message.clone(),
            },
            _ => Self::Failed {
                error: reply.failure_text("batch failed"),
            },
        })
    }

    /// Event announcing this outcome to the room.
    #[must_use]
    pub fn event(&self) -> BatchEvent {
        match self {
            Self::Completed { .. } => BatchEvent::ProcessingComplete,
            Self::Stopped { .. } => BatchEvent::ProcessingStopped,
            Self::Failed { .. } => BatchEvent::ProcessingError,
        }
    }

    /// Synthesized payload for [`TerminalOutcome::event`].
    #[must_use]
    pub fn payload(&self, batch_id: &str) -> Value {
        match self {
            Self::Completed {
                message,
                failed_records,
            } => json!({
                "batchId": batch_id,
                "status": "COMPLETED",
                "message": message,
                "failedRecords": failed_records,
                "timestamp": timestamp(),
            }),
            Self::Stopped { message } => json!({
                "batchId": batch_id,
                "status": "STOPPED",
                "message": message,
                "timestamp": timestamp(),
            }),
            Self::Failed { error } => error_payload(batch_id, error),
        }
    }
}
