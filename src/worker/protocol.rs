//! Worker wire protocol.
//!
//! Outbound commands are a closed enum serialized as
//! `{"action": …, "commandId": …, …fields}`. Inbound lines are decoded at
//! the boundary into [`WorkerMessage`]:
//!
//! | Shape                                   | Maps to                       |
//! |-----------------------------------------|-------------------------------|
//! | `{"type":"PROGRESS","batchId",…}`       | [`WorkerMessage::Progress`]   |
//! | `{"commandId":…,"status",…}`            | [`WorkerMessage::Reply`]      |
//! | object with neither                     | [`WorkerMessage::Unrouted`]   |
//! | `{"type": <anything else>}`             | [`AppError::Protocol`]        |
//! | not a JSON object                       | [`AppError::Protocol`]        |
//!
//! Statuses are open-ended: the lifecycle statuses have dedicated
//! variants and everything else (`OTP_REQUIRED`, `LOGIN_SUCCESS`, …) is
//! kept verbatim in [`WorkerStatus::Other`].

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// Progress message `type` tag.
const PROGRESS_TYPE: &str = "PROGRESS";

// ── Outbound ──────────────────────────────────────────────────────────────────

/// A command the bridge can send to the worker.
///
/// The `commandId` is not part of the enum; it is injected at send time by
/// [`crate::worker::writer::encode_command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Liveness check.
    Ping,
    /// Greeting round-trip used by diagnostics.
    Hello,
    /// Worker-side sleep used to exercise long-running commands.
    SimulateWork,
    /// Start a portal login.
    #[serde(rename_all = "camelCase")]
    Login {
        /// Account email.
        email: String,
        /// Account password.
        password: String,
        /// Record the login is performed for, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        record_id: Option<String>,
    },
    /// Submit the one-time code requested by a previous login.
    #[serde(rename_all = "camelCase")]
    Otp {
        /// The one-time code.
        otp: String,
        /// Record the login is performed for, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        record_id: Option<String>,
    },
    /// Start processing a batch in the background.
    #[serde(rename = "processTaqeemBatch", rename_all = "camelCase")]
    ProcessBatch {
        /// Batch identifier.
        batch_id: String,
        /// Items (report ids) in the batch.
        report_ids: Vec<String>,
        /// Ask the worker to emit progress messages.
        socket_mode: bool,
    },
    /// Pause a running batch.
    #[serde(rename_all = "camelCase")]
    Pause {
        /// Batch identifier.
        batch_id: String,
    },
    /// Resume a paused batch.
    #[serde(rename_all = "camelCase")]
    Resume {
        /// Batch identifier.
        batch_id: String,
    },
    /// Stop a batch.
    #[serde(rename_all = "camelCase")]
    Stop {
        /// Batch identifier.
        batch_id: String,
    },
    /// Close the worker's browser and exit.
    Close,
}

impl WorkerCommand {
    /// Wire name of the command, for logging.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Hello => "hello",
            Self::SimulateWork => "simulate_work",
            Self::Login { .. } => "login",
            Self::Otp { .. } => "otp",
            Self::ProcessBatch { .. } => "processTaqeemBatch",
            Self::Pause { .. } => "pause",
            Self::Resume { .. } => "resume",
            Self::Stop { .. } => "stop",
            Self::Close => "close",
        }
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Status carried by every inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkerStatus {
    /// Command accepted; completion follows on the progress channel.
    Acknowledged,
    /// Batch processing began (progress channel).
    Started,
    /// Command finished successfully.
    Success,
    /// Batch stopped.
    Stopped,
    /// Command or batch failed.
    Failed,
    /// Batch paused.
    Paused,
    /// Batch resumed.
    Resumed,
    /// Batch completed (progress channel).
    Completed,
    /// Any domain-specific status, kept verbatim.
    Other(String),
}

impl WorkerStatus {
    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Acknowledged => "ACKNOWLEDGED",
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
            Self::Paused => "PAUSED",
            Self::Resumed => "RESUMED",
            Self::Completed => "COMPLETED",
            Self::Other(other) => other,
        }
    }

    /// Terminal status on the progress channel.
    #[must_use]
    pub fn is_terminal_progress(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    /// Terminal status on the reply channel.
    #[must_use]
    pub fn is_terminal_reply(&self) -> bool {
        matches!(self, Self::Success | Self::Stopped | Self::Failed)
    }
}

impl From<String> for WorkerStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "ACKNOWLEDGED" => Self::Acknowledged,
            "STARTED" => Self::Started,
            "SUCCESS" => Self::Success,
            "STOPPED" => Self::Stopped,
            "FAILED" => Self::Failed,
            "PAUSED" => Self::Paused,
            "RESUMED" => Self::Resumed,
            "COMPLETED" => Self::Completed,
            _ => Self::Other(raw),
        }
    }
}

impl From<WorkerStatus> for String {
    fn from(status: WorkerStatus) -> Self {
        match status {
            WorkerStatus::Other(raw) => raw,
            known => known.as_str().to_owned(),
        }
    }
}

impl Display for WorkerStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

/// Asynchronous batch progress reported by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Batch the update belongs to.
    pub batch_id: String,
    /// Batch status at the time of the update.
    pub status: WorkerStatus,
    /// Human-readable message, if any.
    pub message: Option<String>,
    /// Count of records that failed, reported on completion.
    pub failed_records: Option<u64>,
    /// The complete message as received, for verbatim fan-out.
    pub raw: Value,
}

/// Direct reply to one command.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReply {
    /// Id of the command this reply answers.
    pub command_id: u64,
    /// Reply status.
    pub status: WorkerStatus,
    /// Batch the reply refers to, if any.
    pub batch_id: Option<String>,
    /// Human-readable message, if any.
    pub message: Option<String>,
    /// Worker-supplied error text for `FAILED` replies.
    pub error: Option<String>,
    /// The complete reply as received.
    pub raw: Value,
}

impl WorkerReply {
    /// Whether the worker reported a domain failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == WorkerStatus::Failed
    }

    /// Best available failure text: `error`, then `message`, then `fallback`.
    #[must_use]
    pub fn failure_text(&self, fallback: &str) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| fallback.to_owned())
    }
}

/// One framed, decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    /// Progress channel message.
    Progress(ProgressUpdate),
    /// Reply channel message.
    Reply(WorkerReply),
    /// Well-formed object tied to neither a batch nor a command (e.g. the
    /// worker's own `FATAL` report).
    Unrouted {
        /// Status, when present.
        status: Option<WorkerStatus>,
        /// The complete message as received.
        raw: Value,
    },
}

/// Parse a single framed line into a [`WorkerMessage`].
///
/// # Return value
///
/// - `Ok(Some(message))`: a well-formed object.
/// - `Ok(None)`: the line is blank.
///
/// # Errors
///
/// - [`AppError::Protocol`]`("malformed json: …")`: not valid JSON.
/// - [`AppError::Protocol`]`("expected a json object …")`: valid JSON but not an object.
/// - [`AppError::Protocol`]`("unknown message type: …")`: `type` other than `PROGRESS`.
/// - [`AppError::Protocol`]`("missing required field: …")`: progress without
///   `batchId`/`status`, or a reply without `status`.
pub fn parse_inbound_line(line: &str) -> Result<Option<WorkerMessage>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

    let Value::Object(map) = &value else {
        return Err(AppError::Protocol(format!(
            "expected a json object, got: {trimmed}"
        )));
    };

    if let Some(kind) = map.get("type") {
        return match kind.as_str() {
            Some(PROGRESS_TYPE) => parse_progress(map, &value).map(Some),
            _ => Err(AppError::Protocol(format!("unknown message type: {kind}"))),
        };
    }

    if let Some(raw_id) = map.get("commandId").filter(|id| !id.is_null()) {
        let command_id = raw_id.as_u64().ok_or_else(|| {
            AppError::Protocol(format!("commandId must be a non-negative integer, got {raw_id}"))
        })?;
        return parse_reply(command_id, map, &value).map(Some);
    }

    Ok(Some(WorkerMessage::Unrouted {
        status: map.get("status").and_then(Value::as_str).map(|s| WorkerStatus::from(s.to_owned())),
        raw: value.clone(),
    }))
}

fn parse_progress(map: &Map<String, Value>, raw: &Value) -> Result<WorkerMessage> {
    let batch_id = batch_id_of(map).ok_or_else(|| {
        AppError::Protocol("missing required field: `batchId` in progress message".into())
    })?;
    let status = status_of(map).ok_or_else(|| {
        AppError::Protocol("missing required field: `status` in progress message".into())
    })?;

    Ok(WorkerMessage::Progress(ProgressUpdate {
        batch_id,
        status,
        message: string_field(map, "message"),
        failed_records: map.get("failed_records").and_then(Value::as_u64),
        raw: raw.clone(),
    }))
}

fn parse_reply(command_id: u64, map: &Map<String, Value>, raw: &Value) -> Result<WorkerMessage> {
    let status = status_of(map).ok_or_else(|| {
        AppError::Protocol(format!(
            "missing required field: `status` in reply to command {command_id}"
        ))
    })?;

    Ok(WorkerMessage::Reply(WorkerReply {
        command_id,
        status,
        batch_id: batch_id_of(map),
        message: string_field(map, "message"),
        error: string_field(map, "error"),
        raw: raw.clone(),
    }))
}

/// Batch ids arrive as strings, but numeric ids are accepted and normalized.
fn batch_id_of(map: &Map<String, Value>) -> Option<String> {
    match map.get("batchId")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn status_of(map: &Map<String, Value>) -> Option<WorkerStatus> {
    map.get("status")
        .and_then(Value::as_str)
        .map(|s| WorkerStatus::from(s.to_owned()))
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_owned)
}
