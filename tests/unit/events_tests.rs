//! Unit tests for batch event names and payloads.

use serde_json::json;

use taqeem_bridge::batch::events::{
    error_payload, room_key, started_payload, status_update_payload, BatchEvent, TerminalOutcome,
};
use taqeem_bridge::worker::protocol::{ProgressUpdate, WorkerReply, WorkerStatus};

#[test]
fn room_key_prefixes_batch_id() {
    assert_eq!(room_key("42"), "batch_42");
}

#[test]
fn event_names_match_client_subscriptions() {
    assert_eq!(BatchEvent::ProcessingStarted.name(), "processing_started");
    assert_eq!(BatchEvent::BatchStatusUpdate.name(), "batch_status_update");
    assert_eq!(BatchEvent::ProcessingStopped.name(), "processing_stopped");
}

#[test]
fn start_payloads_carry_totals() {
    let started = started_payload("b1", 3);
    assert_eq!(started["status"], "STARTED");
    assert_eq!(started["totalReports"], 3);

    let update = status_update_payload("b1", 3);
    assert_eq!(update["status"], "PROCESSING_STARTED");
    assert!(update["timestamp"].as_str().is_some_and(|t| t.ends_with('Z')));
}

#[test]
fn error_payload_is_failed() {
    let payload = error_payload("b1", "boom");
    assert_eq!(payload["status"], "FAILED");
    assert_eq!(payload["error"], "boom");
}

#[test]
fn reply_outcomes_map_to_room_events() {
    let reply = |status: WorkerStatus| WorkerReply {
        command_id: 0,
        status,
        batch_id: Some("b1".into()),
        message: Some("msg".into()),
        error: None,
        raw: json!({}),
    };

    let done = TerminalOutcome::from_reply(&reply(WorkerStatus::Success)).expect("terminal");
    assert_eq!(done.event(), BatchEvent::ProcessingComplete);

    let stopped = TerminalOutcome::from_reply(&reply(WorkerStatus::Stopped)).expect("terminal");
    assert_eq!(stopped.event(), BatchEvent::ProcessingStopped);
    assert_eq!(stopped.payload("b1")["status"], "STOPPED");

    let failed = TerminalOutcome::from_reply(&reply(WorkerStatus::Failed)).expect("terminal");
    assert_eq!(failed.payload("b1")["error"], "msg");

    assert!(TerminalOutcome::from_reply(&reply(WorkerStatus::Acknowledged)).is_none());
}

#[test]
fn progress_outcomes_follow_terminal_statuses() {
    let update = |status: WorkerStatus| ProgressUpdate {
        batch_id: "b1".into(),
        status,
        message: None,
        failed_records: Some(2),
        raw: json!({ "error": "portal down" }),
    };

    let done = TerminalOutcome::from_progress(&update(WorkerStatus::Completed)).expect("terminal");
    assert_eq!(done.payload("b1")["failedRecords"], 2);

    let failed = TerminalOutcome::from_progress(&update(WorkerStatus::Failed)).expect("terminal");
    assert_eq!(failed.payload("b1")["error"], "portal down");

    // SUCCESS ends a batch only on the reply channel.
    assert!(TerminalOutcome::from_progress(&update(WorkerStatus::Success)).is_none());
    assert!(TerminalOutcome::from_progress(&update(WorkerStatus::Paused)).is_none());
}
