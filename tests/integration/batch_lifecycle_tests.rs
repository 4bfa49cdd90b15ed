//! Integration tests for batch lifecycle verbs against the mock worker.
//!
//! Validates:
//! - start → ACK → progress → COMPLETED retires the session and the room
//!   sees `batch_status_update` before `processing_complete`
//! - a second start for an active batch is `AlreadyActive`; stop then start
//!   succeeds
//! - pause / resume update the visible session state
//! - worker-side FAILED replies reach the caller only
//! - a start answered directly with SUCCESS retires the session at once
//! - a worker exit rejects the in-flight verb and leaves sessions registered

use std::time::Duration;

use taqeem_bridge::batch::registry::BatchState;
use taqeem_bridge::worker::protocol::WorkerStatus;
use taqeem_bridge::AppError;

use super::test_helpers::{eventually, recorded_service};

const CLIENT: &str = "client-1";

fn ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("r{i}")).collect()
}

#[tokio::test]
async fn batch_runs_to_completion() {
    let (service, transport) = recorded_service(&[("MOCK_WORKER_STEPS", "3")]);

    let ack = service
        .lifecycle()
        .start(CLIENT, Some("u1".into()), "b1", ids(2))
        .await
        .expect("start");
    assert_eq!(ack.status, WorkerStatus::Acknowledged);

    let registry = service.registry().clone();
    assert!(
        eventually(Duration::from_secs(5), || !registry.contains("b1")).await,
        "session retired on completion"
    );

    assert_eq!(transport.client_events(CLIENT), vec!["processing_started"]);
    assert_eq!(
        transport.joins.lock().unwrap().as_slice(),
        &[(CLIENT.to_owned(), "batch_b1".to_owned())]
    );

    let room = transport.room_events("batch_b1");
    assert_eq!(room.first().map(String::as_str), Some("batch_status_update"));
    assert_eq!(
        room.iter().filter(|e| *e == "processing_complete").count(),
        1,
        "terminal event exactly once: {room:?}"
    );
    assert!(room.iter().filter(|e| *e == "processing_progress").count() >= 2);

    // The final SUCCESS reply arrives after COMPLETED and must not add events.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        transport
            .room_events("batch_b1")
            .iter()
            .filter(|e| *e == "processing_complete")
            .count(),
        1
    );

    service.shutdown().await;
}

#[tokio::test]
async fn start_answered_with_success_retires_the_session() {
    let (service, transport) = recorded_service(&[("MOCK_WORKER_SYNC_BATCH", "1")]);
    let lifecycle = service.lifecycle();

    let reply = lifecycle
        .start(CLIENT, None, "b1", ids(2))
        .await
        .expect("start");

    assert_eq!(reply.status, WorkerStatus::Success);
    assert!(!service.registry().contains("b1"));
    assert_eq!(
        transport.room_events("batch_b1"),
        vec!["batch_status_update", "processing_complete"]
    );
    assert_eq!(transport.client_events(CLIENT), vec!["processing_started"]);

    // The id is free again.
    let again = lifecycle
        .start(CLIENT, None, "b1", ids(1))
        .await
        .expect("second start");
    assert_eq!(again.status, WorkerStatus::Success);
    assert_eq!(
        transport
            .room_events("batch_b1")
            .iter()
            .filter(|e| *e == "processing_complete")
            .count(),
        2
    );

    service.shutdown().await;
}

#[tokio::test]
async fn duplicate_start_is_rejected_until_stopped() {
    let (service, transport) = recorded_service(&[("MOCK_WORKER_STEPS", "500")]);
    let lifecycle = service.lifecycle();

    lifecycle
        .start(CLIENT, None, "b1", ids(3))
        .await
        .expect("first start");

    let err = lifecycle
        .start("client-2", None, "b1", ids(3))
        .await
        .expect_err("duplicate start");
    assert!(matches!(err, AppError::AlreadyActive(_)), "unexpected: {err}");
    assert_eq!(transport.client_events("client-2"), vec!["processing_error"]);

    let stopped = lifecycle.stop(CLIENT, "b1").await.expect("stop");
    assert_eq!(stopped.status, WorkerStatus::Stopped);
    assert!(!service.registry().contains("b1"));

    let restarted = lifecycle
        .start(CLIENT, None, "b1", ids(3))
        .await
        .expect("start after stop");
    assert_eq!(restarted.status, WorkerStatus::Acknowledged);

    let stops = transport
        .room_events("batch_b1")
        .iter()
        .filter(|e| *e == "processing_stopped")
        .count();
    assert_eq!(stops, 1);

    lifecycle.stop(CLIENT, "b1").await.expect("cleanup stop");
    service.shutdown().await;
}

#[tokio::test]
async fn pause_and_resume_update_session_state() {
    let (service, transport) = recorded_service(&[("MOCK_WORKER_STEPS", "500")]);
    let lifecycle = service.lifecycle();
    lifecycle.start(CLIENT, None, "b7", ids(1)).await.expect("start");

    let paused = lifecycle.pause(CLIENT, "b7").await.expect("pause");
    assert_eq!(paused.status, WorkerStatus::Paused);
    assert_eq!(service.registry().get("b7").expect("session").state, BatchState::Paused);

    let resumed = lifecycle.resume(CLIENT, "b7").await.expect("resume");
    assert_eq!(resumed.status, WorkerStatus::Resumed);
    assert_eq!(service.registry().get("b7").expect("session").state, BatchState::Started);

    let room = transport.room_events("batch_b7");
    assert!(room.contains(&"processing_paused".to_owned()));
    assert!(room.contains(&"processing_resumed".to_owned()));

    lifecycle.stop(CLIENT, "b7").await.expect("stop");
    service.shutdown().await;
}

#[tokio::test]
async fn control_for_unknown_batch_reports_to_caller_only() {
    let (service, transport) = recorded_service(&[]);

    let reply = service
        .lifecycle()
        .pause(CLIENT, "ghost")
        .await
        .expect("forwarded");

    assert!(reply.is_failed());
    assert_eq!(transport.client_events(CLIENT), vec!["processing_error"]);
    assert!(transport.room_events("batch_ghost").is_empty());

    service.shutdown().await;
}

#[tokio::test]
async fn refused_start_rolls_back_the_session() {
    let (service, transport) = recorded_service(&[]);

    let reply = service
        .lifecycle()
        .start(CLIENT, None, "empty", Vec::new())
        .await
        .expect("worker answered");

    assert!(reply.is_failed());
    assert!(!service.registry().contains("empty"));
    assert_eq!(
        transport.client_events(CLIENT),
        vec!["processing_started", "processing_error"]
    );
    let payload = transport
        .last_client_payload(CLIENT, "processing_error")
        .expect("error payload");
    assert_eq!(payload["error"], "batch has no reports to process");

    service.shutdown().await;
}

#[tokio::test]
async fn empty_batch_id_is_rejected_before_any_side_effect() {
    let (service, transport) = recorded_service(&[]);

    let err = service
        .lifecycle()
        .start(CLIENT, None, "", ids(1))
        .await
        .expect_err("empty id");

    assert!(matches!(err, AppError::Protocol(_)));
    assert!(transport.joins.lock().unwrap().is_empty());
    assert!(!service.process().is_ready().await, "nothing was sent");
}

#[tokio::test]
async fn worker_exit_keeps_sessions_registered() {
    let (service, _) = recorded_service(&[
        ("MOCK_WORKER_STEPS", "500"),
        ("MOCK_WORKER_CRASH_ON", "pause"),
    ]);
    let lifecycle = service.lifecycle();
    lifecycle.start(CLIENT, None, "b1", ids(1)).await.expect("start");

    let err = lifecycle.pause(CLIENT, "b1").await.expect_err("worker crashes");

    assert!(matches!(err, AppError::WorkerExited(Some(3))), "unexpected: {err}");
    assert!(service.registry().contains("b1"));

    let swept = service.sweep_sessions();
    assert_eq!(swept.len(), 1);
    assert!(service.registry().is_empty());
}
