//! Integration tests for the worker process manager and correlator
//! against the mock worker.
//!
//! Validates:
//! - first command spawns the worker and resolves with id 0
//! - replies resolve their own issuers regardless of order
//! - a worker exit rejects in-flight commands and the next command respawns
//! - an unspawnable executable fails with `AppError::Spawn`
//! - shutdown closes the worker and is idempotent
//! - a handler registered with `on_line` sees output until it is dropped

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taqeem_bridge::worker::process::{WorkerHandler, WorkerProcess, WorkerState};
use taqeem_bridge::worker::protocol::{WorkerCommand, WorkerMessage, WorkerStatus};
use taqeem_bridge::{AppError, WorkerService};

use super::test_helpers::{eventually, mock_worker_config, recorded_service, RecordingTransport};

#[tokio::test]
async fn ping_spawns_worker_and_resolves_first_id() {
    let (service, _) = recorded_service(&[]);
    assert_eq!(service.process().state().await, WorkerState::NotStarted);

    let reply = service.ping().await.expect("ping");

    assert_eq!(reply.command_id, 0);
    assert_eq!(reply.status, WorkerStatus::Success);
    assert!(service.process().is_ready().await);

    service.shutdown().await;
}

#[tokio::test]
async fn concurrent_commands_resolve_out_of_order() {
    let (service, _) = recorded_service(&[]);
    service
        .process()
        .ensure_running()
        .await
        .expect("spawn mock worker");

    let slow = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.simulate_work().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let fast = service.hello().await.expect("hello");

    assert_eq!(fast.status, WorkerStatus::Success);
    assert!(!slow.is_finished(), "simulate_work is still sleeping");

    let slow = slow.await.expect("join").expect("simulate_work");
    assert_eq!(slow.status, WorkerStatus::Success);
    assert_ne!(slow.command_id, fast.command_id);

    service.shutdown().await;
}

#[tokio::test]
async fn worker_exit_rejects_in_flight_commands_and_respawns() {
    let (service, _) = recorded_service(&[("MOCK_WORKER_CRASH_ON", "simulate_work")]);

    let pid_before = {
        service.ping().await.expect("first ping");
        service.process().pid().await
    };

    let err = service.simulate_work().await.expect_err("worker crashes");
    assert!(
        matches!(err, AppError::WorkerExited(Some(3))),
        "unexpected error: {err}"
    );
    assert_eq!(service.status().await.pending_commands, 0);
    assert_eq!(
        service.process().state().await,
        WorkerState::Exited { exit_code: Some(3) }
    );

    let reply = service.ping().await.expect("respawned ping");
    assert_eq!(reply.status, WorkerStatus::Success);
    assert_ne!(service.process().pid().await, pid_before);

    service.shutdown().await;
}

#[tokio::test]
async fn unspawnable_executable_is_a_spawn_error() {
    let mut config = mock_worker_config(&[]);
    config.executable = PathBuf::from("/nonexistent/taqeem-worker");
    let service = WorkerService::new(config, Arc::new(RecordingTransport::default()));

    let err = service.ping().await.expect_err("spawn fails");

    assert!(matches!(err, AppError::Spawn(_)), "unexpected error: {err}");
    assert_eq!(service.process().state().await, WorkerState::NotStarted);
    assert_eq!(service.status().await.pending_commands, 0);
}

#[tokio::test]
async fn shutdown_retires_worker_and_is_idempotent() {
    let (service, _) = recorded_service(&[]);
    service.ping().await.expect("ping");

    service.shutdown().await;
    let state = service.process().state().await;
    assert!(matches!(state, WorkerState::Exited { .. }), "state: {state}");
    assert!(service.process().pid().await.is_none());

    service.shutdown().await;
    let status = service.status().await;
    assert!(!status.ready);
    assert_eq!(status.state, "exited");
}

#[tokio::test]
async fn restart_replaces_the_worker() {
    let (service, _) = recorded_service(&[]);
    service.ping().await.expect("ping");
    let before = service.process().pid().await;

    service.restart().await.expect("restart");

    assert!(service.process().is_ready().await);
    assert_ne!(service.process().pid().await, before);
    service.ping().await.expect("ping after restart");

    service.shutdown().await;
}

#[tokio::test]
async fn login_flow_reports_domain_statuses() {
    let (service, _) = recorded_service(&[]);

    let login = service
        .login("a@b.c".into(), "secret".into(), None)
        .await
        .expect("login");
    assert_eq!(login.status, WorkerStatus::Other("OTP_REQUIRED".into()));

    let otp = service.submit_otp("123456".into(), None).await.expect("otp");
    assert_eq!(otp.status, WorkerStatus::Success);

    let denied = service
        .login("a@b.c".into(), "wrong".into(), Some("rec-1".into()))
        .await
        .expect("login");
    assert_eq!(denied.status, WorkerStatus::Other("NOT_FOUND".into()));

    service.shutdown().await;
}

#[derive(Default)]
struct CapturingHandler {
    messages: Mutex<Vec<WorkerMessage>>,
    exits: Mutex<Vec<Option<i32>>>,
}

impl WorkerHandler for CapturingHandler {
    fn on_message(&self, message: WorkerMessage) {
        self.messages.lock().unwrap().push(message);
    }

    fn on_exit(&self, exit_code: Option<i32>) {
        self.exits.lock().unwrap().push(exit_code);
    }
}

#[tokio::test]
async fn on_line_handler_receives_output_until_dropped() {
    let process = WorkerProcess::new(mock_worker_config(&[]));
    let handler = Arc::new(CapturingHandler::default());
    process.on_line(&handler);

    process.ensure_running().await.expect("spawn mock worker");
    process.send(9, &WorkerCommand::Ping).await.expect("send ping");

    let seen = Arc::clone(&handler);
    assert!(
        eventually(Duration::from_secs(5), || !seen.messages.lock().unwrap().is_empty()).await,
        "handler saw the reply"
    );
    let first = handler.messages.lock().unwrap()[0].clone();
    assert!(
        matches!(first, WorkerMessage::Reply(ref r) if r.command_id == 9 && r.status == WorkerStatus::Success),
        "unexpected message: {first:?}"
    );

    // Only a weak reference is held: once dropped, output goes nowhere.
    let weak = Arc::downgrade(&handler);
    drop(seen);
    drop(handler);
    assert!(weak.upgrade().is_none());
    process.send(10, &WorkerCommand::Ping).await.expect("send after drop");

    process.shutdown().await;
    assert!(matches!(process.state().await, WorkerState::Exited { .. }));
}
