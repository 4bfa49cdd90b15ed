//! Unit tests for the batch session registry.

use taqeem_bridge::batch::registry::{BatchRegistry, BatchSession, BatchState};
use taqeem_bridge::AppError;

fn session(batch_id: &str) -> BatchSession {
    BatchSession::new(batch_id.into(), vec!["r1".into(), "r2".into()], Some("u1".into()))
}

#[test]
fn new_session_starts_in_started_state_with_room() {
    let s = session("b1");
    assert_eq!(s.room, "batch_b1");
    assert_eq!(s.state, BatchState::Started);
    assert_eq!(s.owner.as_deref(), Some("u1"));
}

#[test]
fn duplicate_create_is_already_active() {
    let registry = BatchRegistry::new();
    registry.create(session("b1")).expect("first create");

    let err = registry.create(session("b1")).expect_err("duplicate");

    assert!(matches!(err, AppError::AlreadyActive(_)));
    assert_eq!(registry.len(), 1);
}

#[test]
fn get_missing_is_not_found() {
    let registry = BatchRegistry::new();
    assert!(matches!(registry.get("nope"), Err(AppError::NotFound(_))));
}

#[test]
fn remove_is_idempotent() {
    let registry = BatchRegistry::new();
    registry.create(session("b1")).expect("create");

    assert!(registry.remove("b1").is_some());
    assert!(registry.remove("b1").is_none());
    assert!(!registry.contains("b1"));
    assert!(registry.is_empty());
}

#[test]
fn create_after_remove_succeeds() {
    let registry = BatchRegistry::new();
    registry.create(session("b1")).expect("create");
    registry.remove("b1");

    registry.create(session("b1")).expect("re-create");
}

#[test]
fn set_state_updates_visible_state() {
    let registry = BatchRegistry::new();
    registry.create(session("b1")).expect("create");

    assert!(registry.set_state("b1", BatchState::Paused));
    assert_eq!(registry.get("b1").expect("get").state, BatchState::Paused);
    assert!(!registry.set_state("missing", BatchState::Paused));
}

#[test]
fn sweep_empties_the_registry() {
    let registry = BatchRegistry::new();
    registry.create(session("b1")).expect("b1");
    registry.create(session("b2")).expect("b2");

    let listed = registry.list_all();
    let swept = registry.sweep();

    assert_eq!(listed.len(), 2);
    assert_eq!(swept.len(), 2);
    assert!(registry.is_empty());
}

#[test]
fn session_serializes_with_camel_case_keys() {
    let value = serde_json::to_value(session("b1")).expect("serialize");
    assert_eq!(value["batchId"], "b1");
    assert_eq!(value["itemIds"][1], "r2");
    assert_eq!(value["state"], "STARTED");
}
