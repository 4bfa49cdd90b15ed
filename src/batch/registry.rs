//! Batch session registry.
//!
//! The authoritative record of which batch ids have an active session.
//! Lifecycle verbs and the progress router consult it directly; it is not
//! a cache of worker state.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::batch::events::room_key;
use crate::{AppError, Result};

/// Visible state of an active batch.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    /// Processing (or about to process).
    Started,
    /// Paused by a client.
    Paused,
}

/// One active batch.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSession {
    /// Externally supplied batch id.
    pub batch_id: String,
    /// Room observers of this batch join.
    pub room: String,
    /// Items (report ids) submitted with the batch.
    pub item_ids: Vec<String>,
    /// When the start request was accepted.
    pub started_at: DateTime<Utc>,
    /// Identity of the user who started the batch, if known.
    pub owner: Option<String>,
    /// Current visible state.
    pub state: BatchState,
}

impl BatchSession {
    /// Construct a freshly started session.
    #[must_use]
    pub fn new(batch_id: String, item_ids: Vec<String>, owner: Option<String>) -> Self {
        Self {
            room: room_key(&batch_id),
            batch_id,
            item_ids,
            started_at: Utc::now(),
            owner,
            state: BatchState::Started,
        }
    }
}

/// Registry of active batch sessions keyed by batch id.
#[derive(Debug, Default)]
pub struct BatchRegistry {
    sessions: Mutex<HashMap<String, BatchSession>>,
}

impl BatchRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyActive` if the batch id already has a session.
    pub fn create(&self, session: BatchSession) -> Result<()> {
        let mut sessions = self.sessions();
        if sessions.contains_key(&session.batch_id) {
            return Err(AppError::AlreadyActive(format!(
                "batch {} is already being processed",
                session.batch_id
            )));
        }
        debug!(batch_id = %session.batch_id, "batch session created");
        sessions.insert(session.batch_id.clone(), session);
        Ok(())
    }

    /// Snapshot of the session for `batch_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no session exists.
    pub fn get(&self, batch_id: &str) -> Result<BatchSession> {
        self.sessions()
            .get(batch_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no active session for batch {batch_id}")))
    }

    /// Whether `batch_id` has a session.
    #[must_use]
    pub fn contains(&self, batch_id: &str) -> bool {
        self.sessions().contains_key(batch_id)
    }

    /// Remove and return the session for `batch_id`; `None` if absent.
    pub fn remove(&self, batch_id: &str) -> Option<BatchSession> {
        let removed = self.sessions().remove(batch_id);
        if removed.is_some() {
            debug!(batch_id, "batch session removed");
        }
        removed
    }

    /// Update the visible state of a session. Returns `false` if absent.
    pub fn set_state(&self, batch_id: &str, state: BatchState) -> bool {
        match self.sessions().get_mut(batch_id) {
            Some(session) => {
                session.state = state;
                true
            }
            None => false,
        }
    }

    /// Snapshot of every session, oldest first.
    #[must_use]
    pub fn list_all(&self) -> Vec<BatchSession> {
        let mut all: Vec<BatchSession> = self.sessions().values().cloned().collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        all
    }

    /// Remove every session and return them, oldest first.
    pub fn sweep(&self) -> Vec<BatchSession> {
        let mut swept: Vec<BatchSession> = self.sessions().drain().map(|(_, s)| s).collect();
        swept.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        swept
    }

    /// Number of active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    /// Whether no session is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, BatchSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
