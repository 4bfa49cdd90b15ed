//! In-process room hub.
//!
//! Each connected client gets a bounded queue drained by its socket task.
//! Delivery never blocks: when a queue is full or its receiver is gone the
//! event is dropped for that client and logged.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::transport::{ClientId, OutboundEvent, RoomTransport};

/// Default per-client queue depth.
pub const DEFAULT_CLIENT_QUEUE: usize = 256;

#[derive(Default)]
struct HubState {
    clients: HashMap<ClientId, mpsc::Sender<OutboundEvent>>,
    rooms: HashMap<String, HashSet<ClientId>>,
}

/// Registry of connected clients and the rooms they joined.
pub struct RoomHub {
    state: Mutex<HubState>,
    capacity: usize,
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomHub {
    /// Create a hub with the default per-client queue depth.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CLIENT_QUEUE)
    }

    /// Create a hub whose per-client queues hold `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            capacity: capacity.max(1),
        }
    }

    /// Register a new client and return its id and event queue.
    pub fn connect(&self) -> (ClientId, mpsc::Receiver<OutboundEvent>) {
        let client = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.capacity);
        self.lock().clients.insert(client.clone(), tx);
        debug!(client = %client, "client connected");
        (client, rx)
    }

    /// Forget `client` and remove it from every room.
    pub fn disconnect(&self, client: &str) {
        let mut state = self.lock();
        state.clients.remove(client);
        state.rooms.retain(|_, members| {
            members.remove(client);
            !members.is_empty()
        });
        debug!(client, "client disconnected");
    }

    /// Clients currently in `room`.
    #[must_use]
    pub fn room_members(&self, room: &str) -> Vec<ClientId> {
        self.lock()
            .rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn deliver(client: &str, tx: &mpsc::Sender<OutboundEvent>, event: OutboundEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!(client, event = %event.event, "client queue full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(event)) => {
            debug!(client, event = %event.event, "client gone, dropping event");
        }
    }
}

impl RoomTransport for RoomHub {
    fn join_room(&self, client: &str, room: &str) {
        let mut state = self.lock();
        if !state.clients.contains_key(client) {
            debug!(client, room, "join for unknown client, ignoring");
            return;
        }
        state
            .rooms
            .entry(room.to_owned())
            .or_default()
            .insert(client.to_owned());
    }

    fn broadcast(&self, room: &str, event: &str, payload: Value) {
        let state = self.lock();
        let Some(members) = state.rooms.get(room) else {
            debug!(room, event, "broadcast to empty room");
            return;
        };
        for member in members {
            if let Some(tx) = state.clients.get(member) {
                deliver(
                    member,
                    tx,
                    OutboundEvent {
                        event: event.to_owned(),
                        data: payload.clone(),
                    },
                );
            }
        }
    }

    fn emit(&self, client: &str, event: &str, payload: Value) {
        let state = self.lock();
        match state.clients.get(client) {
            Some(tx) => deliver(
                client,
                tx,
                OutboundEvent {
                    event: event.to_owned(),
                    data: payload,
                },
            ),
            None => debug!(client, event, "emit to unknown client, dropping"),
        }
    }
}
