//! Client-facing event transport.
//!
//! The batch layer only needs three operations: join a client to a room,
//! broadcast to a room, and emit to one client. [`RoomTransport`] is that
//! seam; [`rooms::RoomHub`] is the in-process implementation backing the
//! WebSocket endpoint in [`ws`].
//!
//! All three operations are synchronous and non-blocking so they can be
//! called from the worker read loop.

pub mod rooms;
pub mod ws;

use serde::Serialize;
use serde_json::Value;

/// Opaque identity of one connected client.
pub type ClientId = String;

/// Room-based publish interface used by the batch layer.
pub trait RoomTransport: Send + Sync {
    /// Add `client` to `room`. Joining twice is a no-op.
    fn join_room(&self, client: &str, room: &str);

    /// Deliver `event` to every client currently in `room`.
    fn broadcast(&self, room: &str, event: &str, payload: Value);

    /// Deliver `event` to `client` only.
    fn emit(&self, client: &str, event: &str, payload: Value);
}

/// One frame sent to a client: `{"event": …, "data": …}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundEvent {
    /// Event name.
    pub event: String,
    /// Event payload.
    pub data: Value,
}
