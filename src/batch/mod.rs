//! Batch sessions and their observers.
//!
//! - `registry`: active batch sessions keyed by batch id.
//! - `events`: event names, payload builders, and room keys.
//! - `router`: consumer of worker output; fans progress out to rooms.
//! - `lifecycle`: start / pause / resume / stop against the worker.

pub mod events;
pub mod lifecycle;
pub mod registry;
pub mod router;
