//! External worker bridge.
//!
//! One long-lived worker process is driven over its standard streams with
//! newline-delimited JSON. Commands from many callers are multiplexed onto
//! stdin, each tagged with a `commandId`; stdout carries both direct
//! replies and asynchronous batch progress.
//!
//! Submodules:
//! - `codec`: line framing over the stdout byte stream.
//! - `protocol`: outbound commands and the decoded inbound message union.
//! - `reader`: read loop that frames, decodes, and dispatches stdout.
//! - `writer`: command serialization onto stdin.
//! - `spawner`: process launch with piped stdio.
//! - `process`: the process state machine and exit handling.
//! - `correlator`: command id allocation and reply correlation.

pub mod codec;
pub mod correlator;
pub mod process;
pub mod protocol;
pub mod reader;
pub mod spawner;
pub mod writer;
