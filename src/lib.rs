#![forbid(unsafe_code)]

//! Bridge between HTTP/WebSocket clients and a long-lived automation
//! worker driven over newline-delimited JSON on its standard streams.

pub mod batch;
pub mod config;
pub mod errors;
pub mod http;
pub mod service;
pub mod transport;
pub mod worker;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use service::WorkerService;
