//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering every bridge failure mode.
///
/// Transport-level failures (`Spawn`, `Write`, `WorkerExited`) reject the
/// affected command futures. A worker reply with status `FAILED` is *not*
/// an error: it resolves the future normally and the caller interprets it.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The worker executable could not be launched.
    Spawn(String),
    /// Writing a command to the worker's stdin failed, or the worker is not ready.
    Write(String),
    /// The worker process exited while the command was outstanding.
    WorkerExited(Option<i32>),
    /// An inbound line or an inbound request could not be understood.
    Protocol(String),
    /// A batch session already exists for the requested batch id.
    AlreadyActive(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Room transport or HTTP serving failure.
    Transport(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Write(msg) => write!(f, "write: {msg}"),
            Self::WorkerExited(Some(code)) => write!(f, "worker exited with code {code}"),
            Self::WorkerExited(None) => write!(f, "worker exited without an exit code"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::AlreadyActive(msg) => write!(f, "already active: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
