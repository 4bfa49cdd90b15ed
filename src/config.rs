//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// How to launch and retire the external automation worker.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Interpreter or binary to execute (e.g. `.venv/bin/python`).
    pub executable: PathBuf,
    /// Worker script passed as the first argument; its directory becomes the
    /// child's working directory. Omitted for native worker binaries.
    #[serde(default)]
    pub script: Option<PathBuf>,
    /// Extra arguments appended after the script path.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables injected into the worker.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Bounded wait for the worker to answer the `close` command.
    #[serde(default = "default_close_timeout_seconds")]
    pub close_timeout_seconds: u64,
    /// Bounded wait for a natural exit before the worker is force-killed.
    #[serde(default = "default_exit_grace_seconds")]
    pub exit_grace_seconds: u64,
    /// Spawn the worker during service init instead of on first command.
    #[serde(default = "default_true")]
    pub spawn_on_start: bool,
}

impl WorkerConfig {
    /// Directory the worker runs in: the parent of [`WorkerConfig::script`],
    /// or the current directory when there is no script.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        match self.script.as_deref().and_then(Path::parent) {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    /// Close-reply wait as a [`Duration`].
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_seconds)
    }

    /// Natural-exit grace period as a [`Duration`].
    #[must_use]
    pub fn exit_grace(&self) -> Duration {
        Duration::from_secs(self.exit_grace_seconds)
    }
}

/// HTTP surface tuning.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HttpConfig {
    /// Timeout applied to commands issued from HTTP handlers; 0 means none.
    #[serde(default)]
    pub command_timeout_seconds: u64,
}

impl HttpConfig {
    /// The configured timeout, or `None` when commands may wait indefinitely.
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_seconds > 0).then(|| Duration::from_secs(self.command_timeout_seconds))
    }
}

fn default_close_timeout_seconds() -> u64 {
    5
}

fn default_exit_grace_seconds() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_http_port() -> u16 {
    5000
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// HTTP port for the API and WebSocket surface.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// External worker launch settings.
    pub worker: WorkerConfig,
    /// HTTP surface settings.
    #[serde(default)]
    pub http: HttpConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.worker.executable.as_os_str().is_empty() {
            return Err(AppError::Config("worker.executable must not be empty".into()));
        }

        if self
            .worker
            .script
            .as_ref()
            .is_some_and(|script| script.as_os_str().is_empty())
        {
            return Err(AppError::Config("worker.script must not be empty".into()));
        }

        if self.bind_address.trim().is_empty() {
            return Err(AppError::Config("bind_address must not be empty".into()));
        }

        Ok(())
    }
}
