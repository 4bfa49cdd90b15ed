#![forbid(unsafe_code)]

//! `taqeem-bridge`: HTTP/WebSocket front end for the automation worker.
//!
//! Loads configuration, spawns the worker, serves the HTTP API and the
//! batch WebSocket, and retires the worker on shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use taqeem_bridge::http::{self, AppState};
use taqeem_bridge::transport::rooms::RoomHub;
use taqeem_bridge::{AppError, GlobalConfig, Result, WorkerService};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "taqeem-bridge", about = "Automation worker bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured HTTP port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("taqeem-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    info!(port = config.http_port, "configuration loaded");

    // ── Build the service ───────────────────────────────
    let hub = Arc::new(RoomHub::new());
    let service = Arc::new(WorkerService::new(config.worker.clone(), hub.clone()));

    // A failed eager spawn is not fatal: the next command retries it.
    if let Err(err) = service.init().await {
        warn!(%err, "worker did not start; it will be spawned on first use");
    }

    let state = Arc::new(AppState {
        service: Arc::clone(&service),
        hub,
        command_timeout: config.http.command_timeout(),
    });

    // ── Start HTTP ──────────────────────────────────────
    let ct = CancellationToken::new();
    let http_ct = ct.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(&config, state, http_ct).await {
            error!(%err, "http server failed");
        }
    });

    info!("taqeem-bridge ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    service.shutdown().await;
    let swept = service.sweep_sessions();
    if !swept.is_empty() {
        info!(count = swept.len(), "batch sessions dropped at shutdown");
    }

    if let Err(err) = http_handle.await {
        error!(%err, "http task panicked");
    }
    info!("taqeem-bridge shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
