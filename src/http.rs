//! HTTP and WebSocket surface.
//!
//! Thin axum handlers over [`WorkerService`]. Worker replies are wrapped
//! as `{success, message, data}`; transport failures become
//! `{success: false, error}` with status 500.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::service::WorkerService;
use crate::transport::rooms::RoomHub;
use crate::transport::ws::run_client_socket;
use crate::worker::protocol::{WorkerReply, WorkerStatus};
use crate::{AppError, Result};

/// Shared state behind every handler.
pub struct AppState {
    /// Worker and batch sessions.
    pub service: Arc<WorkerService>,
    /// Connected socket clients.
    pub hub: Arc<RoomHub>,
    /// Upper bound on HTTP-issued commands; `None` waits indefinitely.
    pub command_timeout: Option<Duration>,
}

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/worker/ping", get(worker_ping))
        .route("/api/worker/hello", get(worker_hello))
        .route("/api/worker/simulate-work", post(worker_simulate_work))
        .route("/api/worker/status", get(worker_status))
        .route("/api/worker/restart", post(worker_restart))
        .route("/api/taqeem/login", post(taqeem_login))
        .route("/api/taqeem/otp", post(taqeem_otp))
        .route("/api/taqeem/logout", post(taqeem_logout))
        .route("/api/taqeem/status", get(taqeem_status))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Bind `bind_address:http_port` and serve until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the address is invalid or cannot be bound,
/// and `AppError::Transport` if the server fails while running.
pub async fn serve(config: &GlobalConfig, state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind: SocketAddr = format!("{}:{}", config.bind_address, config.http_port)
        .parse()
        .map_err(|err| AppError::Config(format!("invalid bind address: {err}")))?;

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind http on {bind}: {err}")))?;

    info!(%bind, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Transport(format!("http server error: {err}")))?;

    info!("http server shut down");
    Ok(())
}

// ── Responses ─────────────────────────────────────────────────────────────────

fn ok_reply(message: &str, reply: &WorkerReply) -> Response {
    Json(json!({ "success": true, "message": message, "data": reply.raw })).into_response()
}

fn failure(status: StatusCode, error: &str, data: Option<&Value>) -> Response {
    let mut body = json!({ "success": false, "error": error });
    if let Some(data) = data {
        body["data"] = data.clone();
    }
    (status, Json(body)).into_response()
}

fn transport_failure(err: &AppError) -> Response {
    warn!(%err, "worker command failed");
    failure(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string(), None)
}

/// Await `fut` under the configured command timeout.
async fn bounded<F>(state: &AppState, fut: F) -> Result<WorkerReply>
where
    F: std::future::Future<Output = Result<WorkerReply>>,
{
    match state.command_timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| AppError::Transport(format!("worker did not reply within {limit:?}")))?,
        None => fut.await,
    }
}

// ── Worker diagnostics ────────────────────────────────────────────────────────

async fn worker_ping(State(state): State<Arc<AppState>>) -> Response {
    match bounded(&state, state.service.ping()).await {
        Ok(reply) => ok_reply("worker ping successful", &reply),
        Err(err) => transport_failure(&err),
    }
}

async fn worker_hello(State(state): State<Arc<AppState>>) -> Response {
    match bounded(&state, state.service.hello()).await {
        Ok(reply) => ok_reply("worker hello test", &reply),
        Err(err) => transport_failure(&err),
    }
}

async fn worker_simulate_work(State(state): State<Arc<AppState>>) -> Response {
    match bounded(&state, state.service.simulate_work()).await {
        Ok(reply) => ok_reply("work simulation completed", &reply),
        Err(err) => transport_failure(&err),
    }
}

async fn worker_status(State(state): State<Arc<AppState>>) -> Response {
    let status = state.service.status().await;
    Json(json!({ "success": true, "data": status })).into_response()
}

async fn worker_restart(State(state): State<Arc<AppState>>) -> Response {
    match state.service.restart().await {
        Ok(()) => Json(json!({ "success": true, "message": "worker restarted" })).into_response(),
        Err(err) => transport_failure(&err),
    }
}

// ── Portal login ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    record_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OtpRequest {
    #[serde(default)]
    otp: String,
    record_id: Option<String>,
}

async fn taqeem_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Response {
    if req.email.is_empty() || req.password.is_empty() {
        return failure(
            StatusCode::BAD_REQUEST,
            "email and password are required",
            None,
        );
    }

    info!(email = %req.email, "portal login attempt");
    let reply = match bounded(
        &state,
        state.service.login(req.email, req.password, req.record_id),
    )
    .await
    {
        Ok(reply) => reply,
        Err(err) => return transport_failure(&err),
    };

    match reply.status.as_str() {
        "OTP_REQUIRED" => Json(json!({
            "success": true,
            "requiresOtp": true,
            "message": "OTP required to complete login",
            "data": reply.raw,
        }))
        .into_response(),
        "LOGIN_SUCCESS" | "SUCCESS" => ok_reply("login successful", &reply),
        "NOT_FOUND" => {
            let mut body = json!({ "success": false, "error": "invalid credentials" });
            if let Some(recoverable) = reply.raw.get("recoverable") {
                body["recoverable"] = recoverable.clone();
            }
            (StatusCode::UNAUTHORIZED, Json(body)).into_response()
        }
        _ => failure(
            StatusCode::BAD_REQUEST,
            &reply.failure_text("login failed"),
            Some(&reply.raw),
        ),
    }
}

async fn taqeem_otp(State(state): State<Arc<AppState>>, Json(req): Json<OtpRequest>) -> Response {
    if req.otp.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "otp is required", None);
    }

    let reply = match bounded(&state, state.service.submit_otp(req.otp, req.record_id)).await {
        Ok(reply) => reply,
        Err(err) => return transport_failure(&err),
    };

    match reply.status {
        WorkerStatus::Success => ok_reply("OTP verified successfully", &reply),
        WorkerStatus::Other(ref s) if s == "OTP_FAILED" => {
            failure(StatusCode::BAD_REQUEST, "invalid OTP", Some(&reply.raw))
        }
        _ => failure(
            StatusCode::BAD_REQUEST,
            &reply.failure_text("OTP verification failed"),
            Some(&reply.raw),
        ),
    }
}

async fn taqeem_logout(State(state): State<Arc<AppState>>) -> Response {
    match bounded(&state, state.service.close_browser()).await {
        Ok(reply) => ok_reply("logged out", &reply),
        Err(err) => transport_failure(&err),
    }
}

async fn taqeem_status(State(state): State<Arc<AppState>>) -> Response {
    let status = state.service.status().await;
    Json(json!({
        "success": true,
        "data": { "worker": status, "authenticated": status.ready },
    }))
    .into_response()
}

// ── WebSocket ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsParams {
    user_id: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let hub = Arc::clone(&state.hub);
    let service = Arc::clone(&state.service);
    let owner = params.user_id.filter(|id| !id.is_empty());
    ws.on_upgrade(move |socket| run_client_socket(socket, hub, service, owner))
}
