//! Inbound HTTP server for progress callbacks.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::error::{ChannelError, Result};
use crate::tracker::{JobTracker, parse_callback};

/// Shared state for callback routes.
#[derive(Clone)]
pub struct ServerState {
    pub tracker: JobTracker,
}

/// Build the callback router.
pub fn callback_routes(tracker: JobTracker) -> Router {
    Router::new()
        .route("/callback", post(callback))
        .route("/health", get(health))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(ServerState { tracker })
}

/// Bind `addr` and serve until the listener fails.
pub async fn serve(addr: SocketAddr, tracker: JobTracker) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ChannelError::StartupFailed {
            name: "callback-server".into(),
            reason: format!("bind {addr}: {e}"),
        })?;
    info!(%addr, "Callback server started");

    axum::serve(listener, callback_routes(tracker))
        .await
        .map_err(|e| ChannelError::StartupFailed {
            name: "callback-server".into(),
            reason: e.to_string(),
        })?;
    Ok(())
}

/// POST /callback
///
/// Always answers 200 so the remote worker never retries; malformed bodies and
/// callbacks for finished jobs are handled (and logged) by the tracker.
async fn callback(State(state): State<ServerState>, body: Bytes) -> impl IntoResponse {
    let report = parse_callback(&body);
    let ack = state
        .tracker
        .on_progress(report.progress, report.message)
        .await;
    debug!(?ack, progress = report.progress, "Callback acknowledged");
    (StatusCode::OK, "OK")
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "progress-bot"
    }))
}

/// GET /status
async fn status(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.tracker.snapshot().await)
}
