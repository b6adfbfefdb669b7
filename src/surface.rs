//! Publish surface adapter
//!
//! The RTMP frontend stays external; it reports connection lifecycle to
//! these HTTP hooks. A non-2xx on `/hooks/publish` tells the frontend to
//! drop the connection. The same server exposes the HLS output tree for
//! playback, a liveness endpoint, and an origin reachability probe.
//!
//! Binding the surface port is the one startup failure the process does
//! not survive.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tower_http::services::ServeDir;
use tracing::{info, warn};
use url::Url;

use crate::config::IngestConfig;
use crate::error::Result;
use crate::gate::{AccessDecision, AuthGate, PublishRequest};
use crate::reconcile::{PlayRequest, StatusReconciler};
use crate::registry::{StreamRegistry, StreamUpdate};

const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
const DEFAULT_RTSP_PORT: u16 = 554;

/// Shared state behind the hook handlers.
pub struct SurfaceState {
    pub gate: AuthGate,
    pub reconciler: StatusReconciler,
    pub registry: Arc<dyn StreamRegistry>,
    pub config: Arc<IngestConfig>,
}

/// Build the surface router: hooks, probe, liveness, HLS files.
pub fn create_router(state: Arc<SurfaceState>) -> Router {
    let hls_root = state.config.media_root.join(&state.config.app);
    let hls_mount = format!("/{}", state.config.app);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/probe", post(probe))
        .route("/hooks/publish", post(hook_publish))
        .route("/hooks/publish_start", post(hook_publish_start))
        .route("/hooks/publish_done", post(hook_publish_done))
        .route("/hooks/play", post(hook_play))
        .route("/hooks/play_done", post(hook_play_done))
        .nest_service(&hls_mount, ServeDir::new(hls_root))
        .with_state(state)
}

/// Serve until the process shuts down. A bind failure propagates as a
/// fatal startup error.
pub async fn run_surface(state: Arc<SurfaceState>, addr: SocketAddr) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "publish surface listening");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn hook_publish(
    State(state): State<Arc<SurfaceState>>,
    Json(request): Json<PublishRequest>,
) -> StatusCode {
    match state.gate.authorize(&request).await {
        AccessDecision::Rejected(_) => StatusCode::FORBIDDEN,
        AccessDecision::TrustedPull { .. } | AccessDecision::Publisher(_) => {
            StatusCode::NO_CONTENT
        }
    }
}

async fn hook_publish_start(
    State(state): State<Arc<SurfaceState>>,
    Json(request): Json<PublishRequest>,
) -> StatusCode {
    state.reconciler.on_publish_started(&request).await;
    StatusCode::NO_CONTENT
}

async fn hook_publish_done(
    State(state): State<Arc<SurfaceState>>,
    Json(request): Json<PublishRequest>,
) -> StatusCode {
    state.reconciler.on_publish_done(&request).await;
    StatusCode::NO_CONTENT
}

async fn hook_play(
    State(state): State<Arc<SurfaceState>>,
    Json(request): Json<PlayRequest>,
) -> StatusCode {
    state.reconciler.on_play_started(&request).await;
    StatusCode::NO_CONTENT
}

async fn hook_play_done(
    State(state): State<Arc<SurfaceState>>,
    Json(request): Json<PlayRequest>,
) -> StatusCode {
    state.reconciler.on_play_done(&request).await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct ProbeRequest {
    pub stream_id: String,
    pub origin_url: String,
}

#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    pub stream_id: String,
    pub reachable: bool,
    pub checked_at: DateTime<Utc>,
}

/// TCP reachability check against a source's origin.
///
/// Stamps `last_checked_at` on the stream row; the status fields stay
/// owned by the supervisor and reconciler.
async fn probe(
    State(state): State<Arc<SurfaceState>>,
    Json(request): Json<ProbeRequest>,
) -> Response {
    let Ok(url) = Url::parse(&request.origin_url) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(host) = url.host_str() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let port = url.port().unwrap_or(DEFAULT_RTSP_PORT);

    let reachable = tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map(|conn| conn.is_ok())
        .unwrap_or(false);

    if let Err(e) = state
        .registry
        .update_stream(&request.stream_id, &StreamUpdate::checked())
        .await
    {
        warn!(stream_id = %request.stream_id, error = %e, "registry write failed");
    }

    Json(ProbeResponse {
        stream_id: request.stream_id,
        reachable,
        checked_at: Utc::now(),
    })
    .into_response()
}
