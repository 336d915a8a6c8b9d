//! Client-facing HTTP transport: Streamable HTTP at `/mcp`, plus the
//! `/health/*` probes and `/metrics` endpoint.
//!
//! Built on an axum `Router` with shared `AppState` behind an `Arc` and a
//! `TraceLayer`/`CatchPanicLayer` stack, narrowed to the single `/mcp`
//! JSON-RPC endpoint this gateway's core needs — no SSE notification
//! stream, since the provider runtime has no server-initiated
//! client-facing notifications to multiplex.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::protocol::{InitializeParams, JsonRpcMessage, JsonRpcResponse, ToolsCallParams};
use crate::{Error, Result};

use super::surface::GatewaySurface;

struct AppState {
    surface: Arc<GatewaySurface>,
}

/// Serve `surface` over HTTP at `addr` until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the listener cannot bind to `addr`.
pub async fn run(addr: String, surface: Arc<GatewaySurface>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let state = Arc::new(AppState { surface });

    let app = Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/health/startup", get(health_startup))
        .route("/metrics", get(metrics_handler))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Internal(format!("failed to bind {addr}: {e}")))?;
    info!(%addr, "HTTP transport listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .map_err(|e| Error::Internal(e.to_string()))
}

async fn mcp_handler(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> impl IntoResponse {
    let message: JsonRpcMessage = match serde_json::from_value(body) {
        Ok(m) => m,
        Err(e) => {
            let resp = JsonRpcResponse::error(None, crate::error::rpc_codes::PARSE_ERROR, e.to_string());
            return (StatusCode::BAD_REQUEST, Json(serde_json::to_value(resp).unwrap_or_default()));
        }
    };

    let JsonRpcMessage::Request(request) = message else {
        return (StatusCode::ACCEPTED, Json(json!({})));
    };

    let id = request.id.clone();
    let result: Result<Value> = match request.method.as_str() {
        "initialize" => (|| {
            let params: InitializeParams = serde_json::from_value(request.params.clone().unwrap_or_default())?;
            Ok(serde_json::to_value(state.surface.handle_initialize(&params))?)
        })(),
        "tools/list" => Ok(json!({"tools": state.surface.handle_tools_list()})),
        "tools/call" => {
            let params: std::result::Result<ToolsCallParams, _> =
                serde_json::from_value(request.params.clone().unwrap_or_default());
            match params {
                Ok(params) => state
                    .surface
                    .handle_tools_call(params)
                    .await
                    .map(|r| serde_json::to_value(r).unwrap_or_default()),
                Err(e) => Err(Error::InvalidArgument(e.to_string())),
            }
        }
        other => Err(Error::UnknownTool {
            provider: "gateway".to_string(),
            tool: other.to_string(),
        }),
    };

    match result {
        Ok(value) => (StatusCode::OK, Json(serde_json::to_value(JsonRpcResponse::success(id, value)).unwrap_or_default())),
        Err(e) => (
            StatusCode::OK,
            Json(serde_json::to_value(JsonRpcResponse::error(Some(id), e.to_rpc_code(), e.to_string())).unwrap_or_default()),
        ),
    }
}

/// `GET /health/live`: process is up. Never depends on provider state, so
/// there's nothing to measure — `duration_ms` is the synthetic `0`.
async fn health_live(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(health_probe_body(&state, "live", true, 0))
}

/// `GET /health/ready`: dispatchable — all providers/groups
/// currently serviceable.
async fn health_ready(State(state): State<Arc<AppState>>) -> Json<Value> {
    let started = Instant::now();
    let snapshot = state.surface.health_snapshot();
    let healthy = snapshot["status"] == json!("healthy");
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    Json(health_probe_body(&state, "ready", healthy, duration_ms))
}

/// `GET /health/startup`: the gateway has finished constructing its
/// registry (always true once the HTTP listener is serving requests). No
/// probe runs, so `duration_ms` is the synthetic `0`.
async fn health_startup(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(health_probe_body(&state, "startup", true, 0))
}

fn health_probe_body(state: &AppState, check_name: &str, healthy: bool, duration_ms: u64) -> Value {
    let status = if healthy { "healthy" } else { "unhealthy" };
    json!({
        "status": status,
        "checks": [{"name": check_name, "status": status, "duration_ms": duration_ms}],
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.surface.uptime().as_secs(),
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.surface.metrics_snapshot())
}
