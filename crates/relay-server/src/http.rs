//! HTTP surface: health endpoint and the WebSocket upgrade
//!
//! Every accepted WebSocket connection gets its own protocol runtime and
//! its own dispatcher, so tool state never leaks between clients.

use crate::{McpServer, ServerInfo, ToolDispatcher};
use axum::Router;
use axum::extract::ws::WebSocket;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use relay_transport::transport::SocketTransport;
use relay_transport::ws;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Minimum plausible bearer token length
const MIN_TOKEN_LEN: usize = 10;

/// Shared state for the HTTP surface
#[derive(Clone)]
pub struct AppState {
    /// Builds a fresh dispatcher per connection
    pub dispatcher_factory: Arc<dyn Fn() -> Arc<dyn ToolDispatcher> + Send + Sync>,
    pub info: ServerInfo,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": state.info.name,
        "version": state.info.version,
        "uptime": state.started_at.elapsed().as_secs(),
    }))
}

/// Check the `Authorization: Bearer <token>` header.
///
/// A token shorter than `MIN_TOKEN_LEN` cannot be a real identity token
/// and is rejected outright.
pub fn authorize(headers: &HeaderMap) -> std::result::Result<(), StatusCode> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if token.len() < MIN_TOKEN_LEN {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    if let Err(status) = authorize(&headers) {
        warn!("Rejected WebSocket upgrade: missing or invalid bearer token");
        return (status, Json(json!({ "error": "Unauthorized" }))).into_response();
    }
    upgrade
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("WebSocket client connected");
    let (reader, writer) = ws::from_axum(socket);
    let transport = Arc::new(SocketTransport::new(reader, writer));
    let dispatcher = (state.dispatcher_factory)();
    let server = McpServer::new(dispatcher).with_info(state.info.clone());
    if let Err(e) = server.serve(transport).await {
        warn!("Session ended with error: {e}");
    }
    info!("WebSocket client disconnected");
}
