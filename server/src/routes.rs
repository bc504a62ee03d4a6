use axum::{routing::get, Router};

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the axum Router with the relay socket and a health check.
///
/// The socket is served on both `/` and `/ws`; clients that dial the bare
/// `ws://host:port` address land on `/`.
///
/// The WebSocket handler reads the peer address from `ConnectInfo`, so the
/// router must be served with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler::ws_upgrade))
        .route("/ws", get(ws_handler::ws_upgrade))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
