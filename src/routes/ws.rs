//! Client WebSocket route configuration.
//!
//! # Endpoint
//!
//! `GET /ws?connectionId=<id>` - WebSocket upgrade for one conversation
//!
//! # Protocol
//!
//! After the upgrade, the client sends binary microphone audio frames.
//! The server responds with:
//! - Binary frames: synthesized audio ready for playback
//! - `{"type":"text","content":...}` for incremental response text
//! - `{"type":"interrupt"}` when a new utterance cancels an in-flight
//!   response; the client must drop any queued playback audio
//! - `{"type":"error","message":...}` on provider failures
//!
//! The `connectionId` must come from a prior `POST /start-conversation`;
//! unknown or reused identifiers are refused before any upgrade happens.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws::ws_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the client WebSocket router
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
}
