//! HTTP API handlers: session provisioning and health check.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::state::AppState;

/// Body of `POST /start-conversation`.
///
/// Fields are optional so a missing one yields a clean 400 with the
/// validation message instead of a deserialization rejection.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationResponse {
    pub connection_id: String,
    pub message: String,
}

/// Provision a new conversation session.
///
/// The returned identifier is consumed exactly once by the client's
/// subsequent WebSocket connection.
pub async fn start_conversation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartConversationRequest>,
) -> Response {
    let prompt = request.prompt.filter(|p| !p.is_empty());
    let voice_id = request.voice_id.filter(|v| !v.is_empty());
    let (Some(prompt), Some(voice_id)) = (prompt, voice_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Prompt and voiceId are required"})),
        )
            .into_response();
    };

    let connection_id = state.registry.create(prompt, voice_id);
    info!(connection_id = %connection_id, "Conversation session provisioned");

    (
        StatusCode::CREATED,
        Json(StartConversationResponse {
            connection_id,
            message: "Conversation started. Connect to WebSocket to continue.".to_string(),
        }),
    )
        .into_response()
}

/// Liveness probe.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
