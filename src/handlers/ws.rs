//! Client WebSocket handler.
//!
//! Claims the session identifier against the registry before upgrading, then
//! wires the socket to a conversation relay: a reader task feeds inbound
//! binary audio into the relay, a writer task drains the relay's outbound
//! frames, and the registry entry is released when the relay finishes.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::core::stt::DeepgramStt;
use crate::registry::SessionConfig;
use crate::relay::{ClientFrame, ControlFrame, ConversationRelay, LiveProviders};
use crate::state::AppState;

/// Channel buffer size for audio workloads.
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Query parameters of the `/ws` upgrade request.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "connectionId", default)]
    pub connection_id: Option<String>,
}

/// WebSocket upgrade handler.
///
/// Refused outright - no relay is instantiated - when the identifier is
/// absent, unknown, or already claimed by another connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(connection_id) = query.connection_id else {
        warn!("WebSocket connection attempt without connectionId");
        return StatusCode::FORBIDDEN.into_response();
    };

    let Some(session) = state.registry.claim(&connection_id) else {
        warn!(connection_id = %connection_id,
              "WebSocket connection attempt with unknown or already claimed connectionId");
        return StatusCode::FORBIDDEN.into_response();
    };

    info!(connection_id = %connection_id, "Client connected");
    ws.on_upgrade(move |socket| handle_socket(socket, state, connection_id, session))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    connection_id: String,
    session: SessionConfig,
) {
    let (mut sender, mut receiver) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<ClientFrame>(CHANNEL_BUFFER_SIZE);

    // Writer task: serializes relay output onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let result = match frame {
                ClientFrame::Audio(data) => sender.send(Message::Binary(data)).await,
                ClientFrame::Control(control) => match serde_json::to_string(&control) {
                    Ok(json) => sender.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!("Failed to serialize control frame: {}", e);
                        continue;
                    }
                },
            };
            if result.is_err() {
                break;
            }
        }
    });

    // Reader task: inbound binary frames are microphone audio. Dropping the
    // sender tells the relay the client is gone.
    let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(CHANNEL_BUFFER_SIZE);
    let reader = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Binary(data)) => {
                    if audio_tx.send(data).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    let exit = match open_relay(&state, &connection_id, &session) {
        Ok((relay, stt_events)) => relay.run(stt_events, audio_rx, frame_tx.clone()).await,
        Err(message) => {
            error!(connection_id = %connection_id, error = %message,
                   "Failed to start conversation relay");
            let _ = frame_tx
                .send(ClientFrame::Control(ControlFrame::Error { message }))
                .await;
            crate::relay::RelayExit::TranscriberFailed
        }
    };

    info!(connection_id = %connection_id, ?exit, "Conversation relay finished");

    state.registry.release(&connection_id);
    reader.abort();
    drop(frame_tx);
    let _ = writer.await;
}

/// Build the relay and its provider handles for one claimed session.
fn open_relay(
    state: &Arc<AppState>,
    connection_id: &str,
    session: &SessionConfig,
) -> Result<
    (
        ConversationRelay<LiveProviders>,
        mpsc::Receiver<crate::core::stt::SttEvent>,
    ),
    String,
> {
    let (stt, stt_events) =
        DeepgramStt::open(state.config.deepgram_config()).map_err(|e| e.to_string())?;

    let llm =
        crate::core::llm::OpenAiChat::new(state.config.openai_config()).map_err(|e| e.to_string())?;
    let providers = LiveProviders::new(llm, state.config.elevenlabs_config(&session.voice_id));

    let relay = ConversationRelay::new(
        connection_id.to_string(),
        session.prompt.clone(),
        providers,
        stt,
        state.config.audio_params(),
    );

    Ok((relay, stt_events))
}
