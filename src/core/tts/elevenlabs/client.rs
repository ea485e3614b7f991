//! ElevenLabs streaming-input TTS WebSocket client.
//!
//! Opened lazily by the relay on the first non-empty completion token. The
//! connection task sends the bootstrap voice-settings message, then forwards
//! text deltas as they arrive; the flush sentinel makes the provider emit
//! trailing audio and an `isFinal` frame. `close` is a hard close with no
//! flush wait, used when a new utterance supersedes the response mid-stream.

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use super::config::ElevenLabsTtsConfig;
use super::messages::{InitMessage, SynthesisMessage, TextMessage};
use crate::core::tts::{TtsError, TtsEvent};
use crate::core::{HandleState, SharedHandleState, new_handle_state};

/// Bounded queue of outbound text deltas.
const INPUT_CHANNEL_SIZE: usize = 64;

/// Bounded queue of audio events awaiting the relay.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Outbound unit for the connection task.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TtsInput {
    /// Incremental text with the try-to-synthesize hint.
    Text(String),
    /// End-of-input sentinel; the provider flushes trailing audio.
    Flush,
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a streaming synthesis session.
///
/// Owned by the relay's in-flight response. Dropping the handle hard-closes
/// the session.
pub struct TtsHandle {
    pub(crate) input_tx: mpsc::Sender<TtsInput>,
    pub(crate) shutdown_tx: Option<oneshot::Sender<()>>,
    pub(crate) state: SharedHandleState,
}

impl TtsHandle {
    /// Current connection state.
    pub fn state(&self) -> HandleState {
        *self.state.read()
    }

    /// Queue one text delta for synthesis. Text sent while the connection is
    /// still `Connecting` is buffered and sent in order once it opens.
    pub async fn send_text(&self, text: &str) -> Result<(), TtsError> {
        if self.state().is_terminal() {
            return Err(TtsError::ConnectionFailed(
                "Synthesis stream is closed".to_string(),
            ));
        }
        self.input_tx
            .send(TtsInput::Text(text.to_owned()))
            .await
            .map_err(|e| TtsError::NetworkError(format!("Failed to queue synthesis text: {e}")))
    }

    /// Signal end of input; the provider flushes trailing audio and then
    /// reports completion.
    pub async fn finish(&self) -> Result<(), TtsError> {
        if self.state().is_terminal() {
            return Err(TtsError::ConnectionFailed(
                "Synthesis stream is closed".to_string(),
            ));
        }
        self.input_tx
            .send(TtsInput::Flush)
            .await
            .map_err(|e| TtsError::NetworkError(format!("Failed to queue flush: {e}")))
    }

    /// Hard close: the socket is torn down without waiting for trailing
    /// audio. Idempotent.
    pub fn close(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

impl Drop for TtsHandle {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Client
// =============================================================================

/// ElevenLabs streaming synthesis client.
pub struct ElevenLabsTts;

impl ElevenLabsTts {
    /// Open a streaming synthesis session.
    ///
    /// Returns immediately with the handle and its event receiver; the
    /// connection is established asynchronously. A connection failure
    /// arrives as [`TtsEvent::Error`].
    pub fn open(
        config: ElevenLabsTtsConfig,
    ) -> Result<(TtsHandle, mpsc::Receiver<TtsEvent>), TtsError> {
        config.validate()?;

        let (input_tx, input_rx) = mpsc::channel::<TtsInput>(INPUT_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (event_tx, event_rx) = mpsc::channel::<TtsEvent>(EVENT_CHANNEL_SIZE);
        let state = new_handle_state();

        tokio::spawn(run_connection(
            config,
            input_rx,
            shutdown_rx,
            event_tx,
            state.clone(),
        ));

        Ok((
            TtsHandle {
                input_tx,
                shutdown_tx: Some(shutdown_tx),
                state,
            },
            event_rx,
        ))
    }
}

// =============================================================================
// Connection task
// =============================================================================

async fn run_connection(
    config: ElevenLabsTtsConfig,
    mut input_rx: mpsc::Receiver<TtsInput>,
    mut shutdown_rx: oneshot::Receiver<()>,
    event_tx: mpsc::Sender<TtsEvent>,
    state: SharedHandleState,
) {
    let ws_url = config.build_websocket_url();

    let (ws_stream, _response) = match connect_async(ws_url.as_str()).await {
        Ok(result) => result,
        Err(e) => {
            fail(&state, &event_tx, TtsError::ConnectionFailed(format!(
                "Failed to connect to ElevenLabs: {e}"
            )))
            .await;
            return;
        }
    };

    info!("Connected to ElevenLabs TTS WebSocket");
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    // Bootstrap: voice settings plus the API key, before any text.
    let init = InitMessage::new(&config.api_key, config.stability, config.similarity_boost);
    match serde_json::to_string(&init) {
        Ok(json) => {
            if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                fail(&state, &event_tx, TtsError::NetworkError(format!(
                    "Failed to send synthesis bootstrap: {e}"
                )))
                .await;
                return;
            }
        }
        Err(e) => {
            fail(&state, &event_tx, TtsError::ProviderError(format!(
                "Failed to serialize synthesis bootstrap: {e}"
            )))
            .await;
            return;
        }
    }

    *state.write() = HandleState::Open;

    loop {
        tokio::select! {
            // Outgoing text; also drains deltas queued while connecting
            Some(input) = input_rx.recv() => {
                let message = match &input {
                    TtsInput::Text(text) => TextMessage::delta(text),
                    TtsInput::Flush => TextMessage::flush(),
                };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize synthesis text: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                    fail(&state, &event_tx, TtsError::NetworkError(format!(
                        "Failed to send text to ElevenLabs: {e}"
                    )))
                    .await;
                    break;
                }
                if input == TtsInput::Flush {
                    debug!("Sent end-of-input sentinel to ElevenLabs");
                }
            }

            // Incoming audio frames
            message = ws_stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match handle_synthesis_frame(&text, &event_tx).await {
                            Ok(true) => {}
                            Ok(false) => {
                                // Final frame observed: graceful end of stream.
                                *state.write() = HandleState::Closing;
                                let _ = ws_sink.send(Message::Close(None)).await;
                                *state.write() = HandleState::Closed;
                                break;
                            }
                            Err(e) => {
                                fail(&state, &event_tx, e).await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(close_frame))) => {
                        info!("ElevenLabs WebSocket closed: {:?}", close_frame);
                        *state.write() = HandleState::Closed;
                        let _ = event_tx.send(TtsEvent::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => {
                        debug!("Received unexpected frame type from ElevenLabs");
                    }
                    Some(Err(e)) => {
                        fail(&state, &event_tx, TtsError::NetworkError(format!(
                            "WebSocket error: {e}"
                        )))
                        .await;
                        break;
                    }
                    None => {
                        info!("ElevenLabs WebSocket stream ended");
                        *state.write() = HandleState::Closed;
                        let _ = event_tx.send(TtsEvent::Closed).await;
                        break;
                    }
                }
            }

            // Hard close: no flush wait
            _ = &mut shutdown_rx => {
                info!("Received shutdown signal for ElevenLabs TTS");
                *state.write() = HandleState::Closing;
                let _ = ws_sink.send(Message::Close(None)).await;
                *state.write() = HandleState::Closed;
                break;
            }
        }
    }

    info!("ElevenLabs TTS WebSocket connection closed");
}

/// Handle one synthesis frame.
///
/// Returns `Ok(true)` to continue, `Ok(false)` after the final frame,
/// `Err` on a provider error.
async fn handle_synthesis_frame(
    text: &str,
    event_tx: &mpsc::Sender<TtsEvent>,
) -> Result<bool, TtsError> {
    let message = match SynthesisMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Failed to parse ElevenLabs message: {}", e);
            return Ok(true);
        }
    };

    if let Some(detail) = message.error_detail() {
        error!("ElevenLabs TTS error: {}", detail);
        return Err(TtsError::ProviderError(detail));
    }

    if let Some(decoded) = message.decode_audio() {
        match decoded {
            Ok(audio) => {
                debug!("Received {} bytes of synthesized audio", audio.len());
                if event_tx.send(TtsEvent::Audio(audio)).await.is_err() {
                    // Relay dropped the stream: response was superseded.
                    return Ok(false);
                }
            }
            Err(e) => {
                return Err(TtsError::ProviderError(format!(
                    "Failed to decode audio payload: {e}"
                )));
            }
        }
        return Ok(true);
    }

    if message.is_final() {
        debug!("ElevenLabs streaming completed");
        let _ = event_tx.send(TtsEvent::Final).await;
        return Ok(false);
    }

    debug!("Unhandled ElevenLabs frame");
    Ok(true)
}

async fn fail(state: &SharedHandleState, event_tx: &mpsc::Sender<TtsEvent>, error: TtsError) {
    error!("{}", error);
    *state.write() = HandleState::Errored;
    let _ = event_tx.send(TtsEvent::Error(error)).await;
}
