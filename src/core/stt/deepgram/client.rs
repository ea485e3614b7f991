//! Deepgram STT WebSocket client.
//!
//! Opens a live transcription session and surfaces transcript events to the
//! owning relay as an ordered mpsc sequence. The connection is owned by a
//! spawned task; `open` returns immediately and audio queued before the
//! socket reaches `Open` is flushed in arrival order once it does.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::config::DeepgramSttConfig;
use super::messages::{CloseStreamMessage, DeepgramMessage, KeepAliveMessage};
use crate::core::stt::{SttError, SttEvent};
use crate::core::{HandleState, SharedHandleState, new_handle_state};

// =============================================================================
// Constants
// =============================================================================

/// Maximum audio chunk size in bytes (sanity check).
///
/// At 48kHz mono 16-bit PCM, 1 second of audio is ~96KB, so 256KB allows for
/// ~2.5 seconds which is generous for microphone chunking.
const MAX_AUDIO_CHUNK_SIZE: usize = 256 * 1024;

/// Per-message idle timeout for WebSocket message reception.
/// Resets after each successful message. Catches stuck/dead connections.
/// Keep-alives from our side make the provider answer well within this.
const WS_MESSAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Bounded queue of outbound audio chunks. Also the holding buffer for audio
/// that arrives while the connection is still being established.
const AUDIO_CHANNEL_SIZE: usize = 64;

/// Bounded queue of transcript events awaiting the relay.
const EVENT_CHANNEL_SIZE: usize = 256;

// =============================================================================
// Handle
// =============================================================================

/// Handle to a live transcription session.
///
/// Owned by exactly one conversation relay. Dropping the handle closes the
/// session.
pub struct SttHandle {
    pub(crate) audio_tx: mpsc::Sender<Bytes>,
    pub(crate) shutdown_tx: Option<oneshot::Sender<()>>,
    pub(crate) state: SharedHandleState,
}

impl SttHandle {
    /// Current connection state.
    pub fn state(&self) -> HandleState {
        *self.state.read()
    }

    /// Queue one audio chunk for transmission.
    ///
    /// Chunks sent while the connection is still `Connecting` are buffered
    /// and flushed in order once it opens. Fails once the handle is closed
    /// or errored.
    pub async fn send_audio(&self, audio: Bytes) -> Result<(), SttError> {
        if self.state().is_terminal() {
            return Err(SttError::ConnectionFailed(
                "Transcription stream is closed".to_string(),
            ));
        }

        let data_len = audio.len();
        if data_len > MAX_AUDIO_CHUNK_SIZE {
            return Err(SttError::InvalidAudio(format!(
                "Audio chunk size {data_len} bytes exceeds maximum {MAX_AUDIO_CHUNK_SIZE} bytes"
            )));
        }

        self.audio_tx
            .send(audio)
            .await
            .map_err(|e| SttError::NetworkError(format!("Failed to queue audio data: {e}")))?;

        debug!("Queued {} bytes of audio for Deepgram", data_len);
        Ok(())
    }

    /// Request a graceful shutdown: pending results are flushed and the
    /// stream is closed. Idempotent.
    pub fn close(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

impl Drop for SttHandle {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Client
// =============================================================================

/// Deepgram live transcription client.
pub struct DeepgramStt;

impl DeepgramStt {
    /// Open a live transcription session.
    ///
    /// Returns immediately with the handle and its event receiver; the
    /// connection is established asynchronously by a spawned task. A
    /// connection failure arrives as [`SttEvent::Error`].
    pub fn open(
        config: DeepgramSttConfig,
    ) -> Result<(SttHandle, mpsc::Receiver<SttEvent>), SttError> {
        config.validate()?;

        let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(AUDIO_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (event_tx, event_rx) = mpsc::channel::<SttEvent>(EVENT_CHANNEL_SIZE);
        let state = new_handle_state();

        tokio::spawn(run_connection(
            config,
            audio_rx,
            shutdown_rx,
            event_tx,
            state.clone(),
        ));

        Ok((
            SttHandle {
                audio_tx,
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
    config: DeepgramSttConfig,
    mut audio_rx: mpsc::Receiver<Bytes>,
    mut shutdown_rx: oneshot::Receiver<()>,
    event_tx: mpsc::Sender<SttEvent>,
    state: SharedHandleState,
) {
    let ws_url = config.build_websocket_url();

    let host = match Url::parse(&ws_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
    {
        Some(host) => host,
        None => {
            fail(&state, &event_tx, SttError::ConfigurationError(format!(
                "Invalid Deepgram URL: {ws_url}"
            )))
            .await;
            return;
        }
    };

    // Deepgram authenticates WebSocket upgrades with "Authorization: Token <key>"
    let request = match tokio_tungstenite::tungstenite::http::Request::builder()
        .method("GET")
        .uri(&ws_url)
        .header("Host", host)
        .header("Upgrade", "websocket")
        .header("Connection", "upgrade")
        .header("Sec-WebSocket-Key", generate_key())
        .header("Sec-WebSocket-Version", "13")
        .header("Authorization", format!("Token {}", config.api_key))
        .body(())
    {
        Ok(request) => request,
        Err(e) => {
            fail(&state, &event_tx, SttError::ConnectionFailed(format!(
                "Failed to create WebSocket request: {e}"
            )))
            .await;
            return;
        }
    };

    let (ws_stream, _response) = match connect_async(request).await {
        Ok(result) => result,
        Err(e) => {
            fail(&state, &event_tx, SttError::ConnectionFailed(format!(
                "Failed to connect to Deepgram: {e}"
            )))
            .await;
            return;
        }
    };

    *state.write() = HandleState::Open;
    info!("Connected to Deepgram STT WebSocket");

    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    // Keep-alive scoped to this task: dies with the connection.
    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );

    loop {
        tokio::select! {
            // Outgoing audio; also drains anything queued while connecting
            Some(audio_data) = audio_rx.recv() => {
                let data_len = audio_data.len();
                if let Err(e) = ws_sink.send(Message::Binary(audio_data)).await {
                    fail(&state, &event_tx, SttError::NetworkError(format!(
                        "Failed to send audio to Deepgram: {e}"
                    )))
                    .await;
                    break;
                }
                debug!("Sent {} bytes of audio to Deepgram", data_len);
            }

            // Periodic keep-alive so silence does not drop the stream
            _ = keepalive.tick() => {
                match serde_json::to_string(&KeepAliveMessage::default()) {
                    Ok(json) => {
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            warn!("Failed to send keep-alive to Deepgram: {}", e);
                        }
                    }
                    Err(e) => warn!("Failed to serialize keep-alive: {}", e),
                }
            }

            // Incoming messages with idle timeout
            message = timeout(WS_MESSAGE_TIMEOUT, ws_stream.next()) => {
                match message {
                    Ok(Some(Ok(msg))) => {
                        match handle_server_message(msg, &event_tx).await {
                            Ok(true) => {}
                            Ok(false) => {
                                info!("Deepgram stream closed by provider");
                                *state.write() = HandleState::Closed;
                                let _ = event_tx.send(SttEvent::Closed).await;
                                break;
                            }
                            Err(e) => {
                                fail(&state, &event_tx, e).await;
                                break;
                            }
                        }
                    }
                    Ok(Some(Err(e))) => {
                        fail(&state, &event_tx, SttError::NetworkError(format!(
                            "WebSocket error: {e}"
                        )))
                        .await;
                        break;
                    }
                    Ok(None) => {
                        info!("Deepgram WebSocket stream ended");
                        *state.write() = HandleState::Closed;
                        let _ = event_tx.send(SttEvent::Closed).await;
                        break;
                    }
                    Err(_elapsed) => {
                        fail(&state, &event_tx, SttError::NetworkError(
                            "WebSocket idle timeout - no message for 60 seconds".into()
                        ))
                        .await;
                        break;
                    }
                }
            }

            // Graceful shutdown: flush pending results, then close
            _ = &mut shutdown_rx => {
                info!("Received shutdown signal for Deepgram STT");
                *state.write() = HandleState::Closing;

                if let Ok(json) = serde_json::to_string(&CloseStreamMessage::default()) {
                    let _ = ws_sink.send(Message::Text(json.into())).await;
                }
                let _ = ws_sink.send(Message::Close(None)).await;

                *state.write() = HandleState::Closed;
                break;
            }
        }
    }

    info!("Deepgram STT WebSocket connection closed");
}

/// Handle one incoming WebSocket message.
///
/// Returns `Ok(true)` to continue, `Ok(false)` when the provider closed the
/// stream, `Err` on a fatal provider error.
async fn handle_server_message(
    message: Message,
    event_tx: &mpsc::Sender<SttEvent>,
) -> Result<bool, SttError> {
    match message {
        Message::Text(text) => {
            match DeepgramMessage::parse(&text) {
                Ok(DeepgramMessage::Results(results)) => {
                    let transcript = results.transcript();
                    // Silent windows produce empty transcripts; nothing to relay.
                    if transcript.is_empty() {
                        return Ok(true);
                    }

                    let event = if results.is_final {
                        SttEvent::Final {
                            transcript: transcript.to_string(),
                            speech_final: results.speech_final,
                        }
                    } else {
                        SttEvent::Interim {
                            transcript: transcript.to_string(),
                        }
                    };

                    if event_tx.send(event).await.is_err() {
                        // Relay is gone; nothing left to transcribe for.
                        return Ok(false);
                    }
                }

                Ok(DeepgramMessage::UtteranceEnd(_)) => {
                    if event_tx.send(SttEvent::UtteranceEnd).await.is_err() {
                        return Ok(false);
                    }
                }

                Ok(DeepgramMessage::SpeechStarted(speech)) => {
                    debug!("Deepgram speech started at {:.2}s", speech.timestamp);
                }

                Ok(DeepgramMessage::Metadata) => {
                    debug!("Received Deepgram metadata");
                }

                Ok(DeepgramMessage::Error(err)) => {
                    let detail = err.detail().to_string();
                    error!("Deepgram STT error: {}", detail);
                    return Err(SttError::ProviderError(detail));
                }

                Ok(DeepgramMessage::Unknown(kind)) => {
                    debug!("Received unknown Deepgram message type: {}", kind);
                }

                Err(e) => {
                    warn!("Failed to parse Deepgram message: {}", e);
                }
            }
        }

        Message::Close(close_frame) => {
            info!("Deepgram WebSocket closed: {:?}", close_frame);
            return Ok(false);
        }

        Message::Ping(_) => {
            debug!("Received ping from Deepgram");
        }

        Message::Pong(_) => {
            debug!("Received pong from Deepgram");
        }

        Message::Binary(_) => {
            debug!("Received unexpected binary message from Deepgram");
        }

        _ => {
            debug!("Received unexpected message type");
        }
    }

    Ok(true)
}

async fn fail(state: &SharedHandleState, event_tx: &mpsc::Sender<SttEvent>, error: SttError) {
    error!("{}", error);
    *state.write() = HandleState::Errored;
    let _ = event_tx.send(SttEvent::Error(error)).await;
}
