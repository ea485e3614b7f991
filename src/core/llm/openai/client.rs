//! Streaming chat-completions client.
//!
//! One request per assistant turn. The request runs in a spawned task and
//! emits token deltas on an mpsc channel; cancellation drops the response
//! stream, which closes the connection and stops further generation
//! server-side (best effort - tokens already on the wire are simply never
//! read).

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::config::OpenAiChatConfig;
use super::messages::{ChatMessage, ChatRequest, SseBuffer, SseEvent, StreamChunk};
use crate::core::llm::{LlmError, LlmEvent};

/// Bounded queue of token events awaiting the relay.
const EVENT_CHANNEL_SIZE: usize = 256;

// =============================================================================
// Handle
// =============================================================================

/// Handle to one in-flight streaming completion.
///
/// Owned by the relay's in-flight response. Dropping the handle cancels the
/// request.
pub struct LlmHandle {
    pub(crate) cancel: CancellationToken,
}

impl LlmHandle {
    /// Stop generation. Safe to call at any time, including after the
    /// stream already completed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for LlmHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Client
// =============================================================================

/// OpenAI chat-completions client. Cheap to clone per session; the inner
/// HTTP client pools connections.
#[derive(Clone)]
pub struct OpenAiChat {
    client: reqwest::Client,
    config: OpenAiChatConfig,
}

impl OpenAiChat {
    pub fn new(config: OpenAiChatConfig) -> Result<Self, LlmError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::ConfigurationError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Start a streaming completion for one user utterance.
    ///
    /// Returns immediately; tokens arrive on the returned receiver. The
    /// stream ends with [`LlmEvent::Done`] or [`LlmEvent::Error`] unless it
    /// is cancelled first.
    pub fn stream(
        &self,
        system_prompt: &str,
        utterance: &str,
    ) -> (LlmHandle, mpsc::Receiver<LlmEvent>) {
        let (event_tx, event_rx) = mpsc::channel::<LlmEvent>(EVENT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        tokio::spawn(run_completion(
            self.client.clone(),
            self.config.clone(),
            system_prompt.to_owned(),
            utterance.to_owned(),
            event_tx,
            cancel.clone(),
        ));

        (LlmHandle { cancel }, event_rx)
    }
}

// =============================================================================
// Request task
// =============================================================================

async fn run_completion(
    client: reqwest::Client,
    config: OpenAiChatConfig,
    system_prompt: String,
    utterance: String,
    event_tx: mpsc::Sender<LlmEvent>,
    cancel: CancellationToken,
) {
    let body = ChatRequest {
        model: &config.model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: &system_prompt,
            },
            ChatMessage {
                role: "user",
                content: &utterance,
            },
        ],
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        top_p: config.top_p,
        stream: true,
    };

    let request = client
        .post(config.completions_url())
        .bearer_auth(&config.api_key)
        .json(&body)
        .send();

    let response = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Completion aborted before the request was issued");
            return;
        }
        response = request => response,
    };

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            let error = LlmError::NetworkError(format!("Completion request failed: {e}"));
            error!("{}", error);
            let _ = event_tx.send(LlmEvent::Error(error)).await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        let error = LlmError::ApiError {
            status: status.as_u16(),
            message,
        };
        error!("{}", error);
        let _ = event_tx.send(LlmEvent::Error(error)).await;
        return;
    }

    let mut stream = response.bytes_stream();
    let mut sse = SseBuffer::new();

    loop {
        let chunk = tokio::select! {
            // Dropping the byte stream on cancellation closes the connection,
            // which is the request-level abort the provider understands.
            _ = cancel.cancelled() => {
                debug!("Completion stream aborted");
                return;
            }
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for event in sse.push(&bytes) {
                    match event {
                        SseEvent::Data(data) => match serde_json::from_str::<StreamChunk>(&data) {
                            Ok(parsed) => {
                                if let Some(token) = parsed.token() {
                                    if event_tx
                                        .send(LlmEvent::Token(token.to_string()))
                                        .await
                                        .is_err()
                                    {
                                        // Receiver gone: the response was superseded.
                                        return;
                                    }
                                }
                            }
                            Err(e) => warn!("Failed to parse completion chunk: {}", e),
                        },
                        SseEvent::Done => {
                            let _ = event_tx.send(LlmEvent::Done).await;
                            return;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                let error = LlmError::NetworkError(format!("Completion stream failed: {e}"));
                error!("{}", error);
                let _ = event_tx.send(LlmEvent::Error(error)).await;
                return;
            }
            None => {
                // Stream ended without the [DONE] marker; treat as complete.
                debug!("Completion stream ended without terminator");
                let _ = event_tx.send(LlmEvent::Done).await;
                return;
            }
        }
    }
}
