pub mod openai;

// Re-export the OpenAI implementation
pub use openai::{LlmHandle, OpenAiChat, OpenAiChatConfig};

use thiserror::Error;

/// Errors from the streaming completion request.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Request could not be sent or the stream broke mid-flight
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Provider returned a non-success status
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },
}

/// One event from a streaming completion, in generation order.
#[derive(Debug)]
pub enum LlmEvent {
    /// Text token delta.
    Token(String),

    /// The completion finished normally.
    Done,

    /// The stream failed; no completion event will follow.
    Error(LlmError),
}
