pub mod deepgram;

// Re-export the Deepgram implementation
pub use deepgram::{DeepgramStt, DeepgramSttConfig, SttHandle};

use thiserror::Error;

/// Errors from the live transcription connection.
#[derive(Debug, Error)]
pub enum SttError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Network or WebSocket transport error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Provider-reported error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Audio chunk rejected before transmission
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),
}

/// One event from the live transcription stream, in arrival order.
#[derive(Debug)]
pub enum SttEvent {
    /// Provisional transcript that the provider may still revise.
    Interim { transcript: String },

    /// Finalized transcript fragment. `speech_final` marks the provider's
    /// endpointing decision that the utterance is complete.
    Final {
        transcript: String,
        speech_final: bool,
    },

    /// Provider-declared pause after finalized fragments with no
    /// speech-final marker.
    UtteranceEnd,

    /// The provider closed the stream.
    Closed,

    /// The stream failed; no further transcripts will arrive.
    Error(SttError),
}
