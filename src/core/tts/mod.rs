pub mod elevenlabs;

// Re-export the ElevenLabs implementation
pub use elevenlabs::{ELEVENLABS_TTS_URL, ElevenLabsTts, ElevenLabsTtsConfig, TtsHandle};

use bytes::Bytes;
use thiserror::Error;

/// Errors from the streaming synthesis connection.
#[derive(Debug, Error)]
pub enum TtsError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Network or WebSocket transport error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Provider-reported error
    #[error("Provider error: {0}")]
    ProviderError(String),
}

/// One event from the synthesis stream, in arrival order.
#[derive(Debug)]
pub enum TtsEvent {
    /// Decoded PCM audio ready for the client.
    Audio(Bytes),

    /// The provider finished flushing; no more audio will arrive.
    Final,

    /// The provider closed the stream before signalling completion.
    Closed,

    /// The stream failed.
    Error(TtsError),
}
