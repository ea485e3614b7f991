//! WebSocket message types for the ElevenLabs stream-input API.
//!
//! All frames are JSON text. The first outgoing message carries the voice
//! settings and the API key; subsequent messages carry incremental text with
//! a hint to start synthesizing, and an empty-text sentinel flushes trailing
//! audio. Incoming frames carry base64 PCM chunks until a final `isFinal`
//! marker.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

// =============================================================================
// Outgoing Messages (Client to Server)
// =============================================================================

/// Voice tuning sent with the bootstrap message.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
}

/// Bootstrap message opening the synthesis session.
///
/// The leading single-space text primes the stream without producing audio.
#[derive(Debug, Serialize)]
pub struct InitMessage<'a> {
    pub text: &'a str,
    pub voice_settings: VoiceSettings,
    pub xi_api_key: &'a str,
}

impl<'a> InitMessage<'a> {
    pub fn new(api_key: &'a str, stability: f32, similarity_boost: f32) -> Self {
        Self {
            text: " ",
            voice_settings: VoiceSettings {
                stability,
                similarity_boost,
            },
            xi_api_key: api_key,
        }
    }
}

/// Incremental text delta. An empty `text` is the flush sentinel: the
/// provider synthesizes whatever it still buffers and then reports `isFinal`.
#[derive(Debug, Serialize)]
pub struct TextMessage<'a> {
    pub text: &'a str,
    pub try_trigger_generation: bool,
}

impl<'a> TextMessage<'a> {
    pub fn delta(text: &'a str) -> Self {
        Self {
            text,
            try_trigger_generation: true,
        }
    }

    pub fn flush() -> TextMessage<'static> {
        TextMessage {
            text: "",
            try_trigger_generation: true,
        }
    }
}

// =============================================================================
// Incoming Messages (Server to Client)
// =============================================================================

/// One frame from the synthesis stream.
#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisMessage {
    /// Base64-encoded PCM chunk
    #[serde(default)]
    pub audio: Option<String>,

    /// Set on the last frame of the stream
    #[serde(default, rename = "isFinal")]
    pub is_final: Option<bool>,

    /// Provider-reported error
    #[serde(default)]
    pub error: Option<String>,

    /// Human-readable detail accompanying an error
    #[serde(default)]
    pub message: Option<String>,
}

impl SynthesisMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Decode the audio payload, if this frame carries one.
    pub fn decode_audio(&self) -> Option<Result<Bytes, base64::DecodeError>> {
        self.audio
            .as_deref()
            .map(|encoded| BASE64.decode(encoded).map(Bytes::from))
    }

    pub fn is_final(&self) -> bool {
        self.is_final == Some(true)
    }

    pub fn error_detail(&self) -> Option<String> {
        self.error.as_ref().map(|code| {
            match &self.message {
                Some(message) => format!("{code}: {message}"),
                None => code.clone(),
            }
        })
    }
}
