//! WebSocket message types for the Deepgram live transcription API.
//!
//! Incoming messages are distinguished by their `type` field:
//! - [`ResultsMessage`]: a transcript batch (interim or finalized)
//! - [`UtteranceEndMessage`]: silence after finalized fragments
//! - [`SpeechStartedMessage`]: voice activity detected
//! - [`ErrorMessage`]: provider-reported failure
//! - `Metadata`: per-request bookkeeping, ignored by the relay
//!
//! Outgoing control messages are JSON text frames; audio is sent as raw
//! binary frames with no wrapper.

use serde::{Deserialize, Serialize};

// =============================================================================
// Incoming Messages (Server to Client)
// =============================================================================

/// One transcription hypothesis inside a results batch.
#[derive(Debug, Clone, Deserialize)]
pub struct Alternative {
    /// Transcript text; empty when the batch carried no speech
    #[serde(default)]
    pub transcript: String,
    /// Aggregate confidence (0.0 to 1.0)
    #[serde(default)]
    pub confidence: f64,
}

/// Channel wrapper around the transcription alternatives.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

/// Transcript batch for a window of audio.
///
/// `is_final` marks a fragment the provider will not revise further;
/// `speech_final` additionally marks the provider's endpointing decision
/// that the speaker has finished the utterance.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultsMessage {
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub speech_final: bool,
    /// Window start in seconds from the beginning of the stream
    #[serde(default)]
    pub start: f64,
    /// Window duration in seconds
    #[serde(default)]
    pub duration: f64,
}

impl ResultsMessage {
    /// The first (best) alternative's transcript, or empty.
    pub fn transcript(&self) -> &str {
        self.channel
            .alternatives
            .first()
            .map(|alt| alt.transcript.as_str())
            .unwrap_or("")
    }
}

/// Silence detected after finalized fragments with no speech-final marker.
#[derive(Debug, Clone, Deserialize)]
pub struct UtteranceEndMessage {
    /// End time (seconds) of the last transcribed word
    #[serde(default)]
    pub last_word_end: f64,
}

/// Voice activity detected in the inbound audio.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechStartedMessage {
    #[serde(default)]
    pub timestamp: f64,
}

/// Provider-reported error.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorMessage {
    pub fn detail(&self) -> &str {
        self.description
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or("unknown error")
    }
}

/// Parsed incoming message, discriminated on the `type` field.
#[derive(Debug, Clone)]
pub enum DeepgramMessage {
    Results(ResultsMessage),
    UtteranceEnd(UtteranceEndMessage),
    SpeechStarted(SpeechStartedMessage),
    Metadata,
    Error(ErrorMessage),
    Unknown(String),
}

impl DeepgramMessage {
    /// Parse a text frame from the provider.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let message_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");

        match message_type {
            "Results" => Ok(Self::Results(serde_json::from_value(value)?)),
            "UtteranceEnd" => Ok(Self::UtteranceEnd(serde_json::from_value(value)?)),
            "SpeechStarted" => Ok(Self::SpeechStarted(serde_json::from_value(value)?)),
            "Metadata" => Ok(Self::Metadata),
            "Error" => Ok(Self::Error(serde_json::from_value(value)?)),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }
}

// =============================================================================
// Outgoing Messages (Client to Server)
// =============================================================================

/// Keep-alive sent periodically so the provider holds the stream open
/// through silent stretches.
#[derive(Debug, Clone, Serialize)]
pub struct KeepAliveMessage {
    #[serde(rename = "type")]
    pub message_type: &'static str,
}

impl Default for KeepAliveMessage {
    fn default() -> Self {
        Self {
            message_type: "KeepAlive",
        }
    }
}

/// Graceful shutdown request; the provider flushes pending results and
/// closes the stream.
#[derive(Debug, Clone, Serialize)]
pub struct CloseStreamMessage {
    #[serde(rename = "type")]
    pub message_type: &'static str,
}

impl Default for CloseStreamMessage {
    fn default() -> Self {
        Self {
            message_type: "CloseStream",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interim_results() {
        let msg = DeepgramMessage::parse(
            r#"{"type":"Results","channel":{"alternatives":[{"transcript":"hello wor","confidence":0.82}]},"is_final":false,"speech_final":false,"start":0.0,"duration":1.0}"#,
        )
        .unwrap();

        match msg {
            DeepgramMessage::Results(results) => {
                assert_eq!(results.transcript(), "hello wor");
                assert!(!results.is_final);
                assert!(!results.speech_final);
            }
            other => panic!("Expected Results, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_speech_final_results() {
        let msg = DeepgramMessage::parse(
            r#"{"type":"Results","channel":{"alternatives":[{"transcript":"hello world","confidence":0.97}]},"is_final":true,"speech_final":true}"#,
        )
        .unwrap();

        match msg {
            DeepgramMessage::Results(results) => {
                assert_eq!(results.transcript(), "hello world");
                assert!(results.is_final);
                assert!(results.speech_final);
            }
            other => panic!("Expected Results, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_results_without_alternatives() {
        let msg =
            DeepgramMessage::parse(r#"{"type":"Results","channel":{"alternatives":[]}}"#).unwrap();
        match msg {
            DeepgramMessage::Results(results) => assert_eq!(results.transcript(), ""),
            other => panic!("Expected Results, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_utterance_end() {
        let msg =
            DeepgramMessage::parse(r#"{"type":"UtteranceEnd","last_word_end":2.35}"#).unwrap();
        assert!(matches!(msg, DeepgramMessage::UtteranceEnd(_)));
    }

    #[test]
    fn test_parse_error_message() {
        let msg = DeepgramMessage::parse(r#"{"type":"Error","description":"bad audio"}"#).unwrap();
        match msg {
            DeepgramMessage::Error(err) => assert_eq!(err.detail(), "bad audio"),
            other => panic!("Expected Error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_unknown_type() {
        let msg = DeepgramMessage::parse(r#"{"type":"Finalize"}"#).unwrap();
        match msg {
            DeepgramMessage::Unknown(kind) => assert_eq!(kind, "Finalize"),
            other => panic!("Expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_keepalive_serialization() {
        let json = serde_json::to_string(&KeepAliveMessage::default()).unwrap();
        assert_eq!(json, r#"{"type":"KeepAlive"}"#);
    }

    #[test]
    fn test_close_stream_serialization() {
        let json = serde_json::to_string(&CloseStreamMessage::default()).unwrap();
        assert_eq!(json, r#"{"type":"CloseStream"}"#);
    }
}
