//! Configuration for the Deepgram live transcription API.

use std::time::Duration;

use crate::core::stt::SttError;

/// Default Deepgram streaming endpoint.
pub const DEEPGRAM_STT_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Minimum supported sample rate (8kHz for telephony)
pub const MIN_SAMPLE_RATE: u32 = 8000;

/// Maximum supported sample rate (48kHz for high-quality audio)
pub const MAX_SAMPLE_RATE: u32 = 48000;

/// Configuration for a Deepgram live transcription session.
///
/// Audio is raw linear PCM (`encoding=linear16`); endpointing and
/// utterance-end windows drive the relay's turn detection.
#[derive(Debug, Clone)]
pub struct DeepgramSttConfig {
    /// Deepgram API key
    pub api_key: String,

    /// WebSocket endpoint; overridable so tests can target a mock server
    pub base_url: String,

    /// Transcription model
    pub model: String,

    /// BCP-47 language tag
    pub language: String,

    /// Input sample rate in Hz
    pub sample_rate: u32,

    /// Apply provider-side punctuation/formatting
    pub smart_format: bool,

    /// Ask the provider not to batch results for accuracy
    pub no_delay: bool,

    /// Deliver provisional transcripts
    pub interim_results: bool,

    /// Silence window (ms) after which a fragment is finalized
    pub endpointing_ms: u32,

    /// Silence window (ms) after which an utterance-end event fires
    pub utterance_end_ms: u32,

    /// Interval between keep-alive messages while the connection is idle
    pub keepalive_interval: Duration,
}

impl Default for DeepgramSttConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEEPGRAM_STT_URL.to_string(),
            model: "nova-2".to_string(),
            language: "en".to_string(),
            sample_rate: 16000,
            smart_format: true,
            no_delay: true,
            interim_results: true,
            endpointing_ms: 300,
            utterance_end_ms: 1000,
            keepalive_interval: Duration::from_secs(10),
        }
    }
}

impl DeepgramSttConfig {
    /// Build the WebSocket URL with all query parameters.
    pub fn build_websocket_url(&self) -> String {
        format!(
            "{}?model={}&language={}&smart_format={}&no_delay={}&interim_results={}&endpointing={}&utterance_end_ms={}&encoding=linear16&sample_rate={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.language,
            self.smart_format,
            self.no_delay,
            self.interim_results,
            self.endpointing_ms,
            self.utterance_end_ms,
            self.sample_rate,
        )
    }

    /// Validate the configuration before opening a connection.
    pub fn validate(&self) -> Result<(), SttError> {
        if self.api_key.is_empty() {
            return Err(SttError::AuthenticationFailed(
                "API key is required for Deepgram STT".to_string(),
            ));
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(SttError::ConfigurationError(format!(
                "Sample rate {} Hz is outside supported range ({}-{} Hz)",
                self.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        Ok(())
    }
}
