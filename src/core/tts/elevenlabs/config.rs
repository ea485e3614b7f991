//! Configuration for the ElevenLabs streaming-input synthesis API.

use crate::core::tts::TtsError;

/// Default ElevenLabs text-to-speech endpoint root.
pub const ELEVENLABS_TTS_URL: &str = "wss://api.elevenlabs.io/v1/text-to-speech";

/// Configuration for one streaming synthesis session.
#[derive(Debug, Clone)]
pub struct ElevenLabsTtsConfig {
    /// ElevenLabs API key (sent in the bootstrap message, not a header)
    pub api_key: String,

    /// WebSocket endpoint root; overridable so tests can target a mock server
    pub base_url: String,

    /// Voice to synthesize with
    pub voice_id: String,

    /// Synthesis model
    pub model_id: String,

    /// Output encoding; `pcm_16000` is raw 16-bit PCM at 16kHz
    pub output_format: String,

    /// Output sample rate implied by `output_format`, used by the relay to
    /// convert toward the client's playback rate
    pub sample_rate: u32,

    /// Voice stability (0.0 to 1.0)
    pub stability: f32,

    /// Voice similarity boost (0.0 to 1.0)
    pub similarity_boost: f32,
}

impl Default for ElevenLabsTtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: ELEVENLABS_TTS_URL.to_string(),
            voice_id: String::new(),
            model_id: "eleven_turbo_v2_5".to_string(),
            output_format: "pcm_16000".to_string(),
            sample_rate: 16000,
            stability: 0.5,
            similarity_boost: 0.5,
        }
    }
}

impl ElevenLabsTtsConfig {
    /// Build the stream-input WebSocket URL for the configured voice.
    pub fn build_websocket_url(&self) -> String {
        format!(
            "{}/{}/stream-input?model_id={}&output_format={}",
            self.base_url.trim_end_matches('/'),
            self.voice_id,
            self.model_id,
            self.output_format,
        )
    }

    pub fn validate(&self) -> Result<(), TtsError> {
        if self.api_key.is_empty() {
            return Err(TtsError::InvalidConfiguration(
                "API key is required for ElevenLabs TTS".to_string(),
            ));
        }
        if self.voice_id.is_empty() {
            return Err(TtsError::InvalidConfiguration(
                "Voice ID is required for ElevenLabs TTS".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url_generation() {
        let config = ElevenLabsTtsConfig {
            api_key: "test_key".to_string(),
            voice_id: "nPczCjzI2devNBz1zQrb".to_string(),
            ..Default::default()
        };
        let url = config.build_websocket_url();

        assert_eq!(
            url,
            "wss://api.elevenlabs.io/v1/text-to-speech/nPczCjzI2devNBz1zQrb/stream-input?model_id=eleven_turbo_v2_5&output_format=pcm_16000"
        );
    }

    #[test]
    fn test_validate_requires_voice() {
        let config = ElevenLabsTtsConfig {
            api_key: "test_key".to_string(),
            ..Default::default()
        };
        match config.validate() {
            Err(TtsError::InvalidConfiguration(msg)) => assert!(msg.contains("Voice ID")),
            other => panic!("Expected InvalidConfiguration, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = ElevenLabsTtsConfig {
            voice_id: "voice".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TtsError::InvalidConfiguration(_))
        ));
    }
}
