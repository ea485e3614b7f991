//! Server configuration.
//!
//! Configuration is loaded from a YAML file, environment variables, and .env
//! values. Priority: YAML > ENV vars > defaults. Provider API keys are
//! validated at startup so a misconfigured deployment fails fast instead of
//! failing on the first conversation.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::core::llm::OpenAiChatConfig;
use crate::core::stt::DeepgramSttConfig;
use crate::core::tts::ElevenLabsTtsConfig;
use crate::relay::AudioParams;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing provider API keys: {0}")]
    MissingApiKeys(String),
}

/// Transcription tunables.
#[derive(Debug, Clone)]
pub struct SttSettings {
    pub model: String,
    pub language: String,
    pub sample_rate: u32,
    /// Silence window (ms) after which a fragment is finalized
    pub endpointing_ms: u32,
    /// Silence window (ms) after which an utterance-end event fires
    pub utterance_end_ms: u32,
    /// Seconds between keep-alive messages
    pub keepalive_secs: u64,
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            model: "nova-2".to_string(),
            language: "en".to_string(),
            sample_rate: 16000,
            endpointing_ms: 300,
            utterance_end_ms: 1000,
            keepalive_secs: 10,
        }
    }
}

/// Completion tunables.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 1.0,
            max_tokens: 50,
            top_p: 1.0,
        }
    }
}

/// Synthesis tunables. The voice itself is chosen per session.
#[derive(Debug, Clone)]
pub struct TtsSettings {
    pub model_id: String,
    pub output_format: String,
    pub sample_rate: u32,
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            model_id: "eleven_turbo_v2_5".to_string(),
            output_format: "pcm_16000".to_string(),
            sample_rate: 16000,
            stability: 0.5,
            similarity_boost: 0.5,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    /// Comma-separated allowed origins, or "*" for any. None = same-origin.
    pub cors_allowed_origins: Option<String>,

    // Provider API keys
    pub deepgram_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,

    /// Sample rate of the client's microphone audio
    pub client_sample_rate: u32,

    pub stt: SttSettings,
    pub llm: LlmSettings,
    pub tts: TtsSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_allowed_origins: None,
            deepgram_api_key: None,
            openai_api_key: None,
            elevenlabs_api_key: None,
            client_sample_rate: 16000,
            stt: SttSettings::default(),
            llm: LlmSettings::default(),
            tts: TtsSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = env_var("HOST") {
            config.host = host;
        }
        if let Some(port) = env_var("PORT") {
            config.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("Invalid PORT value: {port}")))?;
        }
        config.cors_allowed_origins = env_var("CORS_ALLOWED_ORIGINS");
        config.deepgram_api_key = env_var("DEEPGRAM_API_KEY");
        config.openai_api_key = env_var("OPENAI_API_KEY");
        config.elevenlabs_api_key = env_var("ELEVENLABS_API_KEY");
        if let Some(model) = env_var("LLM_MODEL") {
            config.llm.model = model;
        }
        if let Some(model) = env_var("STT_MODEL") {
            config.stt.model = model;
        }
        if let Some(model_id) = env_var("TTS_MODEL_ID") {
            config.tts.model_id = model_id;
        }

        Ok(config)
    }

    /// Load configuration from a YAML file, with environment variables as
    /// fallback for anything the file does not set.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let yaml: YamlConfig = serde_yaml::from_str(contents)?;
        let mut config = Self::from_env()?;
        yaml.apply(&mut config);
        Ok(config)
    }

    /// Bind address for the listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Fail fast when any provider API key is missing.
    pub fn validate_provider_keys(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.deepgram_api_key.is_none() {
            missing.push("DEEPGRAM_API_KEY");
        }
        if self.openai_api_key.is_none() {
            missing.push("OPENAI_API_KEY");
        }
        if self.elevenlabs_api_key.is_none() {
            missing.push("ELEVENLABS_API_KEY");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingApiKeys(missing.join(", ")))
        }
    }

    /// Transcription client configuration.
    pub fn deepgram_config(&self) -> DeepgramSttConfig {
        DeepgramSttConfig {
            api_key: self.deepgram_api_key.clone().unwrap_or_default(),
            model: self.stt.model.clone(),
            language: self.stt.language.clone(),
            sample_rate: self.stt.sample_rate,
            endpointing_ms: self.stt.endpointing_ms,
            utterance_end_ms: self.stt.utterance_end_ms,
            keepalive_interval: Duration::from_secs(self.stt.keepalive_secs),
            ..Default::default()
        }
    }

    /// Completion client configuration.
    pub fn openai_config(&self) -> OpenAiChatConfig {
        OpenAiChatConfig {
            api_key: self.openai_api_key.clone().unwrap_or_default(),
            model: self.llm.model.clone(),
            temperature: self.llm.temperature,
            max_tokens: self.llm.max_tokens,
            top_p: self.llm.top_p,
            ..Default::default()
        }
    }

    /// Synthesis client configuration for the session's chosen voice.
    pub fn elevenlabs_config(&self, voice_id: &str) -> ElevenLabsTtsConfig {
        ElevenLabsTtsConfig {
            api_key: self.elevenlabs_api_key.clone().unwrap_or_default(),
            voice_id: voice_id.to_string(),
            model_id: self.tts.model_id.clone(),
            output_format: self.tts.output_format.clone(),
            sample_rate: self.tts.sample_rate,
            stability: self.tts.stability,
            similarity_boost: self.tts.similarity_boost,
            ..Default::default()
        }
    }

    /// Sample-rate domains for the relay's audio conversions.
    pub fn audio_params(&self) -> AudioParams {
        AudioParams {
            client_sample_rate: self.client_sample_rate,
            stt_sample_rate: self.stt.sample_rate,
            tts_sample_rate: self.tts.sample_rate,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

// =============================================================================
// YAML layer
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    host: Option<String>,
    port: Option<u16>,
    cors_allowed_origins: Option<String>,
    client_sample_rate: Option<u32>,
    providers: Option<YamlProviders>,
    stt: Option<YamlStt>,
    llm: Option<YamlLlm>,
    tts: Option<YamlTts>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlProviders {
    deepgram_api_key: Option<String>,
    openai_api_key: Option<String>,
    elevenlabs_api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlStt {
    model: Option<String>,
    language: Option<String>,
    sample_rate: Option<u32>,
    endpointing_ms: Option<u32>,
    utterance_end_ms: Option<u32>,
    keepalive_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlLlm {
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    top_p: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlTts {
    model_id: Option<String>,
    output_format: Option<String>,
    sample_rate: Option<u32>,
    stability: Option<f32>,
    similarity_boost: Option<f32>,
}

impl YamlConfig {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(origins) = self.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }
        if let Some(rate) = self.client_sample_rate {
            config.client_sample_rate = rate;
        }

        if let Some(providers) = self.providers {
            if let Some(key) = providers.deepgram_api_key {
                config.deepgram_api_key = Some(key);
            }
            if let Some(key) = providers.openai_api_key {
                config.openai_api_key = Some(key);
            }
            if let Some(key) = providers.elevenlabs_api_key {
                config.elevenlabs_api_key = Some(key);
            }
        }

        if let Some(stt) = self.stt {
            if let Some(model) = stt.model {
                config.stt.model = model;
            }
            if let Some(language) = stt.language {
                config.stt.language = language;
            }
            if let Some(rate) = stt.sample_rate {
                config.stt.sample_rate = rate;
            }
            if let Some(ms) = stt.endpointing_ms {
                config.stt.endpointing_ms = ms;
            }
            if let Some(ms) = stt.utterance_end_ms {
                config.stt.utterance_end_ms = ms;
            }
            if let Some(secs) = stt.keepalive_secs {
                config.stt.keepalive_secs = secs;
            }
        }

        if let Some(llm) = self.llm {
            if let Some(model) = llm.model {
                config.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                config.llm.temperature = temperature;
            }
            if let Some(max_tokens) = llm.max_tokens {
                config.llm.max_tokens = max_tokens;
            }
            if let Some(top_p) = llm.top_p {
                config.llm.top_p = top_p;
            }
        }

        if let Some(tts) = self.tts {
            if let Some(model_id) = tts.model_id {
                config.tts.model_id = model_id;
            }
            if let Some(format) = tts.output_format {
                config.tts.output_format = format;
            }
            if let Some(rate) = tts.sample_rate {
                config.tts.sample_rate = rate;
            }
            if let Some(stability) = tts.stability {
                config.tts.stability = stability;
            }
            if let Some(boost) = tts.similarity_boost {
                config.tts.similarity_boost = boost;
            }
        }
    }
}
