//! Configuration for the OpenAI chat-completions API.

use crate::core::llm::LlmError;

/// Default OpenAI API base URL.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Configuration for streaming chat completions.
#[derive(Debug, Clone)]
pub struct OpenAiChatConfig {
    /// OpenAI API key
    pub api_key: String,

    /// API base URL; overridable so tests can target a mock server
    pub api_base: String,

    /// Chat model
    pub model: String,

    /// Sampling temperature (0.0 to 2.0)
    pub temperature: f32,

    /// Response length cap; conversational replies are kept short so
    /// synthesis starts quickly
    pub max_tokens: u32,

    /// Nucleus sampling parameter
    pub top_p: f32,
}

impl Default for OpenAiChatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: OPENAI_API_BASE.to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 1.0,
            max_tokens: 50,
            top_p: 1.0,
        }
    }
}

impl OpenAiChatConfig {
    /// Endpoint for streaming chat completions.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::ConfigurationError(
                "API key is required for OpenAI completions".to_string(),
            ));
        }
        if self.model.is_empty() {
            return Err(LlmError::ConfigurationError(
                "Model name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
