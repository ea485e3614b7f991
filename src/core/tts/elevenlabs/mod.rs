//! ElevenLabs streaming-input synthesis WebSocket client.

mod client;
mod config;
mod messages;

pub use client::{ElevenLabsTts, TtsHandle};
pub(crate) use client::TtsInput;
pub use config::{ELEVENLABS_TTS_URL, ElevenLabsTtsConfig};
pub use messages::{InitMessage, SynthesisMessage, TextMessage, VoiceSettings};
