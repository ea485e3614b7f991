//! Deepgram live transcription WebSocket client.

mod client;
mod config;
mod messages;

pub use client::{DeepgramStt, SttHandle};
pub use config::{DEEPGRAM_STT_URL, DeepgramSttConfig};
pub use messages::{CloseStreamMessage, DeepgramMessage, KeepAliveMessage};
