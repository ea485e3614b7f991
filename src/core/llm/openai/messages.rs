//! Request/response types and SSE framing for chat completions.

use serde::{Deserialize, Serialize};

// =============================================================================
// Request types
// =============================================================================

/// Streaming chat-completion request body.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub stream: bool,
}

/// One message of the conversation seed.
#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

// =============================================================================
// Response types
// =============================================================================

/// One parsed streaming chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl StreamChunk {
    /// The token delta carried by this chunk, if any.
    pub fn token(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
    }
}

// =============================================================================
// SSE framing
// =============================================================================

/// One server-sent event from the completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload (one JSON chunk).
    Data(String),
    /// The `[DONE]` terminator.
    Done,
}

/// Incremental splitter for the SSE byte stream.
///
/// Network reads can cut events anywhere; bytes are buffered until a full
/// `\n\n`-terminated event is available. Only `data:` fields are used - the
/// completions stream carries no event names or ids.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buffer: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every event completed by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let raw_event = self.buffer[..boundary].to_string();
            self.buffer.drain(..boundary + 2);

            for line in raw_event.lines() {
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim_start();
                if data == "[DONE]" {
                    events.push(SseEvent::Done);
                } else if !data.is_empty() {
                    events.push(SseEvent::Data(data.to_string()));
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are concise.",
                },
                ChatMessage {
                    role: "user",
                    content: "hello there",
                },
            ],
            temperature: 1.0,
            max_tokens: 50,
            top_p: 1.0,
            stream: true,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_tokens"], 50);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello there");
    }

    #[test]
    fn test_stream_chunk_token() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.token(), Some("Hello"));
    }

    #[test]
    fn test_stream_chunk_without_content() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.token(), None);
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_sse_buffer_splits_events() {
        let mut buffer = SseBuffer::new();
        let events = buffer.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"a\":1}".to_string()),
                SseEvent::Data("{\"b\":2}".to_string()),
            ]
        );
    }

    #[test]
    fn test_sse_buffer_handles_split_reads() {
        let mut buffer = SseBuffer::new();
        assert!(buffer.push(b"data: {\"tok").is_empty());
        let events = buffer.push(b"en\":true}\n\n");
        assert_eq!(events, vec![SseEvent::Data("{\"token\":true}".to_string())]);
    }

    #[test]
    fn test_sse_buffer_done_marker() {
        let mut buffer = SseBuffer::new();
        let events = buffer.push(b"data: [DONE]\n\n");
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn test_sse_buffer_ignores_non_data_lines() {
        let mut buffer = SseBuffer::new();
        let events = buffer.push(b": keep-alive comment\nevent: ping\n\ndata: {\"x\":1}\n\n");
        assert_eq!(events, vec![SseEvent::Data("{\"x\":1}".to_string())]);
    }
}
