//! Process-wide session registry.
//!
//! A conversation is provisioned over HTTP before any socket exists: the
//! client receives an opaque identifier and presents it when opening its
//! WebSocket. The registry maps that identifier to the prompt/voice pair
//! chosen at provisioning time and guarantees each identifier is consumed by
//! at most one connection.

use dashmap::DashMap;
use uuid::Uuid;

/// Parameters chosen when a conversation session is provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// System prompt seeding every completion of this conversation.
    pub prompt: String,
    /// Synthesis voice identifier.
    pub voice_id: String,
}

#[derive(Debug)]
struct SessionEntry {
    config: SessionConfig,
    claimed: bool,
}

/// Table of provisioned sessions, shared across connection handlers.
///
/// The only cross-session state in the gateway. Claiming is atomic
/// check-and-mark under the map's shard guard, so a claim racing a concurrent
/// claim or disconnect resolves to exactly one winner.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a new session and return its fresh identifier.
    pub fn create(&self, prompt: String, voice_id: String) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(
            session_id.clone(),
            SessionEntry {
                config: SessionConfig { prompt, voice_id },
                claimed: false,
            },
        );
        session_id
    }

    /// Bind an identifier to an incoming connection.
    ///
    /// Returns `None` when the identifier is unknown or was already claimed;
    /// an identifier can be claimed exactly once.
    pub fn claim(&self, session_id: &str) -> Option<SessionConfig> {
        let mut entry = self.sessions.get_mut(session_id)?;
        if entry.claimed {
            return None;
        }
        entry.claimed = true;
        Some(entry.config.clone())
    }

    /// Remove a session on disconnect. Unknown identifiers are a no-op.
    pub fn release(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
