//! Provider session handles for the three streaming services.
//!
//! Each submodule wraps one provider connection behind the same contract:
//! `open` spawns a connection-owning task and returns a handle immediately,
//! `send` enqueues outbound chunks on a bounded channel (buffered while the
//! connection is still being established), events arrive on an mpsc receiver
//! consumed by the owning relay, and `close` is an idempotent best-effort
//! shutdown.

pub mod llm;
pub mod stt;
pub mod tts;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// Lifecycle of a provider connection.
///
/// `Errored` is absorbing: a handle that failed never becomes usable again;
/// the relay reacts by tearing down whatever work depended on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandleState {
    #[default]
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

impl HandleState {
    /// Terminal states reject further sends.
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandleState::Closed | HandleState::Errored)
    }
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleState::Connecting => write!(f, "Connecting"),
            HandleState::Open => write!(f, "Open"),
            HandleState::Closing => write!(f, "Closing"),
            HandleState::Closed => write!(f, "Closed"),
            HandleState::Errored => write!(f, "Errored"),
        }
    }
}

/// State cell shared between a handle and its connection task.
pub(crate) type SharedHandleState = Arc<RwLock<HandleState>>;

pub(crate) fn new_handle_state() -> SharedHandleState {
    Arc::new(RwLock::new(HandleState::Connecting))
}
