//! Shared application state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::registry::SessionRegistry;

/// State shared with every request handler.
///
/// The session registry lives here rather than in a global so ownership is
/// explicit and tests can build isolated instances.
#[derive(Debug)]
pub struct AppState {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: SessionRegistry::new(),
        })
    }
}
