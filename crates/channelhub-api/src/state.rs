//! Application state shared across all handlers.

use std::sync::Arc;

use channelhub_core::config::AppConfig;
use channelhub_realtime::ChannelHub;

/// Shared application state, cloned into every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// The running channel hub.
    pub hub: Arc<ChannelHub>,
}

impl AppState {
    /// Creates the state from its parts.
    pub fn new(config: Arc<AppConfig>, hub: Arc<ChannelHub>) -> Self {
        Self { config, hub }
    }
}
