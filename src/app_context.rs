//! Application state shared by the service providers.

use std::sync::Arc;

use crate::{config::ConfigManager, lifecycle::Lifecycle};

/// Shared application state.
///
/// Built by the coordinator once the hardware is claimed and the control
/// loop is running.
pub struct AppState {
    /// Configuration manager for centralized config handling
    pub config_manager: Arc<ConfigManager>,
    /// Lifecycle handler of the running controller
    pub lifecycle: Arc<Lifecycle>,
}

impl AppState {
    pub fn new(config_manager: Arc<ConfigManager>, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            config_manager,
            lifecycle,
        }
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }
}
