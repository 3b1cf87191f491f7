pub mod registry;

use crate::broadcast::Hub;
use crate::config::Config;
pub use registry::Registry;

/// Shared application state
pub struct AppState {
    pub config: Config,
    /// Who is logged in
    pub registry: Registry,
    /// Every open connection, logged in or not
    pub hub: Hub,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let hub = Hub::new(config.outbound_queue);
        Self {
            config,
            registry: Registry::new(),
            hub,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
