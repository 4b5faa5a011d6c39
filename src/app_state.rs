use std::sync::Arc;

use crate::config::Config;
use crate::relay::RelayHandle;

/// Shared axum state: the relay task handle and the parsed config.
#[derive(Clone)]
pub struct AppState {
    pub relay: RelayHandle,
    pub config: Arc<Config>,
}

impl AppState {
    /// Spawns the relay task; must be called inside a tokio runtime.
    pub fn new(config: Config) -> Self {
        let relay = RelayHandle::spawn(config.limits());
        Self {
            relay,
            config: Arc::new(config),
        }
    }
}
