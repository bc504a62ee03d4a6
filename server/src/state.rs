use std::time::Duration;

use crate::hub::HubHandle;

/// Ping cadence for every connection actor.
#[derive(Debug, Clone, Copy)]
pub struct Keepalive {
    /// How often the server pings each client.
    pub ping_interval: Duration,
    /// How long a client has to answer a ping before it is closed.
    pub pong_timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the hub task that owns the connection registry
    pub hub: HubHandle,
    pub keepalive: Keepalive,
}
