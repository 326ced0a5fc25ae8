//! Bridge configuration.

use std::time::Duration;

use tether_transport::LinkOptions;

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long a join, leave or user push waits for its reply.
    pub push_timeout: Duration,
    /// Interval between socket heartbeats.
    pub heartbeat_interval: Duration,
    /// Capacity of the inbound command queue.
    pub command_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            push_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            command_capacity: 256,
        }
    }
}

impl BridgeConfig {
    /// Options for the socket driver.
    #[must_use]
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}
