//! Host configuration.

use std::time::Duration;

use tether_ipc::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_POLL_INTERVAL};
use tracing::warn;

/// Overrides the polling interval, in milliseconds. Shared with the
/// controller, whose environment the subprocess inherits.
pub const POLL_INTERVAL_ENV: &str = "TETHER_POLL_INTERVAL_MS";

/// Configuration for the interface host loop.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Sleep between loop ticks when there is nothing to do.
    pub poll_interval: Duration,

    /// Time allowed to connect to the controller and receive INIT.
    pub connect_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl HostConfig {
    /// Defaults, with overrides from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(POLL_INTERVAL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.poll_interval = Duration::from_millis(ms),
                _ => warn!(var = POLL_INTERVAL_ENV, value = %raw, "Ignoring invalid override"),
            }
        }
        config
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
