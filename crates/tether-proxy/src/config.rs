//! Proxy configuration.

use std::time::Duration;

use tether_ipc::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_POLL_INTERVAL};
use tracing::warn;

use crate::{DEFAULT_QUEUE_CAPACITY, DEFAULT_SHUTDOWN_GRACE};

/// Overrides the polling interval, in milliseconds.
pub const POLL_INTERVAL_ENV: &str = "TETHER_POLL_INTERVAL_MS";

/// Overrides the handshake timeout, in milliseconds.
pub const HANDSHAKE_TIMEOUT_ENV: &str = "TETHER_HANDSHAKE_TIMEOUT_MS";

/// Overrides the outbound queue capacity.
pub const QUEUE_CAPACITY_ENV: &str = "TETHER_QUEUE_CAPACITY";

/// What an invoke does when the outbound queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backpressure {
    /// Fail immediately with `QueueFull`.
    #[default]
    Reject,

    /// Wait up to the given duration for room, then fail with `QueueFull`.
    Block(Duration),
}

/// Configuration for a proxy instance.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Time allowed for the subprocess to connect and say hello.
    pub handshake_timeout: Duration,

    /// Upper bound on the latency of each relay direction.
    pub poll_interval: Duration,

    /// Maximum number of queued, unsent calls.
    pub queue_capacity: usize,

    /// Behavior when the queue is full.
    pub backpressure: Backpressure,

    /// Time `close` waits for the subprocess to exit before killing it.
    pub shutdown_grace: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backpressure: Backpressure::Reject,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl ProxyConfig {
    /// Defaults, with overrides from `TETHER_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides looked up by variable name. Unparseable values are
    /// logged and ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ms) = parse_override(POLL_INTERVAL_ENV, lookup(POLL_INTERVAL_ENV)) {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_override(HANDSHAKE_TIMEOUT_ENV, lookup(HANDSHAKE_TIMEOUT_ENV)) {
            self.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(capacity) = parse_override(QUEUE_CAPACITY_ENV, lookup(QUEUE_CAPACITY_ENV)) {
            self.queue_capacity = capacity as usize;
        }
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

fn parse_override(name: &str, raw: Option<String>) -> Option<u64> {
    let raw = raw?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            warn!(variable = name, value = %raw, "Ignoring invalid configuration override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.backpressure, Backpressure::Reject);
    }

    #[test]
    fn test_overrides() {
        let config = ProxyConfig::default().with_overrides(|name| match name {
            POLL_INTERVAL_ENV => Some("25".to_string()),
            QUEUE_CAPACITY_ENV => Some(" 8 ".to_string()),
            _ => None,
        });

        assert_eq!(config.poll_interval, Duration::from_millis(25));
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
    }

    #[test]
    fn test_invalid_overrides_ignored() {
        let config = ProxyConfig::default().with_overrides(|name| match name {
            POLL_INTERVAL_ENV => Some("fast".to_string()),
            HANDSHAKE_TIMEOUT_ENV => Some("0".to_string()),
            _ => None,
        });

        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
    }

    #[test]
    fn test_builder() {
        let config = ProxyConfig::default()
            .with_queue_capacity(4)
            .with_backpressure(Backpressure::Block(Duration::from_millis(50)))
            .with_shutdown_grace(Duration::ZERO);

        assert_eq!(config.queue_capacity, 4);
        assert_eq!(
            config.backpressure,
            Backpressure::Block(Duration::from_millis(50))
        );
        assert_eq!(config.shutdown_grace, Duration::ZERO);
    }
}
