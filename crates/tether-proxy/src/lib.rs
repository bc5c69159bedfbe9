//! Controller-side proxy for an interface hosted in a subprocess.
//!
//! A [`Proxy`] spawns the subprocess, completes the channel handshake, and
//! starts a dispatch thread. Method calls made on the proxy are queued and
//! relayed fire-and-forget; events emitted by the interface are routed back
//! to subscribers registered with [`Proxy::on`].

mod config;
mod debounce;
mod dispatch;
mod error;
mod proxy;
mod queue;
mod registry;
mod spawn;
mod state;

pub use config::{
    Backpressure, ProxyConfig, HANDSHAKE_TIMEOUT_ENV, POLL_INTERVAL_ENV, QUEUE_CAPACITY_ENV,
};
pub use debounce::{debounce, debounce_with, Debounce};
pub use error::ProxyError;
pub use proxy::{Proxy, RemoteHandle};
pub use registry::{SubscriberRegistry, SubscriptionId};
pub use state::{ProxyState, TerminationReason};

pub use tether_ipc::{
    from_value, Args, InterfaceSpec, RemoteError, RemoteErrorKind, Value, DIAGNOSTIC_EVENT,
    EXIT_EVENT,
};

use std::time::Duration;

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Default capacity of the outbound call queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default time a closing proxy waits for the subprocess to exit on its own.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
