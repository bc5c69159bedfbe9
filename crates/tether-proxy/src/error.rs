//! Error types for the proxy.

use std::time::Duration;

use tether_ipc::WireError;
use thiserror::Error;

/// Errors surfaced to controller code.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The subprocess could not be started, or exited before connecting.
    #[error("Failed to spawn interface subprocess: {0}")]
    Spawn(String),

    /// The subprocess did not complete the handshake in time.
    #[error("Interface subprocess did not complete the handshake within {0:?}")]
    HandshakeTimeout(Duration),

    /// The subprocess connected but the handshake was invalid.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// An argument could not be encoded. The call was not queued.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The interface does not declare the called method.
    #[error("Interface `{interface}` has no method `{method}`")]
    UnknownMethod {
        interface: &'static str,
        method: String,
    },

    /// The outbound queue is full.
    #[error("Outbound queue is full")]
    QueueFull,

    /// The channel to the subprocess is gone.
    #[error("Interface subprocess is disconnected")]
    Disconnected,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WireError> for ProxyError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(e) => Self::Io(e),
            other => Self::Serialization(other.to_string()),
        }
    }
}
