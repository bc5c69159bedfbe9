//! Error types for the interface host.

use tether_ipc::{RemoteError, RemoteErrorKind, WireError};
use thiserror::Error;

/// Errors that stop the host loop.
#[derive(Debug, Error)]
pub enum HostError {
    /// The process was not launched by a controller.
    #[error("Not launched by a tether controller: {0} is not set")]
    NotHosted(&'static str),

    /// The controller could not be reached or the handshake went wrong.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The toolkit failed to initialize.
    #[error("Toolkit error: {0}")]
    Toolkit(String),

    /// The interface constructor rejected its arguments.
    #[error("Failed to build interface: {0}")]
    Build(InvokeError),

    /// Interface code tried to emit an event name the relay reserves.
    #[error("Event name `{0}` is reserved")]
    ReservedEvent(String),

    /// The channel was written to after it closed.
    #[error("Channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a call could not be applied to the interface.
///
/// These never stop the host loop; they are reported to the controller on
/// the diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("No method named `{0}`")]
    UnknownMethod(String),

    #[error("Expected {expected} positional argument(s), got {got}")]
    Arity { expected: usize, got: usize },

    #[error("Unexpected keyword argument `{0}`")]
    UnexpectedKeyword(String),

    #[error("Argument `{argument}` has the wrong type: {message}")]
    ArgumentType { argument: String, message: String },

    #[error("{0}")]
    Failed(String),
}

impl InvokeError {
    /// Returns the diagnostic category for this error.
    pub fn kind(&self) -> RemoteErrorKind {
        match self {
            Self::UnknownMethod(_) => RemoteErrorKind::UnknownMethod,
            Self::Arity { .. } | Self::UnexpectedKeyword(_) => RemoteErrorKind::Arity,
            Self::ArgumentType { .. } => RemoteErrorKind::ArgumentType,
            Self::Failed(_) => RemoteErrorKind::Failed,
        }
    }

    /// Convert into the payload published on the diagnostic event.
    pub fn into_remote(self, method: &str) -> RemoteError {
        RemoteError {
            method: method.to_string(),
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<HostError> for InvokeError {
    fn from(e: HostError) -> Self {
        Self::Failed(e.to_string())
    }
}
