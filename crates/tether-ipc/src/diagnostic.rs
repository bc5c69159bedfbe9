//! Payload of the diagnostic event reported for failed remote calls.

use serde::{Deserialize, Serialize};

/// Why a call could not be applied to the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// No method with that name is registered.
    UnknownMethod,

    /// Wrong number of positional arguments, or a keyword the method does
    /// not take.
    Arity,

    /// An argument did not decode into the expected type.
    ArgumentType,

    /// The method itself reported a failure.
    Failed,
}

/// A remote invocation failure, as published on the diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Method that was called.
    pub method: String,

    /// Failure category.
    pub kind: RemoteErrorKind,

    /// Human readable detail.
    pub message: String,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "remote call `{}` failed: {}", self.method, self.message)
    }
}

impl std::error::Error for RemoteError {}
