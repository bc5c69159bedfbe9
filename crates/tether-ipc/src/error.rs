//! Error types for the wire layer.

use thiserror::Error;

/// Errors that can occur while encoding, decoding, or framing messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// A value could not be converted into the wire value domain.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A frame payload did not decode into its declared kind.
    #[error("Malformed {kind} payload: {message}")]
    Malformed {
        kind: &'static str,
        message: String,
    },

    /// A frame exceeded the maximum payload length.
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// The frame header carried a kind byte nobody understands.
    #[error("Unknown message kind: {0:#04x}")]
    UnknownKind(u8),

    /// IO error on the underlying stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
