//! Typed controller<->interface messages for tether.
//!
//! This crate defines the records relayed between a controller process and
//! the interface subprocess it drives, the framing used to carry them over a
//! byte stream, and the constants both sides agree on.

mod codec;
mod diagnostic;
mod error;
mod interface;
mod message;
mod records;
mod value;

pub use codec::{encode_message, read_message, FrameDecoder, HEADER_LEN};
pub use diagnostic::{RemoteError, RemoteErrorKind};
pub use error::WireError;
pub use interface::InterfaceSpec;
pub use message::{Hello, Init, Message, MessageKind};
pub use records::{Args, CallArgs, CallRecord, EventRecord};
pub use value::{from_value, to_value, Value};

use std::time::Duration;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Protocol version announced in the handshake.
pub const PROTOCOL_VERSION: u16 = 1;

/// Maximum payload length of a single frame (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Environment variable carrying the controller's listener address.
pub const CHANNEL_ADDR_ENV: &str = "TETHER_CHANNEL_ADDR";

/// Environment variable carrying the name of the interface to host.
pub const INTERFACE_ENV: &str = "TETHER_INTERFACE";

/// Reserved event name for failed remote invocations.
pub const DIAGNOSTIC_EVENT: &str = "tether.error";

/// Reserved event name published once when a proxy terminates.
pub const EXIT_EVENT: &str = "exit";

/// Returns true for event names only the relay itself may emit.
pub fn is_reserved_event(name: &str) -> bool {
    name == DIAGNOSTIC_EVENT || name == EXIT_EVENT
}

/// Default polling interval for both ends of the channel.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default time allowed for the subprocess to connect and say hello.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
