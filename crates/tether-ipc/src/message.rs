//! Messages exchanged over the channel.

use serde::{Deserialize, Serialize};

use crate::records::{CallArgs, CallRecord, EventRecord};

/// Kind byte in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Subprocess is ready (host → controller).
    Hello = 0x01,

    /// Handshake confirmation with constructor arguments (controller → host).
    Init = 0x02,

    /// Method call (controller → host).
    Call = 0x10,

    /// Interface event (host → controller).
    Event = 0x11,

    /// Orderly shutdown notice (either direction).
    Close = 0x20,
}

impl MessageKind {
    /// Parse a kind byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Init),
            0x10 => Some(Self::Call),
            0x11 => Some(Self::Event),
            0x20 => Some(Self::Close),
            _ => None,
        }
    }

    /// The header byte for this kind.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns the wire name of this kind.
    pub fn name(self) -> &'static str {
        match self {
            Self::Hello => "HELLO",
            Self::Init => "INIT",
            Self::Call => "CALL",
            Self::Event => "EVENT",
            Self::Close => "CLOSE",
        }
    }
}

/// Readiness announcement sent by the subprocess once connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version spoken by the subprocess.
    pub protocol_version: u16,

    /// Name of the interface the subprocess is able to host.
    pub interface: String,

    /// Process id of the subprocess.
    pub pid: u32,
}

/// Handshake confirmation from the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Init {
    /// Interface the controller expects to drive.
    pub interface: String,

    /// Arguments for constructing the interface.
    pub args: CallArgs,
}

/// A single framed message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(Hello),
    Init(Init),
    Call(CallRecord),
    Event(EventRecord),
    Close,
}

impl Message {
    /// The frame kind this message is encoded as.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Hello(_) => MessageKind::Hello,
            Self::Init(_) => MessageKind::Init,
            Self::Call(_) => MessageKind::Call,
            Self::Event(_) => MessageKind::Event,
            Self::Close => MessageKind::Close,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_bytes() {
        for kind in [
            MessageKind::Hello,
            MessageKind::Init,
            MessageKind::Call,
            MessageKind::Event,
            MessageKind::Close,
        ] {
            assert_eq!(MessageKind::from_byte(kind.as_byte()), Some(kind));
        }
        assert_eq!(MessageKind::from_byte(0xFF), None);
    }

    #[test]
    fn test_message_kind() {
        assert_eq!(Message::Close.kind(), MessageKind::Close);
        assert_eq!(
            Message::Event(EventRecord::new("clicked", serde_json::Value::Null)).kind(),
            MessageKind::Event
        );
    }
}
