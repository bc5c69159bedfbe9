//! Length-prefixed message framing.
//!
//! Every frame is a 4-byte big-endian payload length, a 1-byte kind, then the
//! payload. Payloads are JSON, so a frame can always be decoded without any
//! schema beyond its kind.

use std::io::{self, Read};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::message::{Message, MessageKind};
use crate::{WireResult, MAX_FRAME_LEN};

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 5;

/// Read buffer size for blocking reads.
const READ_CHUNK: usize = 8 * 1024;

/// Encode a message into a complete frame.
pub fn encode_message(message: &Message) -> WireResult<Bytes> {
    let payload = match message {
        Message::Hello(hello) => serde_json::to_vec(hello),
        Message::Init(init) => serde_json::to_vec(init),
        Message::Call(call) => serde_json::to_vec(call),
        Message::Event(event) => serde_json::to_vec(event),
        Message::Close => Ok(Vec::new()),
    }
    .map_err(|e| WireError::Serialization(e.to_string()))?;

    if payload.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_u8(message.kind().as_byte());
    frame.extend_from_slice(&payload);

    Ok(frame.freeze())
}

fn decode_payload(kind: MessageKind, payload: &[u8]) -> WireResult<Message> {
    let malformed = |e: serde_json::Error| WireError::Malformed {
        kind: kind.name(),
        message: e.to_string(),
    };

    let message = match kind {
        MessageKind::Hello => Message::Hello(serde_json::from_slice(payload).map_err(malformed)?),
        MessageKind::Init => Message::Init(serde_json::from_slice(payload).map_err(malformed)?),
        MessageKind::Call => Message::Call(serde_json::from_slice(payload).map_err(malformed)?),
        MessageKind::Event => Message::Event(serde_json::from_slice(payload).map_err(malformed)?),
        MessageKind::Close => Message::Close,
    };

    Ok(message)
}

/// Incremental decoder for a stream of frames.
///
/// Bytes are pushed as they arrive, in whatever chunks the stream produces,
/// and complete messages are popped one at a time.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete message, if one is buffered.
    ///
    /// `FrameTooLarge` leaves the stream unsynchronized and should be treated
    /// as fatal for the channel. Other errors consume the offending frame, so
    /// decoding may continue with the next one.
    pub fn next_message(&mut self) -> WireResult<Option<Message>> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &self.buf[..HEADER_LEN];
        let len = header.get_u32() as usize;
        let kind_byte = header.get_u8();

        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }

        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(len);

        let kind = MessageKind::from_byte(kind_byte).ok_or(WireError::UnknownKind(kind_byte))?;
        decode_payload(kind, &payload).map(Some)
    }
}

/// Read from a blocking stream until one message is decoded.
///
/// Returns `Ok(None)` if the stream reaches end of file first. Read timeouts
/// configured on the stream surface as `WireError::Io`.
pub fn read_message<R: Read>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
) -> WireResult<Option<Message>> {
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        if let Some(message) = decoder.next_message()? {
            return Ok(Some(message));
        }

        match reader.read(&mut chunk) {
            Ok(0) => return Ok(None),
            Ok(n) => decoder.push(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(WireError::Io(e)),
        }
    }
}
