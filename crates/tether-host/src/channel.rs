//! The subprocess end of the channel.
//!
//! The socket is split into a reader owned by the host loop and a writer
//! shared, through [`Emitter`], with the interface and any toolkit callbacks
//! it registers. Everything here runs on the host's single thread.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use serde::Serialize;
use tether_ipc::{
    encode_message, is_reserved_event, EventRecord, FrameDecoder, Message, WireError,
};
use tracing::{debug, trace, warn};

use crate::error::HostError;
use crate::HostResult;

const READ_CHUNK: usize = 16 * 1024;

/// Read side of the host channel.
pub(crate) struct ChannelReader {
    stream: TcpStream,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

/// What a poll of the channel found.
#[derive(Debug, Default)]
pub(crate) struct Polled {
    pub messages: Vec<Message>,
    pub eof: bool,
}

impl ChannelReader {
    pub fn new(stream: TcpStream, decoder: FrameDecoder) -> Self {
        Self {
            stream,
            decoder,
            read_buf: vec![0u8; READ_CHUNK],
        }
    }

    /// Read whatever is available without blocking and decode it.
    pub fn poll(&mut self) -> HostResult<Polled> {
        let mut polled = Polled::default();

        loop {
            match self.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    polled.eof = true;
                    break;
                }
                Ok(n) => self.decoder.push(&self.read_buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_disconnect(&e) => {
                    polled.eof = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        loop {
            match self.decoder.next_message() {
                Ok(Some(message)) => polled.messages.push(message),
                Ok(None) => break,
                Err(e @ WireError::FrameTooLarge { .. }) => return Err(e.into()),
                Err(e) => warn!(error = %e, "Dropping undecodable frame"),
            }
        }

        Ok(polled)
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

/// Write side of the host channel.
pub(crate) struct ChannelWriter {
    stream: TcpStream,
    pending: BytesMut,
    closed: bool,
    events_sent: u64,
}

impl ChannelWriter {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            pending: BytesMut::new(),
            closed: false,
            events_sent: 0,
        }
    }

    fn queue(&mut self, message: &Message) -> HostResult<()> {
        if self.closed {
            return Err(HostError::ChannelClosed);
        }
        let frame = encode_message(message)?;
        self.pending.extend_from_slice(&frame);
        Ok(())
    }

    /// Write what the socket accepts without blocking.
    pub fn flush(&mut self) -> HostResult<()> {
        while !self.pending.is_empty() {
            match self.stream.write(&self.pending) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => self.pending.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.closed = true;
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Queue CLOSE and keep flushing until everything is written or
    /// `timeout` passes. The writer refuses further events afterwards.
    pub fn close(&mut self, timeout: Duration) {
        if self.closed {
            return;
        }
        if let Err(e) = self.queue(&Message::Close) {
            warn!(error = %e, "Failed to queue CLOSE");
        }
        self.closed = true;

        let deadline = Instant::now() + timeout;
        while !self.pending.is_empty() && Instant::now() < deadline {
            match self.stream.write(&self.pending) {
                Ok(0) => break,
                Ok(n) => self.pending.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(1))
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(error = %e, "Controller already gone while closing");
                    break;
                }
            }
        }
    }

    /// Stop accepting events without notifying the controller.
    pub fn abandon(&mut self) {
        self.closed = true;
        self.pending.clear();
    }

    pub fn events_sent(&self) -> u64 {
        self.events_sent
    }
}

/// Sends events to the controller.
///
/// Cheap to clone. Interfaces keep one to emit from toolkit callbacks.
#[derive(Clone)]
pub struct Emitter {
    writer: Rc<RefCell<ChannelWriter>>,
}

impl Emitter {
    pub(crate) fn new(writer: ChannelWriter) -> Self {
        Self {
            writer: Rc::new(RefCell::new(writer)),
        }
    }

    /// Encode an event and write it to the channel without waiting for the
    /// controller to receive it. The `exit` and `tether.error` names are
    /// reserved and fail with [`HostError::ReservedEvent`].
    pub fn emit<P: Serialize>(&self, name: &str, payload: P) -> HostResult<()> {
        if is_reserved_event(name) {
            return Err(HostError::ReservedEvent(name.to_string()));
        }
        let event = EventRecord::with_payload(name, payload)?;
        self.emit_record(event)
    }

    pub(crate) fn emit_record(&self, event: EventRecord) -> HostResult<()> {
        let mut writer = self.writer.borrow_mut();
        trace!(event = %event.name, "Emitting event");
        writer.queue(&Message::Event(event))?;
        writer.events_sent += 1;
        writer.flush()
    }

    pub(crate) fn flush(&self) -> HostResult<()> {
        self.writer.borrow_mut().flush()
    }

    pub(crate) fn close(&self, timeout: Duration) {
        self.writer.borrow_mut().close(timeout);
    }

    pub(crate) fn abandon(&self) {
        self.writer.borrow_mut().abandon();
    }

    pub(crate) fn events_sent(&self) -> u64 {
        self.writer.borrow().events_sent()
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.writer.try_borrow() {
            Ok(writer) => f
                .debug_struct("Emitter")
                .field("pending_bytes", &writer.pending.len())
                .field("closed", &writer.closed)
                .finish(),
            Err(_) => f.debug_struct("Emitter").finish_non_exhaustive(),
        }
    }
}

/// Split a connected stream into the host loop's reader and an emitter.
pub(crate) fn split(stream: TcpStream, decoder: FrameDecoder) -> io::Result<(ChannelReader, Emitter)> {
    stream.set_nonblocking(true)?;
    let writer = ChannelWriter::new(stream.try_clone()?);
    Ok((ChannelReader::new(stream, decoder), Emitter::new(writer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::TcpListener;
    use tether_ipc::{read_message, CallArgs, CallRecord, DIAGNOSTIC_EVENT, EXIT_EVENT};

    fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    #[test]
    fn test_emit_writes_event_frame() {
        let (mut controller, host) = stream_pair();
        let (_reader, emitter) = split(host, FrameDecoder::new()).unwrap();

        emitter.emit("clicked", 7).unwrap();
        emitter.emit("clicked", "x").unwrap();

        let mut decoder = FrameDecoder::new();
        for expected in [json!(7), json!("x")] {
            match read_message(&mut controller, &mut decoder).unwrap() {
                Some(Message::Event(event)) => {
                    assert_eq!(event.name, "clicked");
                    assert_eq!(event.payload, expected);
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
        assert_eq!(emitter.events_sent(), 2);
    }

    #[test]
    fn test_poll_returns_available_calls() {
        let (mut controller, host) = stream_pair();
        let (mut reader, _emitter) = split(host, FrameDecoder::new()).unwrap();

        assert!(reader.poll().unwrap().messages.is_empty());

        for method in ["a", "b"] {
            let frame =
                encode_message(&Message::Call(CallRecord::new(method, CallArgs::new()))).unwrap();
            controller.write_all(&frame).unwrap();
        }

        let mut methods = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while methods.len() < 2 && Instant::now() < deadline {
            for message in reader.poll().unwrap().messages {
                if let Message::Call(call) = message {
                    methods.push(call.method);
                }
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(methods, vec!["a", "b"]);
    }

    #[test]
    fn test_poll_reports_eof() {
        let (controller, host) = stream_pair();
        let (mut reader, _emitter) = split(host, FrameDecoder::new()).unwrap();
        drop(controller);

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut eof = false;
        while !eof && Instant::now() < deadline {
            eof = reader.poll().unwrap().eof;
            thread::sleep(Duration::from_millis(5));
        }
        assert!(eof);
    }

    #[test]
    fn test_reserved_names_cannot_be_emitted() {
        let (mut controller, host) = stream_pair();
        let (_reader, emitter) = split(host, FrameDecoder::new()).unwrap();

        for name in [EXIT_EVENT, DIAGNOSTIC_EVENT] {
            assert!(matches!(
                emitter.emit(name, "spoofed"),
                Err(HostError::ReservedEvent(_))
            ));
        }
        emitter.emit("clicked", 1).unwrap();

        let mut decoder = FrameDecoder::new();
        match read_message(&mut controller, &mut decoder).unwrap() {
            Some(Message::Event(event)) => assert_eq!(event.name, "clicked"),
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(emitter.events_sent(), 1);
    }

    #[test]
    fn test_emit_after_close_fails() {
        let (mut controller, host) = stream_pair();
        let (_reader, emitter) = split(host, FrameDecoder::new()).unwrap();

        emitter.close(Duration::from_millis(200));
        assert!(matches!(
            emitter.emit("late", 1),
            Err(HostError::ChannelClosed)
        ));

        let mut decoder = FrameDecoder::new();
        assert_eq!(
            read_message(&mut controller, &mut decoder).unwrap(),
            Some(Message::Close)
        );
    }
}
