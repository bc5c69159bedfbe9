//! The dispatch thread: sole reader and writer of the controller's end of
//! the channel.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::RwLock;
use tether_ipc::{
    encode_message, EventRecord, FrameDecoder, Message, Value, WireError, DIAGNOSTIC_EVENT,
    EXIT_EVENT,
};
use tracing::{debug, info, trace, warn};

use crate::queue::OutboundCall;
use crate::registry::SubscriberRegistry;
use crate::state::{mark_terminated, ProxyState, TerminationReason};

/// Maximum calls moved from the queue into the write buffer per iteration,
/// so a flood of calls cannot starve the read side.
const MAX_CALLS_PER_TICK: usize = 256;

/// Calls stay in the queue while this many bytes wait for the socket, so a
/// stalled subprocess pushes back on producers.
const OUTBOX_HIGH_WATER: usize = 1024 * 1024;

/// Read buffer size.
const READ_CHUNK: usize = 16 * 1024;

/// How long a closing dispatch thread tries to flush what is left.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_millis(200);

/// Everything the dispatch thread owns or shares.
pub(crate) struct DispatchContext {
    pub stream: TcpStream,
    pub decoder: FrameDecoder,
    pub calls: Receiver<OutboundCall>,
    pub registry: Arc<SubscriberRegistry>,
    pub state: Arc<RwLock<ProxyState>>,
    pub should_stop: Arc<AtomicBool>,
    pub poll_interval: Duration,
}

/// Start the dispatch thread.
pub(crate) fn spawn_dispatch(ctx: DispatchContext) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("tether-dispatch".to_string())
        .spawn(move || Dispatcher::new(ctx).run())
}

enum Inbound {
    Open,
    RemoteClosed,
}

struct Dispatcher {
    ctx: DispatchContext,
    outbox: BytesMut,
    read_buf: Vec<u8>,
    calls_sent: u64,
    events_routed: u64,
}

impl Dispatcher {
    fn new(ctx: DispatchContext) -> Self {
        Self {
            ctx,
            outbox: BytesMut::new(),
            read_buf: vec![0u8; READ_CHUNK],
            calls_sent: 0,
            events_routed: 0,
        }
    }

    fn run(mut self) {
        debug!("Dispatch thread starting");

        let reason = match self.ctx.stream.set_nonblocking(true) {
            Ok(()) => self.relay(),
            Err(e) => TerminationReason::ChannelLost(e.to_string()),
        };

        self.finish(reason);
    }

    /// Relay in both directions until stopped or the channel fails.
    fn relay(&mut self) -> TerminationReason {
        loop {
            if self.ctx.should_stop.load(Ordering::SeqCst) {
                self.flush_on_close();
                return TerminationReason::Closed;
            }

            if let Err(e) = self.pump_outbound() {
                return TerminationReason::ChannelLost(e.to_string());
            }

            match self.pump_inbound() {
                Ok(Inbound::Open) => {}
                Ok(Inbound::RemoteClosed) => return TerminationReason::RemoteClosed,
                Err(reason) => return reason,
            }

            self.wait_for_work();
        }
    }

    /// Move queued calls into the write buffer and write what the socket
    /// accepts without blocking.
    fn pump_outbound(&mut self) -> io::Result<()> {
        for _ in 0..MAX_CALLS_PER_TICK {
            if self.outbox.len() >= OUTBOX_HIGH_WATER {
                break;
            }
            match self.ctx.calls.try_recv() {
                Ok(call) => self.stage(call),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        while !self.outbox.is_empty() {
            match self.ctx.stream.write(&self.outbox) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.outbox.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn stage(&mut self, call: OutboundCall) {
        trace!(method = %call.method, bytes = call.frame.len(), "Writing call");
        self.outbox.extend_from_slice(&call.frame);
        self.calls_sent += 1;
    }

    /// Read whatever is available and route complete events.
    fn pump_inbound(&mut self) -> Result<Inbound, TerminationReason> {
        let mut eof = false;

        loop {
            match self.ctx.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => self.ctx.decoder.push(&self.read_buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TerminationReason::ChannelLost(e.to_string())),
            }
        }

        loop {
            match self.ctx.decoder.next_message() {
                Ok(Some(Message::Event(event))) => {
                    if self.ctx.should_stop.load(Ordering::SeqCst) {
                        // Closing: nothing more is delivered.
                        return Ok(Inbound::Open);
                    }
                    self.route(event);
                }
                Ok(Some(Message::Close)) => {
                    info!("Interface closed the channel");
                    return Ok(Inbound::RemoteClosed);
                }
                Ok(Some(other)) => {
                    warn!(kind = other.kind().name(), "Ignoring unexpected message");
                }
                Ok(None) => break,
                Err(e @ WireError::FrameTooLarge { .. }) => {
                    return Err(TerminationReason::ChannelLost(e.to_string()));
                }
                Err(e) => warn!(error = %e, "Dropping undecodable frame"),
            }
        }

        if eof {
            return Err(TerminationReason::ChannelLost(
                "Subprocess closed the channel without notice".to_string(),
            ));
        }

        Ok(Inbound::Open)
    }

    fn route(&mut self, event: EventRecord) {
        if event.name == DIAGNOSTIC_EVENT {
            warn!(payload = %event.payload, "Remote invocation failed");
        }

        let invoked = self.ctx.registry.dispatch(&event);
        self.events_routed += 1;
        trace!(event = %event.name, subscribers = invoked, "Event routed");
    }

    /// Sleep until a call arrives or the poll interval passes.
    fn wait_for_work(&mut self) {
        if !self.outbox.is_empty() {
            // The socket is backed up; give it a tick before retrying.
            thread::sleep(self.ctx.poll_interval);
            return;
        }

        match self.ctx.calls.recv_timeout(self.ctx.poll_interval) {
            Ok(call) => self.stage(call),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(self.ctx.poll_interval),
        }
    }

    /// Best effort: write calls queued before `close`, then CLOSE.
    fn flush_on_close(&mut self) {
        for call in self.ctx.calls.try_iter().collect::<Vec<_>>() {
            self.stage(call);
        }

        match encode_message(&Message::Close) {
            Ok(frame) => self.outbox.extend_from_slice(&frame),
            Err(e) => warn!(error = %e, "Failed to encode CLOSE"),
        }

        let deadline = Instant::now() + CLOSE_FLUSH_TIMEOUT;
        while !self.outbox.is_empty() && Instant::now() < deadline {
            match self.ctx.stream.write(&self.outbox) {
                Ok(0) => break,
                Ok(n) => self.outbox.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(1))
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(error = %e, "Channel already gone while closing");
                    break;
                }
            }
        }
    }

    /// Mark the proxy terminated, discard unsent calls, and publish `exit`.
    fn finish(mut self, reason: TerminationReason) {
        mark_terminated(&self.ctx.state, reason.clone());

        let discarded = self.ctx.calls.try_iter().count();
        if discarded > 0 || !self.outbox.is_empty() {
            warn!(
                discarded,
                unsent_bytes = self.outbox.len(),
                "Discarding calls pending at disconnect"
            );
        }
        self.outbox.clear();

        let _ = self.ctx.stream.shutdown(Shutdown::Both);

        info!(
            reason = %reason.message(),
            calls_sent = self.calls_sent,
            events_routed = self.events_routed,
            "Dispatch thread stopped"
        );

        self.ctx
            .registry
            .dispatch(&EventRecord::new(EXIT_EVENT, Value::String(reason.message())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backpressure;
    use crate::queue::outbound_queue;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::net::TcpListener;
    use tether_ipc::{read_message, CallArgs, CallRecord};

    fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    fn call_frame(method: &str) -> OutboundCall {
        let record = CallRecord::new(method, CallArgs::new());
        OutboundCall {
            method: method.to_string(),
            frame: encode_message(&Message::Call(record)).unwrap(),
        }
    }

    fn write_event(host: &mut TcpStream, name: &str, payload: Value) {
        let frame = encode_message(&Message::Event(EventRecord::new(name, payload))).unwrap();
        host.write_all(&frame).unwrap();
    }

    struct Harness {
        host: TcpStream,
        queue: crate::queue::OutboundSender,
        registry: Arc<SubscriberRegistry>,
        state: Arc<RwLock<ProxyState>>,
        should_stop: Arc<AtomicBool>,
        handle: JoinHandle<()>,
    }

    fn start() -> Harness {
        let (controller, host) = stream_pair();
        let (queue, calls) = outbound_queue(64, Backpressure::Reject);
        let registry = Arc::new(SubscriberRegistry::new());
        let state = Arc::new(RwLock::new(ProxyState::Connected));
        let should_stop = Arc::new(AtomicBool::new(false));

        let handle = spawn_dispatch(DispatchContext {
            stream: controller,
            decoder: FrameDecoder::new(),
            calls,
            registry: Arc::clone(&registry),
            state: Arc::clone(&state),
            should_stop: Arc::clone(&should_stop),
            poll_interval: Duration::from_millis(5),
        })
        .unwrap();

        Harness {
            host,
            queue,
            registry,
            state,
            should_stop,
            handle,
        }
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_calls_written_in_order() {
        let mut h = start();
        for i in 0..20 {
            h.queue.enqueue(call_frame(&format!("m{i}"))).unwrap();
        }

        let mut decoder = FrameDecoder::new();
        for i in 0..20 {
            match read_message(&mut h.host, &mut decoder).unwrap() {
                Some(Message::Call(call)) => assert_eq!(call.method, format!("m{i}")),
                other => panic!("unexpected message: {other:?}"),
            }
        }

        h.should_stop.store(true, Ordering::SeqCst);
        h.handle.join().unwrap();
    }

    #[test]
    fn test_events_routed_in_emission_order() {
        let mut h = start();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        h.registry
            .subscribe("clicked", move |v| seen_clone.lock().push(v.clone()));

        write_event(&mut h.host, "clicked", json!(1));
        write_event(&mut h.host, "clicked", json!(2));

        assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 2));
        assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);

        h.should_stop.store(true, Ordering::SeqCst);
        h.handle.join().unwrap();
    }

    #[test]
    fn test_stop_sends_close_and_publishes_exit() {
        let mut h = start();
        let exit = Arc::new(Mutex::new(None));
        let exit_clone = Arc::clone(&exit);
        h.registry
            .subscribe(EXIT_EVENT, move |v| *exit_clone.lock() = Some(v.clone()));

        h.should_stop.store(true, Ordering::SeqCst);
        h.handle.join().unwrap();

        let mut decoder = FrameDecoder::new();
        assert_eq!(
            read_message(&mut h.host, &mut decoder).unwrap(),
            Some(Message::Close)
        );
        assert_eq!(
            h.state.read().reason(),
            Some(&TerminationReason::Closed)
        );
        assert_eq!(
            *exit.lock(),
            Some(Value::String(TerminationReason::Closed.message()))
        );
    }

    #[test]
    fn test_remote_close_terminates() {
        let mut h = start();
        h.host
            .write_all(&encode_message(&Message::Close).unwrap())
            .unwrap();

        h.handle.join().unwrap();
        assert_eq!(
            h.state.read().reason(),
            Some(&TerminationReason::RemoteClosed)
        );
    }

    #[test]
    fn test_dropped_channel_discards_and_disconnects() {
        let h = start();
        drop(h.host);
        h.handle.join().unwrap();

        assert!(matches!(
            h.state.read().reason(),
            Some(TerminationReason::ChannelLost(_))
        ));
        assert!(matches!(
            h.queue.enqueue(call_frame("late")),
            Err(crate::error::ProxyError::Disconnected)
        ));
    }

    #[test]
    fn test_oversized_frame_is_fatal() {
        let mut h = start();
        let len = (tether_ipc::MAX_FRAME_LEN as u32) + 1;
        let mut header = len.to_be_bytes().to_vec();
        header.push(tether_ipc::MessageKind::Event.as_byte());
        h.host.write_all(&header).unwrap();

        h.handle.join().unwrap();
        assert!(matches!(
            h.state.read().reason(),
            Some(TerminationReason::ChannelLost(_))
        ));
    }

    #[test]
    fn test_frames_written_verbatim() {
        let mut h = start();
        h.queue
            .enqueue(OutboundCall {
                method: "raw".to_string(),
                frame: encode_message(&Message::Close).unwrap(),
            })
            .unwrap();

        let mut decoder = FrameDecoder::new();
        assert_eq!(
            read_message(&mut h.host, &mut decoder).unwrap(),
            Some(Message::Close)
        );

        h.should_stop.store(true, Ordering::SeqCst);
        h.handle.join().unwrap();
    }
}
