//! The interface host loop.
//!
//! Runs on the subprocess's only thread. Each tick pumps the toolkit, then
//! drains the channel and applies every received call to the interface
//! before the next tick. Calls that cannot be applied are reported on the
//! diagnostic event and the loop carries on.

use std::any::Any;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use tether_ipc::{
    encode_message, read_message, CallRecord, EventRecord, FrameDecoder, Hello, Init, Message,
    WireError, DIAGNOSTIC_EVENT, PROTOCOL_VERSION,
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::channel::{split, ChannelReader, Emitter};
use crate::config::HostConfig;
use crate::error::{HostError, InvokeError};
use crate::interface::{Context, Interface};
use crate::methods::MethodTable;
use crate::toolkit::{LoopStatus, Toolkit};
use crate::HostResult;

/// Method name reported when the interface constructor fails.
const CONSTRUCTOR: &str = "new";

/// How long the host keeps flushing its final frames.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_millis(200);

/// Why the host loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostExit {
    /// The user closed the root window.
    WindowClosed,

    /// The controller sent CLOSE.
    ControllerClosed,

    /// The controller went away without CLOSE.
    ControllerLost,
}

impl HostExit {
    pub fn name(&self) -> &'static str {
        match self {
            Self::WindowClosed => "WindowClosed",
            Self::ControllerClosed => "ControllerClosed",
            Self::ControllerLost => "ControllerLost",
        }
    }
}

/// Connect to the controller at `addr`, complete the handshake, and host
/// `I` until the window or the channel closes.
#[instrument(name = "host_run", skip(config), fields(interface = I::NAME))]
pub fn run<I: Interface>(addr: &str, config: &HostConfig) -> HostResult<HostExit> {
    let (stream, decoder, init) = connect(addr, I::NAME, config)?;
    HostLoop::<I>::start(stream, decoder, init, config)?.run()
}

/// Connect, send HELLO, and wait for INIT.
fn connect(
    addr: &str,
    interface: &str,
    config: &HostConfig,
) -> HostResult<(TcpStream, FrameDecoder, Init)> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| HostError::Handshake(format!("Invalid controller address `{addr}`: {e}")))?;

    let mut stream = TcpStream::connect_timeout(&addr, config.connect_timeout)
        .map_err(|e| HostError::Handshake(format!("Cannot reach controller at {addr}: {e}")))?;
    stream.set_nodelay(true)?;

    let hello = Message::Hello(Hello {
        protocol_version: PROTOCOL_VERSION,
        interface: interface.to_string(),
        pid: std::process::id(),
    });
    stream.write_all(&encode_message(&hello)?)?;

    stream.set_read_timeout(Some(config.connect_timeout))?;
    let mut decoder = FrameDecoder::new();
    let init = match read_message(&mut stream, &mut decoder) {
        Ok(Some(Message::Init(init))) => init,
        Ok(Some(other)) => {
            return Err(HostError::Handshake(format!(
                "Expected INIT, got {}",
                other.kind().name()
            )))
        }
        Ok(None) => {
            return Err(HostError::Handshake(
                "Controller closed the channel before INIT".to_string(),
            ))
        }
        Err(WireError::Io(e)) => {
            return Err(HostError::Handshake(format!("No INIT from controller: {e}")))
        }
        Err(e) => return Err(e.into()),
    };
    stream.set_read_timeout(None)?;

    if init.interface != interface {
        return Err(HostError::Handshake(format!(
            "Controller expects `{}`, this process hosts `{interface}`",
            init.interface
        )));
    }

    info!(%addr, "Connected to controller");
    Ok((stream, decoder, init))
}

struct HostLoop<I: Interface> {
    toolkit: I::Toolkit,
    interface: I,
    methods: MethodTable<I>,
    reader: ChannelReader,
    emitter: Emitter,
    poll_interval: Duration,
    calls_handled: u64,
    calls_failed: u64,
}

impl<I: Interface> HostLoop<I> {
    fn start(
        stream: TcpStream,
        decoder: FrameDecoder,
        init: Init,
        config: &HostConfig,
    ) -> HostResult<Self> {
        let (reader, emitter) = split(stream, decoder)?;
        let mut toolkit = match <I::Toolkit as Toolkit>::init() {
            Ok(toolkit) => toolkit,
            Err(e) => {
                report(&emitter, CONSTRUCTOR, InvokeError::Failed(e.to_string()));
                emitter.close(CLOSE_FLUSH_TIMEOUT);
                return Err(e);
            }
        };

        let built = {
            let mut ctx = Context::<I::Toolkit>::new(toolkit.root(), &emitter);
            I::build(&mut ctx, init.args)
        };
        let interface = match built {
            Ok(interface) => interface,
            Err(e) => {
                report(&emitter, CONSTRUCTOR, e.clone());
                toolkit.shutdown();
                emitter.close(CLOSE_FLUSH_TIMEOUT);
                return Err(HostError::Build(e));
            }
        };

        let methods = I::methods();
        let missing = methods.missing();
        if !missing.is_empty() {
            warn!(?missing, "Declared methods have no implementation");
        }
        debug!(methods = methods.len(), "Interface built");

        Ok(Self {
            toolkit,
            interface,
            methods,
            reader,
            emitter,
            poll_interval: config.poll_interval,
            calls_handled: 0,
            calls_failed: 0,
        })
    }

    fn run(mut self) -> HostResult<HostExit> {
        let started = Instant::now();

        let exit = loop {
            match self.tick() {
                Ok(Some(exit)) => break Ok(exit),
                Ok(None) => thread::sleep(self.poll_interval),
                Err(e) => break Err(e),
            }
        };

        self.toolkit.shutdown();

        match &exit {
            Ok(HostExit::WindowClosed) | Ok(HostExit::ControllerClosed) => {
                self.emitter.close(CLOSE_FLUSH_TIMEOUT)
            }
            Ok(HostExit::ControllerLost) | Err(_) => self.emitter.abandon(),
        }

        match &exit {
            Ok(reason) => info!(
                reason = reason.name(),
                calls_handled = self.calls_handled,
                calls_failed = self.calls_failed,
                events_sent = self.emitter.events_sent(),
                uptime_ms = started.elapsed().as_millis() as u64,
                "Host loop stopped"
            ),
            Err(e) => error!(error = %e, "Host loop failed"),
        }

        exit
    }

    /// One pass: toolkit events, then every call that has arrived.
    fn tick(&mut self) -> HostResult<Option<HostExit>> {
        if self.toolkit.pump() == LoopStatus::Closed {
            info!("Root window closed");
            return Ok(Some(HostExit::WindowClosed));
        }

        let polled = self.reader.poll()?;
        for message in polled.messages {
            match message {
                Message::Call(call) => self.invoke(call),
                Message::Close => {
                    info!("Controller closed the channel");
                    return Ok(Some(HostExit::ControllerClosed));
                }
                other => warn!(kind = other.kind().name(), "Ignoring unexpected message"),
            }
        }

        if polled.eof {
            warn!("Controller disconnected without notice");
            return Ok(Some(HostExit::ControllerLost));
        }

        if let Err(e) = self.emitter.flush() {
            warn!(error = %e, "Channel write failed");
            return Ok(Some(HostExit::ControllerLost));
        }

        Ok(None)
    }

    fn invoke(&mut self, call: CallRecord) {
        let CallRecord { method, args } = call;
        trace!(method = %method, arity = args.arity(), "Invoking");

        let result = match self.methods.get(&method) {
            Some(f) => {
                let interface = &mut self.interface;
                let mut ctx = Context::<I::Toolkit>::new(self.toolkit.root(), &self.emitter);
                panic::catch_unwind(AssertUnwindSafe(|| f(interface, &mut ctx, args)))
                    .unwrap_or_else(|payload| Err(InvokeError::Failed(panic_message(&*payload))))
            }
            None => Err(InvokeError::UnknownMethod(method.clone())),
        };

        self.calls_handled += 1;
        if let Err(e) = result {
            self.calls_failed += 1;
            report(&self.emitter, &method, e);
        }
    }
}

/// Publish a failed call on the diagnostic event.
fn report(emitter: &Emitter, method: &str, error: InvokeError) {
    let remote = error.into_remote(method);
    warn!(method, kind = ?remote.kind, message = %remote.message, "Call failed");

    let sent = EventRecord::with_payload(DIAGNOSTIC_EVENT, &remote)
        .map_err(HostError::from)
        .and_then(|event| emitter.emit_record(event));
    if let Err(e) = sent {
        warn!(error = %e, "Failed to report call failure");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("Method panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("Method panicked: {message}")
    } else {
        "Method panicked".to_string()
    }
}
