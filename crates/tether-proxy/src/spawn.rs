//! Subprocess launch and channel handshake.

use std::io::{self, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use tether_ipc::{
    encode_message, read_message, CallArgs, FrameDecoder, Hello, Init, Message, WireError,
    CHANNEL_ADDR_ENV, INTERFACE_ENV, PROTOCOL_VERSION,
};
use tracing::{debug, info, instrument, warn};

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::ProxyResult;

/// How often the listener is polled while waiting for the subprocess.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A subprocess with an established channel.
pub(crate) struct Launched {
    pub child: Child,
    pub stream: TcpStream,
    pub decoder: FrameDecoder,
}

/// Spawn the subprocess and complete the handshake.
///
/// The child is killed if the handshake does not complete.
#[instrument(name = "proxy_launch", skip(command, args, config))]
pub(crate) fn launch(
    mut command: Command,
    interface: &str,
    args: CallArgs,
    config: &ProxyConfig,
) -> ProxyResult<Launched> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .map_err(|e| ProxyError::Spawn(format!("Failed to bind channel listener: {e}")))?;
    let addr = listener.local_addr()?;

    command
        .env(CHANNEL_ADDR_ENV, addr.to_string())
        .env(INTERFACE_ENV, interface);

    let mut child = command
        .spawn()
        .map_err(|e| ProxyError::Spawn(format!("Failed to start subprocess: {e}")))?;

    info!(pid = child.id(), %addr, "Interface subprocess spawned");

    match handshake(&listener, &mut child, interface, args, config) {
        Ok((stream, decoder)) => Ok(Launched {
            child,
            stream,
            decoder,
        }),
        Err(e) => {
            warn!(error = %e, "Handshake failed, killing subprocess");
            let _ = child.kill();
            let _ = child.wait();
            Err(e)
        }
    }
}

fn handshake(
    listener: &TcpListener,
    child: &mut Child,
    interface: &str,
    args: CallArgs,
    config: &ProxyConfig,
) -> ProxyResult<(TcpStream, FrameDecoder)> {
    let started = Instant::now();
    let deadline = started + config.handshake_timeout;

    let mut stream = accept_before(listener, child, deadline, config.handshake_timeout)?;
    stream.set_nodelay(true)?;

    let remaining = deadline
        .saturating_duration_since(Instant::now())
        .max(Duration::from_millis(1));
    stream.set_read_timeout(Some(remaining))?;

    let mut decoder = FrameDecoder::new();
    let hello = match read_message(&mut stream, &mut decoder) {
        Ok(Some(Message::Hello(hello))) => hello,
        Ok(Some(other)) => {
            return Err(ProxyError::Handshake(format!(
                "Expected HELLO, got {}",
                other.kind().name()
            )))
        }
        Ok(None) => {
            return Err(ProxyError::Handshake(
                "Subprocess closed the channel before HELLO".to_string(),
            ))
        }
        Err(WireError::Io(e))
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
        {
            return Err(ProxyError::HandshakeTimeout(config.handshake_timeout))
        }
        Err(e) => return Err(ProxyError::Handshake(e.to_string())),
    };

    validate_hello(&hello, interface, child.id())?;

    let init = Message::Init(Init {
        interface: interface.to_string(),
        args,
    });
    stream.write_all(&encode_message(&init)?)?;
    stream.set_read_timeout(None)?;

    info!(
        pid = hello.pid,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Handshake complete"
    );

    Ok((stream, decoder))
}

fn accept_before(
    listener: &TcpListener,
    child: &mut Child,
    deadline: Instant,
    timeout: Duration,
) -> ProxyResult<TcpStream> {
    listener.set_nonblocking(true)?;

    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "Subprocess connected");
                stream.set_nonblocking(false)?;
                return Ok(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(ProxyError::Io(e)),
        }

        if let Some(status) = child.try_wait()? {
            return Err(ProxyError::Spawn(format!(
                "Subprocess exited before connecting ({status})"
            )));
        }

        if Instant::now() >= deadline {
            return Err(ProxyError::HandshakeTimeout(timeout));
        }

        thread::sleep(ACCEPT_POLL_INTERVAL);
    }
}

fn validate_hello(hello: &Hello, interface: &str, pid: u32) -> ProxyResult<()> {
    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(ProxyError::Handshake(format!(
            "Protocol version mismatch: expected {PROTOCOL_VERSION}, got {}",
            hello.protocol_version
        )));
    }

    if hello.interface != interface {
        return Err(ProxyError::Handshake(format!(
            "Subprocess hosts `{}`, expected `{interface}`",
            hello.interface
        )));
    }

    if hello.pid != pid {
        return Err(ProxyError::Handshake(format!(
            "Connection came from pid {}, expected {pid}",
            hello.pid
        )));
    }

    Ok(())
}
