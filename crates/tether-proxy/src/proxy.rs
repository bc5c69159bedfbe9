//! The proxy facade.

use std::marker::PhantomData;
use std::net::TcpStream;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tether_ipc::{encode_message, Args, CallRecord, FrameDecoder, InterfaceSpec, Message, Value};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::ProxyConfig;
use crate::dispatch::{spawn_dispatch, DispatchContext};
use crate::error::ProxyError;
use crate::queue::{outbound_queue, OutboundCall, OutboundSender};
use crate::registry::{SubscriberRegistry, SubscriptionId};
use crate::spawn::{launch, Launched};
use crate::state::{mark_terminated, ProxyState, TerminationReason};
use crate::ProxyResult;

/// Cloneable handle for queueing calls from any thread.
///
/// Handles are what subscriber callbacks should capture: callbacks run on the
/// dispatch thread and must not own the proxy itself.
pub struct RemoteHandle<I> {
    queue: OutboundSender,
    state: Arc<RwLock<ProxyState>>,
    _interface: PhantomData<fn() -> I>,
}

impl<I> Clone for RemoteHandle<I> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            state: Arc::clone(&self.state),
            _interface: PhantomData,
        }
    }
}

impl<I: InterfaceSpec> RemoteHandle<I> {
    /// Queue a call to `method` on the remote interface.
    ///
    /// Returns as soon as the call is queued. Fails before queueing if the
    /// method is not declared, an argument cannot be encoded, the proxy is
    /// disconnected, or the queue is full.
    pub fn invoke(&self, method: &str, args: Args) -> ProxyResult<()> {
        if !I::has_method(method) {
            return Err(ProxyError::UnknownMethod {
                interface: I::NAME,
                method: method.to_string(),
            });
        }

        let record = CallRecord::new(method, args.build()?);
        let frame = encode_message(&Message::Call(record))?;

        if !self.state.read().is_connected() {
            return Err(ProxyError::Disconnected);
        }

        self.queue.enqueue(OutboundCall {
            method: method.to_string(),
            frame,
        })?;

        trace!(method, queued = self.queue.len(), "Call queued");
        Ok(())
    }

    /// Queue a call that takes no arguments.
    pub fn call(&self, method: &str) -> ProxyResult<()> {
        self.invoke(method, Args::new())
    }

    /// Current connection state.
    pub fn state(&self) -> ProxyState {
        self.state.read().clone()
    }

    /// Returns true while calls are being relayed.
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected()
    }
}

/// Controller-side stand-in for an interface running in a subprocess.
pub struct Proxy<I: InterfaceSpec> {
    handle: RemoteHandle<I>,
    registry: Arc<SubscriberRegistry>,
    should_stop: Arc<AtomicBool>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    dispatch_thread: ThreadId,
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
    shutdown_grace: Duration,
}

impl<I: InterfaceSpec> Proxy<I> {
    /// Spawn `command` as the interface subprocess and connect to it.
    ///
    /// The proxy sets the channel address and interface name in the child's
    /// environment; the child is expected to run the tether host for `I`.
    /// `args` are forwarded as the interface's constructor arguments.
    ///
    /// The host must run as `command`'s own process: HELLO carries the
    /// sender's pid and is rejected unless it matches the child's. Launchers
    /// that fork the host instead of exec'ing it, such as `sh -c` without
    /// `exec`, fail with [`ProxyError::Handshake`].
    #[instrument(name = "proxy_spawn", skip_all, fields(interface = I::NAME))]
    pub fn spawn(command: Command, args: Args, config: ProxyConfig) -> ProxyResult<Self> {
        let args = args.build()?;
        let Launched {
            mut child,
            stream,
            decoder,
        } = launch(command, I::NAME, args, &config)?;

        let pid = child.id();
        match Self::start(stream, decoder, &config) {
            Ok(mut proxy) => {
                proxy.pid = Some(pid);
                *proxy.child.get_mut() = Some(child);
                info!(pid, "Proxy connected");
                Ok(proxy)
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    /// Relaunch the running executable as the interface subprocess.
    pub fn spawn_current_exe(args: Args, config: ProxyConfig) -> ProxyResult<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| ProxyError::Spawn(format!("Cannot locate current executable: {e}")))?;
        Self::spawn(Command::new(exe), args, config)
    }

    /// Start relaying over an already established channel.
    pub(crate) fn start(
        stream: TcpStream,
        decoder: FrameDecoder,
        config: &ProxyConfig,
    ) -> ProxyResult<Self> {
        let (queue, calls) = outbound_queue(config.queue_capacity, config.backpressure);
        let registry = Arc::new(SubscriberRegistry::new());
        let state = Arc::new(RwLock::new(ProxyState::Connected));
        let should_stop = Arc::new(AtomicBool::new(false));

        let dispatch = spawn_dispatch(DispatchContext {
            stream,
            decoder,
            calls,
            registry: Arc::clone(&registry),
            state: Arc::clone(&state),
            should_stop: Arc::clone(&should_stop),
            poll_interval: config.poll_interval,
        })?;
        let dispatch_thread = dispatch.thread().id();

        Ok(Self {
            handle: RemoteHandle {
                queue,
                state,
                _interface: PhantomData,
            },
            registry,
            should_stop,
            dispatch: Mutex::new(Some(dispatch)),
            dispatch_thread,
            child: Mutex::new(None),
            pid: None,
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Queue a call to `method` on the remote interface.
    pub fn invoke(&self, method: &str, args: Args) -> ProxyResult<()> {
        self.handle.invoke(method, args)
    }

    /// Queue a call that takes no arguments.
    pub fn call(&self, method: &str) -> ProxyResult<()> {
        self.handle.call(method)
    }

    /// A cloneable handle for queueing calls from other threads or callbacks.
    pub fn handle(&self) -> RemoteHandle<I> {
        self.handle.clone()
    }

    /// Subscribe to an event emitted by the interface.
    ///
    /// Callbacks run on the dispatch thread, in registration order.
    pub fn on<F>(&self, event: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.registry.subscribe(event, callback)
    }

    /// Remove a subscription.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Current connection state.
    pub fn state(&self) -> ProxyState {
        self.handle.state()
    }

    /// Returns true while calls are being relayed.
    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Process id of the interface subprocess.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Stop relaying and shut the subprocess down.
    ///
    /// Idempotent, and safe to call from several threads at once: every
    /// caller returns only after the dispatch thread has stopped, and no
    /// subscriber callback will run again. The subprocess is given
    /// `shutdown_grace` to exit on its own, then killed.
    ///
    /// Called from a subscriber callback, `close` cannot wait for the
    /// dispatch thread it is running on. The thread stops, and sends CLOSE,
    /// as soon as the callback returns, and the subprocess is reaped in the
    /// background.
    #[instrument(name = "proxy_close", skip(self), fields(interface = I::NAME))]
    pub fn close(&self) {
        self.should_stop.store(true, Ordering::SeqCst);

        let on_dispatch_thread = thread::current().id() == self.dispatch_thread;
        if on_dispatch_thread {
            debug!("close() called on the dispatch thread, not joining");
        } else {
            // Held across the join so concurrent callers wait for it too.
            let mut dispatch = self.dispatch.lock();
            if let Some(handle) = dispatch.take() {
                if handle.join().is_err() {
                    error!("Dispatch thread panicked");
                }
            }
        }

        self.registry.close();
        mark_terminated(&self.handle.state, TerminationReason::Closed);

        let child = self.child.lock().take();
        if let Some(child) = child {
            if on_dispatch_thread {
                reap_in_background(child, self.shutdown_grace);
            } else {
                terminate_child(child, self.shutdown_grace);
            }
        }
    }
}

impl<I: InterfaceSpec> Drop for Proxy<I> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Terminate the child off the dispatch thread, so CLOSE goes out while the
/// grace period runs.
fn reap_in_background(child: Child, grace: Duration) {
    let pid = child.id();
    let slot = Arc::new(Mutex::new(Some(child)));
    let reaper_slot = Arc::clone(&slot);

    let spawned = thread::Builder::new()
        .name("tether-reaper".to_string())
        .spawn(move || {
            if let Some(child) = reaper_slot.lock().take() {
                terminate_child(child, grace);
            }
        });

    if let Err(e) = spawned {
        warn!(pid, error = %e, "Cannot start reaper thread, terminating inline");
        if let Some(child) = slot.lock().take() {
            terminate_child(child, grace);
        }
    }
}

/// Wait up to `grace` for the child to exit, then kill it.
fn terminate_child(mut child: Child, grace: Duration) {
    let pid = child.id();
    let deadline = Instant::now() + grace;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid, %status, "Interface subprocess exited");
                return;
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
            Ok(None) => break,
            Err(e) => {
                warn!(pid, error = %e, "Failed to poll interface subprocess");
                break;
            }
        }
    }

    if let Err(e) = child.kill() {
        warn!(pid, error = %e, "Failed to kill interface subprocess");
    }
    let _ = child.wait();
    info!(pid, "Interface subprocess killed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backpressure;
    use serde::{Serialize, Serializer};
    use serde_json::json;
    use std::io::Write;
    use std::net::TcpListener;
    use tether_ipc::{read_message, EventRecord, EXIT_EVENT};

    struct TestGui;

    impl InterfaceSpec for TestGui {
        const NAME: &'static str = "test";
        const METHODS: &'static [&'static str] = &["set_text", "ping"];
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not representable"))
        }
    }

    fn connect(config: ProxyConfig) -> (Proxy<TestGui>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let host = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (controller, _) = listener.accept().unwrap();
        let proxy = Proxy::start(controller, FrameDecoder::new(), &config).unwrap();
        (proxy, host)
    }

    fn fast_config() -> ProxyConfig {
        ProxyConfig::default().with_poll_interval(Duration::from_millis(5))
    }

    fn next_call(host: &mut TcpStream, decoder: &mut FrameDecoder) -> CallRecord {
        match read_message(host, decoder).unwrap() {
            Some(Message::Call(call)) => call,
            other => panic!("unexpected message: {other:?}"),
        }
    }

    fn emit(host: &mut TcpStream, name: &str, payload: Value) {
        let frame = encode_message(&Message::Event(EventRecord::new(name, payload))).unwrap();
        host.write_all(&frame).unwrap();
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
    fn test_calls_arrive_in_issue_order() {
        let (proxy, mut host) = connect(fast_config());
        for i in 0..100 {
            proxy.invoke("set_text", Args::new().arg(i)).unwrap();
        }

        let mut decoder = FrameDecoder::new();
        for i in 0..100 {
            let call = next_call(&mut host, &mut decoder);
            assert_eq!(call.method, "set_text");
            assert_eq!(call.args.positional, vec![json!(i)]);
        }
    }

    #[test]
    fn test_unknown_method_rejected() {
        let (proxy, _host) = connect(fast_config());
        assert!(matches!(
            proxy.call("explode"),
            Err(ProxyError::UnknownMethod { interface: "test", .. })
        ));
    }

    #[test]
    fn test_unserializable_argument_writes_nothing() {
        let (proxy, mut host) = connect(fast_config());

        let err = proxy
            .invoke("set_text", Args::new().arg(Unserializable))
            .unwrap_err();
        assert!(matches!(err, ProxyError::Serialization(_)));

        proxy.call("ping").unwrap();

        let mut decoder = FrameDecoder::new();
        let call = next_call(&mut host, &mut decoder);
        assert_eq!(call.method, "ping");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_subscribers_invoked_in_order() {
        let (proxy, mut host) = connect(fast_config());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            proxy.on("clicked", move |v| seen.lock().push(format!("{tag}={v}")));
        }

        emit(&mut host, "clicked", json!("x"));

        assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 2));
        assert_eq!(*seen.lock(), vec!["a=\"x\"", "b=\"x\""]);
    }

    #[test]
    fn test_no_callbacks_after_close() {
        let (proxy, mut host) = connect(fast_config());
        let count = Arc::new(Mutex::new(0));
        let count_clone = Arc::clone(&count);
        proxy.on("tick", move |_| *count_clone.lock() += 1);

        emit(&mut host, "tick", json!(0));
        assert!(wait_until(Duration::from_secs(5), || *count.lock() == 1));

        proxy.close();
        let after_close = *count.lock();

        for i in 0..10 {
            // The controller may already have shut the socket.
            let frame =
                encode_message(&Message::Event(EventRecord::new("tick", json!(i)))).unwrap();
            let _ = host.write_all(&frame);
        }
        thread::sleep(Duration::from_millis(100));

        assert_eq!(*count.lock(), after_close);
        assert!(!proxy.is_connected());
    }

    #[test]
    fn test_close_is_idempotent_and_publishes_exit() {
        let (proxy, _host) = connect(fast_config());
        let exits = Arc::new(Mutex::new(Vec::new()));
        let exits_clone = Arc::clone(&exits);
        proxy.on(EXIT_EVENT, move |v| exits_clone.lock().push(v.clone()));

        proxy.close();
        proxy.close();

        assert_eq!(exits.lock().len(), 1);
        assert_eq!(
            proxy.state().reason(),
            Some(&TerminationReason::Closed)
        );
        assert!(matches!(proxy.call("ping"), Err(ProxyError::Disconnected)));
    }

    #[test]
    fn test_disconnect_surfaces_on_invoke() {
        let (proxy, host) = connect(fast_config());
        drop(host);

        assert!(wait_until(Duration::from_secs(5), || !proxy.is_connected()));
        assert!(matches!(proxy.call("ping"), Err(ProxyError::Disconnected)));
        assert!(matches!(
            proxy.state().reason(),
            Some(TerminationReason::ChannelLost(_))
        ));
    }

    #[test]
    fn test_handle_invokes_from_callback() {
        let (proxy, mut host) = connect(fast_config());
        let handle = proxy.handle();
        proxy.on("clicked", move |v| {
            let _ = handle.invoke("set_text", Args::new().arg(v));
        });

        emit(&mut host, "clicked", json!("echo"));

        let mut decoder = FrameDecoder::new();
        let call = next_call(&mut host, &mut decoder);
        assert_eq!(call.args.positional, vec![json!("echo")]);
    }

    #[test]
    fn test_close_from_callback_does_not_deadlock() {
        let (proxy, mut host) = connect(fast_config());
        let proxy = Arc::new(proxy);
        let weak = Arc::downgrade(&proxy);
        proxy.on("quit", move |_| {
            if let Some(proxy) = weak.upgrade() {
                proxy.close();
            }
        });

        emit(&mut host, "quit", Value::Null);

        assert!(wait_until(Duration::from_secs(5), || !proxy.is_connected()));
        assert_eq!(proxy.state().reason(), Some(&TerminationReason::Closed));
    }

    #[test]
    fn test_concurrent_close_waits_for_dispatch() {
        let (proxy, mut host) = connect(fast_config());
        let proxy = Arc::new(proxy);
        let running = Arc::new(AtomicBool::new(false));
        let running_clone = Arc::clone(&running);
        proxy.on("slow", move |_| {
            running_clone.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(500));
            running_clone.store(false, Ordering::SeqCst);
        });

        emit(&mut host, "slow", Value::Null);
        assert!(wait_until(Duration::from_secs(5), || {
            running.load(Ordering::SeqCst)
        }));

        let first = {
            let proxy = Arc::clone(&proxy);
            thread::spawn(move || proxy.close())
        };
        thread::sleep(Duration::from_millis(50));
        proxy.close();

        assert!(!running.load(Ordering::SeqCst));
        first.join().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_close_from_callback_sends_close_within_grace() {
        let config = fast_config().with_shutdown_grace(Duration::from_secs(2));
        let (proxy, mut host) = connect(config);
        *proxy.child.lock() = Some(Command::new("sleep").arg("30").spawn().unwrap());

        let proxy = Arc::new(proxy);
        let weak = Arc::downgrade(&proxy);
        let elapsed = Arc::new(Mutex::new(None));
        let elapsed_clone = Arc::clone(&elapsed);
        proxy.on("quit", move |_| {
            let started = Instant::now();
            if let Some(proxy) = weak.upgrade() {
                proxy.close();
            }
            *elapsed_clone.lock() = Some(started.elapsed());
        });

        emit(&mut host, "quit", Value::Null);

        host.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        let mut decoder = FrameDecoder::new();
        assert_eq!(
            read_message(&mut host, &mut decoder).unwrap(),
            Some(Message::Close)
        );

        let in_callback = (*elapsed.lock()).expect("callback ran");
        assert!(in_callback < Duration::from_secs(1));
        assert!(proxy.child.lock().is_none());
    }

    #[test]
    fn test_queue_full_is_reported() {
        let config = fast_config()
            .with_queue_capacity(1)
            .with_backpressure(Backpressure::Reject);
        let (proxy, _host) = connect(config);

        // The fake host never reads, so the socket and write buffer fill up.
        let chunk = "x".repeat(64 * 1024);
        let mut saw_full = false;
        for _ in 0..10_000 {
            match proxy.invoke("set_text", Args::new().arg(&chunk)) {
                Ok(()) => {}
                Err(ProxyError::QueueFull) => {
                    saw_full = true;
                    break;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(saw_full);
    }
}
