//! Subprocess side of tether.
//!
//! A binary that can host an interface checks [`is_host_process`] early in
//! `main` and, if set, hands control to [`run_from_env`]. The host connects
//! back to the controller, builds the interface on its toolkit, and relays
//! calls and events until the window or the channel closes.

mod channel;
mod config;
mod error;
mod headless;
mod host_loop;
mod interface;
mod methods;
mod toolkit;

pub use channel::Emitter;
pub use config::{HostConfig, POLL_INTERVAL_ENV};
pub use error::{HostError, InvokeError};
pub use headless::{HeadlessRoot, HeadlessToolkit};
pub use host_loop::{run, HostExit};
pub use interface::{Context, Interface};
pub use methods::{ArgReader, Method, MethodTable};
pub use toolkit::{LoopStatus, Toolkit};

pub use tether_ipc::{CallArgs, InterfaceSpec, Value, DIAGNOSTIC_EVENT};

use tether_ipc::{CHANNEL_ADDR_ENV, INTERFACE_ENV};

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Returns true if this process was launched by a controller to host an
/// interface.
pub fn is_host_process() -> bool {
    std::env::var_os(CHANNEL_ADDR_ENV).is_some()
}

/// Name of the interface the controller asked this process to host.
pub fn requested_interface() -> Option<String> {
    std::env::var(INTERFACE_ENV).ok()
}

/// Host `I` using the channel address and configuration from the
/// environment the controller set up.
pub fn run_from_env<I: Interface>() -> HostResult<HostExit> {
    let addr = std::env::var(CHANNEL_ADDR_ENV).map_err(|_| HostError::NotHosted(CHANNEL_ADDR_ENV))?;

    if let Some(requested) = requested_interface() {
        if requested != I::NAME {
            return Err(HostError::Handshake(format!(
                "Asked to host `{requested}`, this binary hosts `{}`",
                I::NAME
            )));
        }
    }

    run::<I>(&addr, &HostConfig::from_env())
}
