//! Counter demo.
//!
//! The same executable plays both roles. Started normally it is the
//! controller: it relaunches itself as the interface subprocess, presses the
//! counter's button a few times, and mirrors each count back into the label.
//! Started by a proxy it hosts [`CounterGui`].

mod counter;

pub use counter::{CounterGui, COUNT_LABEL, TEXT_LABEL};

use std::time::Duration;

use anyhow::{bail, Context as _};
use crossbeam_channel::RecvTimeoutError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_proxy::{
    debounce_with, Args, Proxy, ProxyConfig, RemoteError, Value, DIAGNOSTIC_EVENT, EXIT_EVENT,
};

/// How long the controller waits for the interface to answer.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Label updates closer together than this are dropped, except every tenth.
const LABEL_DEBOUNCE: Duration = Duration::from_millis(20);

/// Initialize logging to stderr. The subprocess inherits stderr, so both
/// sides log to the same terminal.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "tether=debug,tether_demo=debug,tether_proxy=debug,tether_host=debug,tether_ipc=debug"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Entry point for both roles.
pub fn run() -> anyhow::Result<()> {
    init_logging();

    if tether_host::is_host_process() {
        let exit = tether_host::run_from_env::<CounterGui>().context("Interface host failed")?;
        info!(reason = exit.name(), "Interface process exiting");
        return Ok(());
    }

    let presses = match std::env::args().nth(1) {
        Some(raw) => raw
            .parse::<u32>()
            .with_context(|| format!("Invalid press count `{raw}`"))?,
        None => 3,
    };

    run_controller(presses)
}

fn run_controller(presses: u32) -> anyhow::Result<()> {
    info!(presses, "Starting counter demo");

    let proxy = Proxy::<CounterGui>::spawn_current_exe(
        Args::new().arg("Counter demo").kwarg("start", 0),
        ProxyConfig::from_env(),
    )
    .context("Failed to start the counter window")?;

    let (count_tx, count_rx) = crossbeam_channel::unbounded();
    let handle = proxy.handle();
    let update_label = debounce_with(
        LABEL_DEBOUNCE,
        move |count: i64| handle.invoke("update_label", Args::new().arg(count)),
        |count: &i64| count % 10 == 0,
    );

    proxy.on("increment", move |payload| {
        let Some(count) = payload.as_i64() else {
            warn!(%payload, "Ignoring malformed increment");
            return;
        };
        if let Some(Err(e)) = update_label(count) {
            warn!(error = %e, "Failed to update label");
        }
        let _ = count_tx.send(count);
    });

    proxy.on(DIAGNOSTIC_EVENT, |payload| {
        match tether_proxy::from_value::<RemoteError>(payload.clone()) {
            Ok(remote) => warn!(%remote, "Interface rejected a call"),
            Err(_) => warn!(%payload, "Interface reported an error"),
        }
    });

    proxy.on(EXIT_EVENT, |reason: &Value| {
        info!(%reason, "Counter window gone");
    });

    for _ in 0..presses {
        proxy.call("press")?;
    }

    let mut last = 0;
    for _ in 0..presses {
        match count_rx.recv_timeout(REPLY_TIMEOUT) {
            Ok(count) => last = count,
            Err(RecvTimeoutError::Timeout) => bail!("No reply from the counter window"),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    proxy.invoke("update_label", Args::new().arg(last))?;
    info!(count = last, state = proxy.state().name(), "Counter demo finished");

    proxy.close();
    Ok(())
}
