//! A windowless toolkit.
//!
//! Keeps window state in memory and runs scheduled callbacks on the host
//! loop's tick. Used by tests and by hosts that run without a display.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::toolkit::{LoopStatus, Toolkit};
use crate::HostResult;

type Callback = Box<dyn FnOnce(&mut HeadlessRoot)>;

struct Timer {
    due: Instant,
    callback: Callback,
}

/// The root window of the headless toolkit.
#[derive(Default)]
pub struct HeadlessRoot {
    title: String,
    labels: BTreeMap<String, String>,
    timers: Vec<Timer>,
    closed: bool,
}

impl HeadlessRoot {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    /// Text of a label, if it exists.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// Create or update a label.
    pub fn set_label(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.labels.insert(name.into(), text.into());
    }

    /// Run `callback` on the first tick at least `delay` from now.
    pub fn after(&mut self, delay: Duration, callback: impl FnOnce(&mut HeadlessRoot) + 'static) {
        self.timers.push(Timer {
            due: Instant::now() + delay,
            callback: Box::new(callback),
        });
    }

    /// Close the window, as if the user clicked the close button.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for HeadlessRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessRoot")
            .field("title", &self.title)
            .field("labels", &self.labels)
            .field("pending_timers", &self.timers.len())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Toolkit without a display.
#[derive(Debug, Default)]
pub struct HeadlessToolkit {
    root: HeadlessRoot,
    ticks: u64,
}

impl HeadlessToolkit {
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl Toolkit for HeadlessToolkit {
    type Root = HeadlessRoot;

    fn init() -> HostResult<Self> {
        debug!("Headless toolkit initialized");
        Ok(Self::default())
    }

    fn root(&mut self) -> &mut HeadlessRoot {
        &mut self.root
    }

    fn pump(&mut self) -> LoopStatus {
        self.ticks += 1;

        let now = Instant::now();
        let (mut due, pending): (Vec<Timer>, Vec<Timer>) = std::mem::take(&mut self.root.timers)
            .into_iter()
            .partition(|timer| timer.due <= now);
        self.root.timers = pending;
        due.sort_by_key(|timer| timer.due);

        for timer in due {
            (timer.callback)(&mut self.root);
        }

        if self.root.closed {
            LoopStatus::Closed
        } else {
            LoopStatus::Running
        }
    }

    fn shutdown(&mut self) {
        debug!(
            ticks = self.ticks,
            dropped_timers = self.root.timers.len(),
            "Headless toolkit shut down"
        );
        self.root.timers.clear();
    }
}
