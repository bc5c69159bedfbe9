//! The seam between the host loop and a native GUI toolkit.

use crate::HostResult;

/// Result of one toolkit tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// The root window is still open.
    Running,

    /// The user closed the root window.
    Closed,
}

/// A single-threaded GUI toolkit the host loop can drive.
///
/// The host owns the toolkit for the life of the process: it calls
/// [`init`](Toolkit::init) once, then [`pump`](Toolkit::pump) once per tick,
/// interleaved with channel polling, and finally
/// [`shutdown`](Toolkit::shutdown).
pub trait Toolkit: Sized {
    /// Handle to the toolkit's root window, passed to the interface.
    type Root;

    /// Initialize process-wide toolkit state and create the root window.
    fn init() -> HostResult<Self>;

    /// The root window.
    fn root(&mut self) -> &mut Self::Root;

    /// Process pending toolkit events without blocking.
    fn pump(&mut self) -> LoopStatus;

    /// Tear the toolkit down. Called once, after the last tick.
    fn shutdown(&mut self) {}
}
