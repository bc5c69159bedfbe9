//! Proxy lifecycle state.

use parking_lot::RwLock;

/// Why a proxy stopped relaying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The controller called `close`.
    Closed,

    /// The interface shut down on its own (e.g. its window was closed).
    RemoteClosed,

    /// The channel broke: subprocess exit, broken pipe, or a corrupt stream.
    ChannelLost(String),
}

impl TerminationReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::Closed => "Closed by controller".to_string(),
            Self::RemoteClosed => "Closed by interface".to_string(),
            Self::ChannelLost(detail) => format!("Channel lost: {detail}"),
        }
    }
}

/// Connection state of a proxy. Terminated is final.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProxyState {
    /// Subprocess alive and channel open.
    #[default]
    Connected,

    /// No longer relaying; never reconnects.
    Terminated { reason: TerminationReason },
}

impl ProxyState {
    /// Returns true if calls are still being relayed.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true if the proxy has terminated.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }

    /// Returns the termination reason, if terminated.
    pub fn reason(&self) -> Option<&TerminationReason> {
        match self {
            Self::Connected => None,
            Self::Terminated { reason } => Some(reason),
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "Connected",
            Self::Terminated { .. } => "Terminated",
        }
    }
}

/// Move a connected proxy to terminated. The first reason recorded wins.
///
/// Returns true if this call performed the transition.
pub(crate) fn mark_terminated(state: &RwLock<ProxyState>, reason: TerminationReason) -> bool {
    let mut state = state.write();
    if state.is_terminated() {
        return false;
    }
    *state = ProxyState::Terminated { reason };
    true
}
