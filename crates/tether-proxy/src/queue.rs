//! Outbound call queue.
//!
//! Many controller threads produce, the dispatch thread is the only
//! consumer. Calls are encoded by the producer, so the dispatch thread only
//! ever copies bytes onto the channel.

use bytes::Bytes;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};

use crate::config::Backpressure;
use crate::error::ProxyError;
use crate::ProxyResult;

/// An encoded CALL frame waiting to be written.
#[derive(Debug, Clone)]
pub(crate) struct OutboundCall {
    /// Method name, for logging.
    pub method: String,

    /// Complete frame, header included.
    pub frame: Bytes,
}

/// Producer side of the outbound queue.
#[derive(Debug, Clone)]
pub(crate) struct OutboundSender {
    tx: Sender<OutboundCall>,
    backpressure: Backpressure,
}

/// Creates a bounded outbound queue.
pub(crate) fn outbound_queue(
    capacity: usize,
    backpressure: Backpressure,
) -> (OutboundSender, Receiver<OutboundCall>) {
    // A zero-capacity crossbeam channel is a rendezvous channel.
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (OutboundSender { tx, backpressure }, rx)
}

impl OutboundSender {
    /// Queue a call according to the backpressure policy.
    pub fn enqueue(&self, call: OutboundCall) -> ProxyResult<()> {
        match self.backpressure {
            Backpressure::Reject => self.tx.try_send(call).map_err(|e| match e {
                TrySendError::Full(_) => ProxyError::QueueFull,
                TrySendError::Disconnected(_) => ProxyError::Disconnected,
            }),
            Backpressure::Block(timeout) => {
                self.tx.send_timeout(call, timeout).map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => ProxyError::QueueFull,
                    SendTimeoutError::Disconnected(_) => ProxyError::Disconnected,
                })
            }
        }
    }

    /// Number of calls waiting to be written.
    pub fn len(&self) -> usize {
        self.tx.len()
    }
}
