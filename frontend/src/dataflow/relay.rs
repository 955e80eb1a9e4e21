//! Event streaming Relay
//!
//! Relay is the sending half of an unbounded channel. The connection uses it
//! to hand outbound messages to whatever drives the transport.

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};

/// Type-safe sender for one event stream.
///
/// Relays follow the `{source}_{event}_relay` naming pattern, e.g.
/// `state_flushed_relay` for state flushed by the store.
#[derive(Clone, Debug)]
pub struct Relay<T>
where
    T: Send + 'static,
{
    sender: UnboundedSender<T>,
}

/// Error type for Relay operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("relay channel closed")]
    ChannelClosed,
}

impl<T> Relay<T>
where
    T: Send + 'static,
{
    pub fn new() -> (Self, UnboundedReceiver<T>) {
        let (sender, receiver) = unbounded();
        (Relay { sender }, receiver)
    }

    /// Send an event, silently dropping it when the receiver is gone.
    pub fn send(&self, value: T) {
        let _ = self.sender.unbounded_send(value);
    }

    pub fn try_send(&self, value: T) -> Result<(), RelayError> {
        self.sender
            .unbounded_send(value)
            .map_err(|_| RelayError::ChannelClosed)
    }
}

/// Creates a new Relay with its receiving stream.
pub fn relay<T>() -> (Relay<T>, UnboundedReceiver<T>)
where
    T: Send + 'static,
{
    Relay::new()
}
