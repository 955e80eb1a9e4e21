use crate::dataflow::{ObservableStore, Origin, Relay, relay};
use futures::channel::mpsc::UnboundedReceiver;
use futures::stream::{Stream, StreamExt};
use shared::{DownMsg, StateMap, UpMsg};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport channel closed")]
    ChannelClosed,
}

/// Outbound half of the external state transport, invoked by
/// [`ObservableStore::save`].
pub trait Transport: Send + Sync + 'static {
    fn send_state(&self, state: StateMap) -> Result<(), TransportError>;
}

/// Relay-backed connection to the kernel.
///
/// Outbound state becomes [`UpMsg`]s on the returned stream; whoever owns the
/// real channel forwards them. Inbound [`DownMsg`]s are applied to the store
/// as remote writes.
#[derive(Clone, Debug)]
pub struct ConnectionAdapter {
    state_flushed_relay: Relay<UpMsg>,
}

impl ConnectionAdapter {
    pub fn new() -> (Self, UnboundedReceiver<UpMsg>) {
        let (state_flushed_relay, up_msg_stream) = relay();
        (ConnectionAdapter { state_flushed_relay }, up_msg_stream)
    }

    /// Ask the kernel to resend its full state.
    pub fn request_state(&self) -> Result<(), TransportError> {
        self.state_flushed_relay
            .try_send(UpMsg::RequestState)
            .map_err(|_| TransportError::ChannelClosed)
    }
}

impl Transport for ConnectionAdapter {
    fn send_state(&self, state: StateMap) -> Result<(), TransportError> {
        self.state_flushed_relay
            .try_send(UpMsg::StateUpdate(state))
            .map_err(|_| TransportError::ChannelClosed)
    }
}

/// Apply one inbound message to the store.
pub fn handle_down_msg(down_msg: DownMsg, store: &ObservableStore) {
    match down_msg {
        DownMsg::StateUpdate { state } => {
            for (key, value) in state {
                store.set(&key, value, Origin::Remote);
            }
        }
        DownMsg::ValidationError { key, message } => {
            log::warn!("kernel rejected '{}': {}", key, message);
        }
    }
}

/// Apply inbound messages until the stream ends.
pub async fn run_down_msg_handler<S>(mut down_msg_stream: S, store: ObservableStore)
where
    S: Stream<Item = DownMsg> + Unpin,
{
    while let Some(down_msg) = down_msg_stream.next().await {
        handle_down_msg(down_msg, &store);
    }
    log::debug!("down message stream closed");
}
