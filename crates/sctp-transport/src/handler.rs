//! Consumer-facing callbacks.
//!
//! Callbacks may run on engine-owned threads and must not block for long.
//! [`ChannelHandler`] moves everything onto a channel for consumers that
//! prefer to pull events from their own thread.

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::message::Message;
use crate::state::ConnectionState;

/// Receives everything the transport reports upward.
pub trait TransportHandler: Send + Sync {
    fn on_message(&self, message: Message);

    /// Control payload (PPID 50) for the session layer.
    fn on_control(&self, _stream_id: u16, _payload: Bytes) {}

    /// Signed change of the stream's buffered amount.
    fn on_buffered_amount(&self, _stream_id: u16, _delta: isize) {}

    fn on_state_change(&self, _state: ConnectionState) {}

    /// The peer reset (closed) its side of `stream_id`.
    fn on_stream_reset(&self, _stream_id: u16) {}
}

/// Everything a [`TransportHandler`] can observe, as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(Message),
    Control { stream_id: u16, payload: Bytes },
    BufferedAmount { stream_id: u16, delta: isize },
    StateChange(ConnectionState),
    StreamReset(u16),
}

/// Forwards every callback as a [`TransportEvent`].
pub struct ChannelHandler {
    tx: Sender<TransportEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Self, Receiver<TransportEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    fn emit(&self, event: TransportEvent) {
        // A consumer that dropped its receiver is no longer interested.
        let _ = self.tx.send(event);
    }
}

impl TransportHandler for ChannelHandler {
    fn on_message(&self, message: Message) {
        self.emit(TransportEvent::Message(message));
    }

    fn on_control(&self, stream_id: u16, payload: Bytes) {
        self.emit(TransportEvent::Control { stream_id, payload });
    }

    fn on_buffered_amount(&self, stream_id: u16, delta: isize) {
        self.emit(TransportEvent::BufferedAmount { stream_id, delta });
    }

    fn on_state_change(&self, state: ConnectionState) {
        self.emit(TransportEvent::StateChange(state));
    }

    fn on_stream_reset(&self, stream_id: u16) {
        self.emit(TransportEvent::StreamReset(stream_id));
    }
}
