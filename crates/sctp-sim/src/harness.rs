//! Two transports wired back to back over a pair of [`Pipe`]s.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sctp_transport::config::Role;
use sctp_transport::engine::Engine;
use sctp_transport::{
    ChannelHandler, ConnectionState, Message, SctpTransport, TransportConfig, TransportError,
    TransportEvent,
};

use crate::pipe::{pipe_pair, CompletionMode, Pipe};

/// One side of a [`PeerPair`].
pub struct Peer {
    pub transport: Arc<SctpTransport>,
    pub events: Receiver<TransportEvent>,
    /// The pipe this peer writes into.
    pub outbound: Arc<Pipe>,
}

impl Peer {
    /// Wait for the first event matching `pred`, discarding the others.
    pub fn wait_for<F>(&self, timeout: Duration, mut pred: F) -> Option<TransportEvent>
    where
        F: FnMut(&TransportEvent) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(left) {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Wait until the transport reports `state`.
    pub fn wait_for_state(&self, state: ConnectionState, timeout: Duration) -> bool {
        if self.transport.state() == state {
            return true;
        }
        self.wait_for(timeout, |e| *e == TransportEvent::StateChange(state))
            .is_some()
    }

    pub fn next_message(&self, timeout: Duration) -> Option<Message> {
        match self.wait_for(timeout, |e| matches!(e, TransportEvent::Message(_))) {
            Some(TransportEvent::Message(message)) => Some(message),
            _ => None,
        }
    }

    /// Every event currently queued, without waiting.
    pub fn drain_events(&self) -> Vec<TransportEvent> {
        self.events.try_iter().collect()
    }
}

pub struct PeerPair {
    pub a: Peer,
    pub b: Peer,
}

impl PeerPair {
    /// Wait for both sides to come up.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        self.a.wait_for_state(ConnectionState::Connected, timeout)
            && self.b.wait_for_state(ConnectionState::Connected, timeout)
    }
}

/// Build `a` (active) and `b` (passive) over `engine` and start connecting.
pub fn connect_pair(
    engine: Arc<dyn Engine>,
    config: TransportConfig,
    mode: CompletionMode,
) -> Result<PeerPair, TransportError> {
    let (a_to_b, b_to_a) = pipe_pair(mode);

    let a = open_peer(engine.clone(), config.clone().with_role(Role::Active), a_to_b)?;
    let b = open_peer(engine, config.with_role(Role::Passive), b_to_a)?;

    a.outbound.attach(&b.transport);
    b.outbound.attach(&a.transport);
    Ok(PeerPair { a, b })
}

fn open_peer(
    engine: Arc<dyn Engine>,
    config: TransportConfig,
    outbound: Arc<Pipe>,
) -> Result<Peer, TransportError> {
    let (handler, events) = ChannelHandler::new();
    let transport = SctpTransport::new(engine, outbound.clone(), Arc::new(handler), config)?;
    Ok(Peer {
        transport: Arc::new(transport),
        events,
        outbound,
    })
}
