//! # SCTP Transport
//!
//! Binds one engine association to the lower transport underneath and to the
//! consumer above.
//!
//! ```text
//!   consumer ── send ──▶ OutboundQueue ── Association::send ──▶ engine
//!                                                                 │
//!   lower ◀── LowerTransport::write ◀── WriteSync ◀── on_write ───┤
//!                                                                 │
//!   lower ── incoming ──▶ Association::input ──▶ engine           │
//!                                                                 │
//!   consumer ◀── TransportHandler ◀── Reassembler ◀── on_receive ─┘
//! ```
//!
//! Engine callbacks reach the transport through an [`EngineBridge`] holding
//! only a weak reference, so a callback racing with teardown finds nothing
//! to call into and reports failure to the engine instead.

use bytes::Bytes;
use std::panic::{self, AssertUnwindSafe};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use tracing::{debug, error, trace, warn};

use crate::config::TransportConfig;
use crate::engine::{
    AssocChange, Association, AssociationParams, Engine, EngineHandler, Notification,
    NotificationKind, ResetDirection, CALLBACK_ERR, CALLBACK_OK,
};
use crate::error::{EngineError, TransportError};
use crate::handler::TransportHandler;
use crate::inbound::{Inbound, Reassembler, Reassembly};
use crate::lifecycle::LifecycleLease;
use crate::lower::LowerTransport;
use crate::message::Message;
use crate::outbound::{HandOff, OutboundQueue, OutgoingMessage};
use crate::state::{ConnectionState, StateMachine};
use crate::stats::{StatsCounters, TransportStats};
use crate::wire::{Chunk, RecvInfo, EMPTY_PAYLOAD};
use crate::write_sync::WriteSync;

/// One data-channel transport over one engine association.
///
/// Construction opens the association and starts connecting. Dropping the
/// transport shuts it down.
///
/// Consumer callbacks run synchronously on engine or caller threads.
/// Calling back into the transport from a callback is allowed, except for
/// callbacks the engine fires inline from inside [`send`](Self::send).
pub struct SctpTransport {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    lower: Arc<dyn LowerTransport>,
    handler: Arc<dyn TransportHandler>,
    association: Mutex<Option<Arc<dyn Association>>>,
    lease: Mutex<Option<LifecycleLease>>,
    state: StateMachine,
    /// Set on entry to Disconnected or Failed; sends fail fast afterwards.
    stopping: AtomicBool,
    shutdown_started: AtomicBool,
    outbound: Mutex<OutboundQueue>,
    /// A flush was asked for while the queue was busy.
    flush_requested: AtomicBool,
    /// Buffered-amount deltas in queue order, awaiting delivery.
    pending_deltas: Mutex<VecDeque<(u16, isize)>>,
    /// Held by the one thread delivering `pending_deltas`.
    reporting: Mutex<()>,
    reassembler: Mutex<Reassembler>,
    write_sync: Arc<WriteSync>,
    stats: StatsCounters,
}

impl SctpTransport {
    /// Open an association on `engine` and start connecting.
    ///
    /// Fails if the engine's global state cannot be initialized, the
    /// association cannot be opened, or the handshake cannot be started.
    pub fn new(
        engine: Arc<dyn Engine>,
        lower: Arc<dyn LowerTransport>,
        handler: Arc<dyn TransportHandler>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let lease = LifecycleLease::acquire(engine.clone())?;

        let inner = Arc::new(Inner {
            reassembler: Mutex::new(Reassembler::new(config.max_message_size)),
            config,
            lower,
            handler,
            association: Mutex::new(None),
            lease: Mutex::new(Some(lease)),
            state: StateMachine::new(),
            stopping: AtomicBool::new(false),
            shutdown_started: AtomicBool::new(false),
            outbound: Mutex::new(OutboundQueue::new()),
            flush_requested: AtomicBool::new(false),
            pending_deltas: Mutex::new(VecDeque::new()),
            reporting: Mutex::new(()),
            write_sync: WriteSync::new(),
            stats: StatsCounters::default(),
        });

        let params = AssociationParams {
            port: inner.config.port,
            role: inner.config.role,
            non_blocking: true,
            send_buffer_size: inner.config.send_buffer_size,
            subscriptions: vec![
                NotificationKind::AssociationChange,
                NotificationKind::SenderDry,
                NotificationKind::StreamReset,
            ],
        };
        let bridge: Arc<dyn EngineHandler> = Arc::new(EngineBridge {
            inner: Arc::downgrade(&inner),
        });
        let association = engine.open(&params, bridge)?;
        *lock(&inner.association) = Some(Arc::from(association));

        let transport = SctpTransport { inner };
        transport.inner.connect()?;
        Ok(transport)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.current()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Send one message.
    ///
    /// `Ok(true)`: handed to the engine. `Ok(false)`: buffered, to be sent
    /// when the engine has room (reported through buffered-amount deltas).
    /// Fails fast once the transport is disconnected, failed or shut down.
    pub fn send(&self, message: Message) -> Result<bool, TransportError> {
        self.inner.send(message)
    }

    /// Drain as much of the outbound queue as the engine will take.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Reset the outgoing side of `stream_id`, closing that channel.
    ///
    /// A failure is logged and returned; the association is unaffected.
    pub fn reset(&self, stream_id: u16) -> Result<(), TransportError> {
        self.inner.reset(stream_id, ResetDirection::Outgoing)
    }

    pub fn reset_with(
        &self,
        stream_id: u16,
        direction: ResetDirection,
    ) -> Result<(), TransportError> {
        self.inner.reset(stream_id, direction)
    }

    /// Packet delivered by the lower transport.
    pub fn incoming(&self, packet: &[u8]) {
        self.inner.incoming(packet);
    }

    /// Bytes queued on `stream_id` and not yet taken by the engine.
    pub fn buffered_amount(&self, stream_id: u16) -> usize {
        lock(&self.inner.outbound).buffered_amount(stream_id)
    }

    pub fn stats(&self) -> TransportStats {
        self.inner.stats.snapshot()
    }

    /// Close the association. Idempotent; also run on drop.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for SctpTransport {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

// ─── Outbound ───────────────────────────────────────────────────────────────

impl Inner {
    fn association(&self) -> Option<Arc<dyn Association>> {
        lock(&self.association).clone()
    }

    fn connect(&self) -> Result<(), TransportError> {
        let association = self.association().ok_or(TransportError::ShutDown)?;
        debug!(
            port = self.config.port,
            role = ?self.config.role,
            "connecting association"
        );
        self.change_state(ConnectionState::Connecting);
        if let Err(err) = association.connect() {
            warn!(error = %err, "association connect failed");
            self.change_state(ConnectionState::Failed);
            return Err(err.into());
        }
        Ok(())
    }

    fn send(&self, message: Message) -> Result<bool, TransportError> {
        if message.len() > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: message.len(),
                max: self.config.max_message_size,
            });
        }
        self.check_open()?;

        let mut deltas = Vec::new();
        let mut torn = false;
        let result = {
            let mut queue = lock(&self.outbound);
            let connected = self.state.current() == ConnectionState::Connected;
            let result = if queue.is_empty() && connected {
                let mut outgoing = OutgoingMessage::new(message);
                let outcome = outgoing.pump(
                    self.config.max_fragment_size,
                    |msg, chunk| self.hand_off(msg, chunk),
                    |_| {},
                );
                match outcome {
                    HandOff::Accepted => {
                        self.record_sent(outgoing.message());
                        Ok(true)
                    }
                    HandOff::Blocked => {
                        StatsCounters::add(&self.stats.send_blocked, 1);
                        queue.push(outgoing, &mut deltas);
                        Ok(false)
                    }
                    HandOff::Failed(err) => {
                        error!(
                            stream_id = outgoing.stream_id(),
                            error = %err,
                            "engine rejected message"
                        );
                        torn = outgoing.is_started();
                        Err(err.into())
                    }
                }
            } else {
                queue.push(OutgoingMessage::new(message), &mut deltas);
                if connected {
                    torn = self.drain_locked(&mut queue, &mut deltas);
                }
                Ok(false)
            };
            self.queue_deltas(deltas);
            result
        };

        self.report_deltas();
        if torn {
            self.fail_torn();
        } else if self.flush_requested.load(Ordering::SeqCst) {
            self.flush();
        }
        result
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.shutdown_started.load(Ordering::Acquire) {
            return Err(TransportError::ShutDown);
        }
        let state = self.state.current();
        if self.stopping.load(Ordering::Acquire)
            || matches!(
                state,
                ConnectionState::Disconnected | ConnectionState::Failed
            )
        {
            return Err(TransportError::NotConnected(state));
        }
        Ok(())
    }

    fn flush(&self) {
        self.flush_requested.store(true, Ordering::SeqCst);
        while self.flush_requested.load(Ordering::SeqCst) {
            // Whoever holds the queue re-checks the flag after unlocking.
            let mut queue = match self.outbound.try_lock() {
                Ok(queue) => queue,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            self.flush_requested.store(false, Ordering::SeqCst);

            let mut deltas = Vec::new();
            let mut torn = false;
            if self.state.current() == ConnectionState::Connected
                && !self.stopping.load(Ordering::Acquire)
            {
                torn = self.drain_locked(&mut queue, &mut deltas);
            }
            self.queue_deltas(deltas);
            drop(queue);
            self.report_deltas();
            if torn {
                self.fail_torn();
                return;
            }
        }
    }

    /// Drain the queue into the engine. `true` if a message failed after
    /// part of it was already accepted.
    fn drain_locked(&self, queue: &mut OutboundQueue, deltas: &mut Vec<(u16, isize)>) -> bool {
        let report = queue.drain(
            self.config.max_fragment_size,
            |msg, chunk| self.hand_off(msg, chunk),
            deltas,
        );
        for msg in &report.completed {
            self.record_sent(msg);
        }
        for (stream_id, err) in &report.failed {
            error!(stream_id, error = %err, "dropping queued message");
        }
        if report.blocked {
            StatsCounters::add(&self.stats.send_blocked, 1);
        }
        report.torn
    }

    /// The peer holds the prefix of a message that will never be finished,
    /// and would glue it onto the next message of that kind.
    fn fail_torn(&self) {
        error!("message failed part way through; failing association");
        self.change_state(ConnectionState::Failed);
    }

    fn hand_off(&self, msg: &Message, chunk: Chunk) -> HandOff {
        let Some(association) = self.association() else {
            return HandOff::Failed(EngineError::Closed);
        };
        let payload = if chunk.ppid.is_empty_marker() {
            &EMPTY_PAYLOAD[..]
        } else {
            &msg.payload[chunk.start..chunk.end]
        };
        match association.send(msg.stream_id, chunk.ppid, payload, &msg.reliability) {
            Ok(_) => {
                StatsCounters::add(&self.stats.chunks_sent, 1);
                trace!(
                    stream_id = msg.stream_id,
                    ppid = chunk.ppid.value(),
                    len = payload.len(),
                    "chunk handed to engine"
                );
                HandOff::Accepted
            }
            Err(EngineError::WouldBlock) => HandOff::Blocked,
            Err(err) => HandOff::Failed(err),
        }
    }

    fn record_sent(&self, msg: &Message) {
        StatsCounters::add(&self.stats.messages_sent, 1);
        StatsCounters::add(&self.stats.bytes_sent, msg.len() as u64);
    }

    /// Called with the outbound lock held, so deltas queue in the order the
    /// queue changed.
    fn queue_deltas(&self, deltas: Vec<(u16, isize)>) {
        if !deltas.is_empty() {
            lock(&self.pending_deltas).extend(deltas);
        }
    }

    /// Deliver pending deltas one thread at a time, in queue order.
    fn report_deltas(&self) {
        loop {
            // Whoever holds `reporting` re-checks the pending list after unlocking.
            let reporting = match self.reporting.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            loop {
                let next = lock(&self.pending_deltas).pop_front();
                let Some((stream_id, delta)) = next else {
                    break;
                };
                self.deliver("on_buffered_amount", |h| {
                    h.on_buffered_amount(stream_id, delta)
                });
            }
            drop(reporting);
            if lock(&self.pending_deltas).is_empty() {
                return;
            }
        }
    }

    fn reset(&self, stream_id: u16, direction: ResetDirection) -> Result<(), TransportError> {
        let Some(association) = self.association() else {
            warn!(stream_id, "stream reset after shutdown");
            return Err(TransportError::ShutDown);
        };
        match association.reset_streams(&[stream_id], direction) {
            Ok(()) => {
                debug!(stream_id, ?direction, "stream reset requested");
                Ok(())
            }
            Err(err) => {
                warn!(stream_id, error = %err, "stream reset failed");
                Err(err.into())
            }
        }
    }

    fn incoming(&self, packet: &[u8]) {
        if self.stopping.load(Ordering::Acquire) {
            trace!(len = packet.len(), "dropping packet after stop");
            return;
        }
        StatsCounters::add(&self.stats.packets_received, 1);
        if let Some(association) = self.association() {
            association.input(packet);
        }
    }
}

// ─── Engine Callbacks ───────────────────────────────────────────────────────

impl Inner {
    fn handle_receive(&self, data: &[u8], info: RecvInfo) -> i32 {
        if self.stopping.load(Ordering::Acquire) {
            return CALLBACK_OK;
        }
        let outcome = lock(&self.reassembler).push(data, info);
        match outcome {
            Reassembly::Pending => {}
            Reassembly::Complete(Inbound::Message(message)) => {
                StatsCounters::add(&self.stats.messages_received, 1);
                StatsCounters::add(&self.stats.bytes_received, message.len() as u64);
                trace!(
                    stream_id = message.stream_id,
                    kind = message.kind.as_str(),
                    len = message.len(),
                    "message received"
                );
                self.deliver("on_message", |h| h.on_message(message));
            }
            Reassembly::Complete(Inbound::Control { stream_id, payload }) => {
                StatsCounters::add(&self.stats.messages_received, 1);
                StatsCounters::add(&self.stats.bytes_received, payload.len() as u64);
                self.deliver("on_control", |h| h.on_control(stream_id, payload));
            }
            Reassembly::Discarded(reason) => {
                StatsCounters::add(&self.stats.discarded_deliveries, 1);
                warn!(
                    stream_id = info.stream_id,
                    ppid = info.ppid,
                    ?reason,
                    "discarding inbound delivery"
                );
            }
        }
        CALLBACK_OK
    }

    fn handle_send_ready(&self, free: usize) -> i32 {
        trace!(free, "engine send buffer available");
        self.flush();
        CALLBACK_OK
    }

    fn handle_write(&self, packet: &[u8], tos: u8, set_df: bool) -> i32 {
        trace!(len = packet.len(), tos, set_df, "engine write");
        let result = self.write_sync.write_blocking(|completion| {
            self.lower
                .write(Bytes::copy_from_slice(packet), completion)
        });
        match result {
            Ok(()) => {
                StatsCounters::add(&self.stats.packets_written, 1);
                StatsCounters::add(&self.stats.bytes_written, packet.len() as u64);
                CALLBACK_OK
            }
            Err(err) => {
                debug!(error = %err, "lower transport write failed");
                CALLBACK_ERR
            }
        }
    }

    fn handle_notification(&self, notification: Notification) {
        if self.stopping.load(Ordering::Acquire) {
            trace!(?notification, "ignoring notification after stop");
            return;
        }
        match notification {
            Notification::AssociationChange(AssocChange::CommUp) => {
                if self.change_state(ConnectionState::Connected) {
                    self.flush();
                }
            }
            Notification::AssociationChange(
                AssocChange::CommLost | AssocChange::CantStartAssociation,
            ) => {
                self.change_state(ConnectionState::Failed);
            }
            Notification::AssociationChange(AssocChange::ShutdownComplete) => {
                self.change_state(ConnectionState::Disconnected);
            }
            Notification::AssociationChange(AssocChange::Restart) => {
                debug!("association restarted");
            }
            Notification::SenderDry => self.flush(),
            Notification::StreamReset { incoming, outgoing } => {
                for stream_id in incoming {
                    debug!(stream_id, "incoming stream reset");
                    self.deliver("on_stream_reset", |h| h.on_stream_reset(stream_id));
                }
                if !outgoing.is_empty() {
                    trace!(?outgoing, "outgoing stream reset confirmed");
                }
            }
            Notification::Other(kind) => trace!(kind, "ignoring notification"),
        }
    }
}

// ─── State & Shutdown ───────────────────────────────────────────────────────

impl Inner {
    /// Apply a transition and notify the consumer. `false` if refused.
    fn change_state(&self, to: ConnectionState) -> bool {
        let Some(from) = self.state.transition(to) else {
            return false;
        };
        debug!(%from, %to, "transport state change");
        if matches!(to, ConnectionState::Disconnected | ConnectionState::Failed) {
            self.stopping.store(true, Ordering::Release);
            self.write_sync.shutdown();
        }
        self.deliver("on_state_change", |h| h.on_state_change(to));
        true
    }

    fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("shutting down transport");

        // Free the write gate first: the engine may write its final packets
        // inline from `shutdown` while another thread waits on the lower
        // transport.
        self.write_sync.close();
        if !self.stopping.load(Ordering::Acquire) {
            if let Some(association) = self.association() {
                if let Err(err) = association.shutdown() {
                    debug!(error = %err, "graceful association shutdown failed");
                }
            }
        }
        self.stopping.store(true, Ordering::Release);
        self.write_sync.shutdown();

        {
            let mut queue = lock(&self.outbound);
            let mut deltas = Vec::new();
            let dropped = queue.clear(&mut deltas);
            if dropped > 0 {
                debug!(dropped, "abandoned queued messages");
            }
            self.queue_deltas(deltas);
        }
        self.report_deltas();

        self.change_state(ConnectionState::Disconnected);

        let association = lock(&self.association).take();
        if let Some(association) = association {
            association.close();
        }
        let lease = lock(&self.lease).take();
        drop(lease);
    }

    /// Invoke a consumer callback without letting a panic escape.
    fn deliver<F>(&self, callback: &'static str, f: F)
    where
        F: FnOnce(&dyn TransportHandler),
    {
        guarded(callback, (), || f(self.handler.as_ref()));
    }
}

// ─── Engine Bridge ──────────────────────────────────────────────────────────

/// The [`EngineHandler`] registered with the engine.
struct EngineBridge {
    inner: Weak<Inner>,
}

impl EngineBridge {
    fn dispatch<F>(&self, callback: &'static str, f: F) -> i32
    where
        F: FnOnce(&Inner) -> i32,
    {
        match self.inner.upgrade() {
            Some(inner) => guarded(callback, CALLBACK_ERR, || f(&inner)),
            None => CALLBACK_ERR,
        }
    }
}

impl EngineHandler for EngineBridge {
    fn on_receive(&self, data: &[u8], info: RecvInfo) -> i32 {
        self.dispatch("receive", |inner| inner.handle_receive(data, info))
    }

    fn on_send_ready(&self, free: usize) -> i32 {
        self.dispatch("send_ready", |inner| inner.handle_send_ready(free))
    }

    fn on_write(&self, packet: &[u8], tos: u8, set_df: bool) -> i32 {
        self.dispatch("write", |inner| inner.handle_write(packet, tos, set_df))
    }

    fn on_notification(&self, notification: Notification) {
        self.dispatch("notification", |inner| {
            inner.handle_notification(notification);
            CALLBACK_OK
        });
    }
}

fn guarded<R, F>(callback: &'static str, fallback: R, f: F) -> R
where
    F: FnOnce() -> R,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error!(callback, "callback panicked");
            fallback
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
