//! # Loopback Engine
//!
//! A minimal in-memory stand-in for a real SCTP stack. Two associations
//! exchange [`Frame`]s through whatever lower transport the bindings use;
//! the network underneath is assumed lossless and ordered, so there is no
//! retransmission or congestion control.
//!
//! Each association runs one worker thread that owns the protocol state
//! machine and invokes every handler callback, the way a real engine calls
//! back from its own timer and input threads:
//!
//! ```text
//!   Association::send ──┐
//!   Association::input ─┼─▶ command channel ─▶ worker ─▶ EngineHandler
//!   Association::connect┘                              (on_write, on_receive,
//!                                                        on_send_ready, ...)
//! ```
//!
//! Sends are accepted into a send buffer sized by
//! [`AssociationParams::send_buffer_size`]; a full buffer refuses with
//! [`EngineError::WouldBlock`] and the worker signals send readiness once
//! the buffer drains.

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, trace, warn};

use sctp_transport::config::Role;
use sctp_transport::engine::{
    AssocChange, Association, AssociationParams, Engine, EngineHandler, Notification,
    ResetDirection, CALLBACK_OK,
};
use sctp_transport::lifecycle::GlobalLifecycle;
use sctp_transport::message::Reliability;
use sctp_transport::wire::{PayloadId, RecvFlags, RecvInfo};
use sctp_transport::EngineError;

use crate::frame::Frame;

/// Shared by every loopback association in the process.
static LOOPBACK_LIFECYCLE: GlobalLifecycle = GlobalLifecycle::new();
static GLOBAL_INITS: AtomicUsize = AtomicUsize::new(0);
static GLOBAL_CLEANUPS: AtomicUsize = AtomicUsize::new(0);

/// Highest stream id accepted by `send`, exclusive.
pub const MAX_STREAMS: u16 = 1024;

/// How long `shutdown` waits for the worker to flush pending data.
const SHUTDOWN_FLUSH_WAIT: Duration = Duration::from_secs(2);

/// Number of global initializations performed so far.
pub fn global_inits() -> usize {
    GLOBAL_INITS.load(Ordering::SeqCst)
}

pub fn global_cleanups() -> usize {
    GLOBAL_CLEANUPS.load(Ordering::SeqCst)
}

/// Live loopback associations' lease count.
pub fn live_instances() -> usize {
    LOOPBACK_LIFECYCLE.instances()
}

#[derive(Debug, Clone)]
pub struct LoopbackEngine {
    /// Largest piece handed to `on_receive` at once; larger records are
    /// delivered in several pieces with the end-of-record flag on the last.
    delivery_unit: usize,
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self {
            delivery_unit: 64 * 1024,
        }
    }
}

impl LoopbackEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delivery_unit(delivery_unit: usize) -> Arc<Self> {
        Arc::new(Self {
            delivery_unit: delivery_unit.max(1),
        })
    }
}

impl Engine for LoopbackEngine {
    fn lifecycle(&self) -> &'static GlobalLifecycle {
        &LOOPBACK_LIFECYCLE
    }

    fn global_init(&self) -> Result<(), EngineError> {
        GLOBAL_INITS.fetch_add(1, Ordering::SeqCst);
        debug!("loopback engine initialized");
        Ok(())
    }

    fn global_cleanup(&self) {
        GLOBAL_CLEANUPS.fetch_add(1, Ordering::SeqCst);
        debug!("loopback engine cleaned up");
    }

    fn open(
        &self,
        params: &AssociationParams,
        handler: Arc<dyn EngineHandler>,
    ) -> Result<Box<dyn Association>, EngineError> {
        let shared = Arc::new(Shared {
            params: params.clone(),
            handler,
            delivery_unit: self.delivery_unit,
            phase: Mutex::new(Phase::Closed),
            buffered: Mutex::new(0),
            want_ready: AtomicBool::new(false),
        });
        let (tx, rx) = unbounded();

        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("sctp-loopback-{}", params.port))
                .spawn(move || run_worker(shared, rx))
                .map_err(|e| EngineError::Io(e.to_string()))?
        };
        let worker_id = worker.thread().id();
        debug!(port = params.port, role = ?params.role, "loopback association opened");

        Ok(Box::new(LoopbackAssociation {
            shared,
            commands: tx,
            worker: Mutex::new(Some(worker)),
            worker_id,
        }))
    }
}

// ─── Association ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    /// Active side sent INIT, or passive side is listening.
    Handshaking,
    Established,
    ShuttingDown,
    Aborted,
}

enum Command {
    Connect,
    Data {
        stream_id: u16,
        ppid: u32,
        payload: Bytes,
    },
    Input(Bytes),
    Reset {
        direction: ResetDirection,
        streams: Vec<u16>,
    },
    Shutdown(Option<Sender<()>>),
    Stop,
}

struct Shared {
    params: AssociationParams,
    handler: Arc<dyn EngineHandler>,
    delivery_unit: usize,
    phase: Mutex<Phase>,
    /// Bytes accepted by `send` and not yet written out.
    buffered: Mutex<usize>,
    /// A send was refused; signal readiness once space frees up.
    want_ready: AtomicBool,
}

pub struct LoopbackAssociation {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl LoopbackAssociation {
    fn on_worker(&self) -> bool {
        self.worker_id == thread::current().id()
    }

    fn submit(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|_| EngineError::Closed)
    }
}

impl Association for LoopbackAssociation {
    fn connect(&self) -> Result<(), EngineError> {
        self.submit(Command::Connect)
    }

    fn send(
        &self,
        stream_id: u16,
        ppid: PayloadId,
        data: &[u8],
        _reliability: &Reliability,
    ) -> Result<usize, EngineError> {
        if self.shared.phase() != Phase::Established {
            return Err(EngineError::Closed);
        }
        if stream_id >= MAX_STREAMS {
            return Err(EngineError::InvalidStream(stream_id));
        }
        {
            let mut buffered = lock(&self.shared.buffered);
            let capacity = self.shared.params.send_buffer_size;
            // An empty buffer always takes one message, however large.
            if *buffered > 0 && *buffered + data.len() > capacity {
                self.shared.want_ready.store(true, Ordering::SeqCst);
                return Err(EngineError::WouldBlock);
            }
            *buffered += data.len();
        }
        self.submit(Command::Data {
            stream_id,
            ppid: ppid.value(),
            payload: Bytes::copy_from_slice(data),
        })?;
        Ok(data.len())
    }

    fn input(&self, packet: &[u8]) {
        if self.submit(Command::Input(Bytes::copy_from_slice(packet))).is_err() {
            trace!("input after close dropped");
        }
    }

    fn reset_streams(
        &self,
        stream_ids: &[u16],
        direction: ResetDirection,
    ) -> Result<(), EngineError> {
        if self.shared.phase() != Phase::Established {
            return Err(EngineError::Closed);
        }
        if let Some(bad) = stream_ids.iter().find(|s| **s >= MAX_STREAMS) {
            return Err(EngineError::InvalidStream(*bad));
        }
        self.submit(Command::Reset {
            direction,
            streams: stream_ids.to_vec(),
        })
    }

    fn shutdown(&self) -> Result<(), EngineError> {
        if !matches!(
            self.shared.phase(),
            Phase::Handshaking | Phase::Established
        ) {
            return Ok(());
        }
        if self.on_worker() {
            self.shared.handle(Command::Shutdown(None));
            return Ok(());
        }
        // Queue behind pending data so the peer sees it before SHUTDOWN.
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.submit(Command::Shutdown(Some(tx)))?;
        if rx.recv_timeout(SHUTDOWN_FLUSH_WAIT).is_err() {
            warn!("loopback shutdown did not complete in time");
        }
        Ok(())
    }

    fn close(&self) {
        let _ = self.commands.send(Command::Stop);
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if self.on_worker() {
                // Closing from a callback; the worker exits once it returns.
                return;
            }
            if worker.join().is_err() {
                warn!("loopback worker panicked");
            }
        }
        debug!(port = self.shared.params.port, "loopback association closed");
    }
}

impl Drop for LoopbackAssociation {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Stop);
    }
}

// ─── Worker ─────────────────────────────────────────────────────────────────

fn run_worker(shared: Arc<Shared>, commands: Receiver<Command>) {
    while let Ok(command) = commands.recv() {
        if matches!(command, Command::Stop) {
            break;
        }
        shared.handle(command);
    }
    trace!(port = shared.params.port, "loopback worker exiting");
}

impl Shared {
    fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    fn set_phase(&self, phase: Phase) -> Phase {
        std::mem::replace(&mut *lock(&self.phase), phase)
    }

    /// Process one command. Never holds a lock across a callback.
    fn handle(&self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Data {
                stream_id,
                ppid,
                payload,
            } => self.transmit(stream_id, ppid, payload),
            Command::Input(packet) => self.input(packet),
            Command::Reset { direction, streams } => {
                let frame = Frame::Reset {
                    direction,
                    streams: streams.clone(),
                };
                if self.write(&frame) {
                    self.notify(Notification::StreamReset {
                        incoming: Vec::new(),
                        outgoing: streams,
                    });
                }
            }
            Command::Shutdown(reply) => {
                if self.phase() == Phase::Established {
                    self.set_phase(Phase::ShuttingDown);
                    self.write(&Frame::Shutdown);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            Command::Stop => {}
        }
    }

    fn connect(&self) {
        if self.phase() != Phase::Closed {
            return;
        }
        self.set_phase(Phase::Handshaking);
        if self.params.role == Role::Active && !self.write(&Frame::Init) {
            self.set_phase(Phase::Aborted);
            self.notify(Notification::AssociationChange(
                AssocChange::CantStartAssociation,
            ));
        }
    }

    fn transmit(&self, stream_id: u16, ppid: u32, payload: Bytes) {
        let len = payload.len();
        let written = self.write(&Frame::Data {
            stream_id,
            ppid,
            payload,
        });

        let remaining = {
            let mut buffered = lock(&self.buffered);
            *buffered = buffered.saturating_sub(len);
            *buffered
        };
        if !written {
            if self.set_phase(Phase::Aborted) == Phase::Established {
                warn!(stream_id, "data write failed; aborting association");
                self.notify(Notification::AssociationChange(AssocChange::CommLost));
            }
            return;
        }
        if self.want_ready.swap(false, Ordering::SeqCst) {
            let free = self.params.send_buffer_size.saturating_sub(remaining);
            self.handler.on_send_ready(free);
        }
        if remaining == 0 {
            self.notify(Notification::SenderDry);
        }
    }

    fn input(&self, mut packet: Bytes) {
        let Some(frame) = Frame::decode(&mut packet) else {
            warn!("undecodable loopback frame dropped");
            return;
        };
        trace!(frame = ?frame.frame_type(), "loopback frame received");
        match frame {
            Frame::Init => {
                let previous = self.phase();
                if matches!(previous, Phase::Closed | Phase::Handshaking | Phase::Established) {
                    self.set_phase(Phase::Established);
                    self.write(&Frame::InitAck);
                    if previous != Phase::Established {
                        self.notify(Notification::AssociationChange(AssocChange::CommUp));
                    }
                }
            }
            Frame::InitAck => {
                if self.phase() == Phase::Handshaking {
                    self.set_phase(Phase::Established);
                    self.notify(Notification::AssociationChange(AssocChange::CommUp));
                }
            }
            Frame::Data {
                stream_id,
                ppid,
                payload,
            } => self.deliver(stream_id, ppid, payload),
            Frame::Reset { direction, streams } => {
                let (incoming, outgoing) = match direction {
                    ResetDirection::Outgoing => (streams, Vec::new()),
                    ResetDirection::Incoming => (Vec::new(), streams),
                    ResetDirection::Both => (streams.clone(), streams),
                };
                self.notify(Notification::StreamReset { incoming, outgoing });
            }
            Frame::Shutdown => {
                self.write(&Frame::ShutdownAck);
                self.set_phase(Phase::Closed);
                self.notify(Notification::AssociationChange(
                    AssocChange::ShutdownComplete,
                ));
            }
            Frame::ShutdownAck => {
                if self.set_phase(Phase::Closed) == Phase::ShuttingDown {
                    self.notify(Notification::AssociationChange(
                        AssocChange::ShutdownComplete,
                    ));
                }
            }
            Frame::Abort => {
                self.set_phase(Phase::Aborted);
                self.notify(Notification::AssociationChange(AssocChange::CommLost));
            }
        }
    }

    fn deliver(&self, stream_id: u16, ppid: u32, payload: Bytes) {
        if !matches!(self.phase(), Phase::Established | Phase::ShuttingDown) {
            trace!(stream_id, "data outside an association dropped");
            return;
        }
        let total = payload.len();
        let mut offset = 0;
        loop {
            let end = total.min(offset + self.delivery_unit);
            let info = RecvInfo {
                stream_id,
                ppid,
                flags: RecvFlags {
                    end_of_record: end == total,
                },
            };
            let rc = self.handler.on_receive(&payload[offset..end], info);
            if rc != CALLBACK_OK {
                debug!(stream_id, rc, "receive callback reported failure");
            }
            offset = end;
            if offset >= total {
                break;
            }
        }
    }

    fn write(&self, frame: &Frame) -> bool {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let rc = self.handler.on_write(&buf, 0, false);
        if rc != CALLBACK_OK {
            debug!(frame = ?frame.frame_type(), rc, "write callback reported failure");
            return false;
        }
        true
    }

    fn notify(&self, notification: Notification) {
        let subscribed = notification
            .kind()
            .is_some_and(|kind| self.params.subscribes_to(kind));
        if subscribed {
            self.handler.on_notification(notification);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
