//! In-memory lower transport.
//!
//! A [`Pipe`] carries packets one way, from the transport that writes into
//! it to the transport attached at its far end. Packets written before the
//! far end is attached are held and delivered on attach.
//!
//! Completion is reported either inline from `write` or from a dedicated
//! delivery thread, which exercises the blocking write rendezvous the same
//! way an asynchronous datagram socket would.

use bytes::Bytes;
use crossbeam_channel::{unbounded, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use tracing::{trace, warn};

use sctp_transport::lower::LowerTransport;
use sctp_transport::write_sync::WriteCompletion;
use sctp_transport::{SctpTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// Deliver and complete before `write` returns.
    #[default]
    Inline,
    /// Deliver and complete on the pipe's delivery thread.
    Deferred,
}

#[derive(Default)]
struct Route {
    far_end: Option<Weak<SctpTransport>>,
    backlog: Vec<Bytes>,
}

struct Endpoint {
    route: Mutex<Route>,
    carried: AtomicU64,
}

impl Endpoint {
    fn route(&self) -> MutexGuard<'_, Route> {
        self.route.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand one packet to the far end, or hold it until one is attached.
    fn deliver(&self, packet: Bytes) {
        let mut route = self.route();
        match route.far_end.as_ref().map(Weak::upgrade) {
            Some(Some(far_end)) => {
                // Delivery is non-blocking; the lock keeps packets in order.
                far_end.incoming(&packet);
                self.carried.fetch_add(1, Ordering::Relaxed);
            }
            Some(None) => trace!(len = packet.len(), "far end gone; packet dropped"),
            None => route.backlog.push(packet),
        }
    }
}

pub struct Pipe {
    endpoint: Arc<Endpoint>,
    down: AtomicBool,
    deferred: Option<Sender<(Bytes, WriteCompletion)>>,
}

impl Pipe {
    pub fn new(mode: CompletionMode) -> Arc<Self> {
        let endpoint = Arc::new(Endpoint {
            route: Mutex::new(Route::default()),
            carried: AtomicU64::new(0),
        });
        let deferred = match mode {
            CompletionMode::Inline => None,
            CompletionMode::Deferred => Some(spawn_delivery(endpoint.clone())),
        };
        Arc::new(Self {
            endpoint,
            down: AtomicBool::new(false),
            deferred,
        })
    }

    /// Connect the far end and flush anything written so far.
    pub fn attach(&self, far_end: &Arc<SctpTransport>) {
        let mut route = self.endpoint.route();
        route.far_end = Some(Arc::downgrade(far_end));
        let backlog = std::mem::take(&mut route.backlog);
        for packet in backlog {
            far_end.incoming(&packet);
            self.endpoint.carried.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// While down, every write is refused.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Packets delivered to the far end.
    pub fn packets_carried(&self) -> u64 {
        self.endpoint.carried.load(Ordering::Relaxed)
    }
}

impl LowerTransport for Pipe {
    fn write(&self, packet: Bytes, completion: WriteCompletion) -> Result<(), TransportError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::WriteFailed("link down".into()));
        }
        match &self.deferred {
            None => {
                self.endpoint.deliver(packet);
                completion.complete(Ok(()));
                Ok(())
            }
            Some(tx) => tx
                .send((packet, completion))
                .map_err(|_| TransportError::WriteFailed("delivery thread gone".into())),
        }
    }
}

fn spawn_delivery(endpoint: Arc<Endpoint>) -> Sender<(Bytes, WriteCompletion)> {
    let (tx, rx) = unbounded::<(Bytes, WriteCompletion)>();
    let spawned = thread::Builder::new()
        .name("sctp-pipe".into())
        .spawn(move || {
            // Ends once the pipe, and with it the sender, is dropped.
            for (packet, completion) in rx {
                endpoint.deliver(packet);
                completion.complete(Ok(()));
            }
        });
    if let Err(err) = spawned {
        // Writes then fail with "delivery thread gone".
        warn!(error = %err, "failed to spawn pipe delivery thread");
    }
    tx
}

/// Two pipes, one per direction: `(a_to_b, b_to_a)`.
pub fn pipe_pair(mode: CompletionMode) -> (Arc<Pipe>, Arc<Pipe>) {
    (Pipe::new(mode), Pipe::new(mode))
}
