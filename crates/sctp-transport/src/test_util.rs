//! In-process fakes for unit tests: an engine that records what it is asked
//! to do and lets the test fire callbacks by hand, plus a recording lower
//! transport.

use bytes::Bytes;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::TransportConfig;
use crate::engine::{
    AssocChange, Association, AssociationParams, Engine, EngineHandler, Notification,
    ResetDirection, CALLBACK_ERR,
};
use crate::error::{EngineError, TransportError};
use crate::handler::{ChannelHandler, TransportEvent};
use crate::lifecycle::GlobalLifecycle;
use crate::lower::LowerTransport;
use crate::message::Reliability;
use crate::transport::SctpTransport;
use crate::wire::{PayloadId, RecvInfo};
use crate::write_sync::WriteCompletion;

static FAKE_LIFECYCLE: GlobalLifecycle = GlobalLifecycle::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentChunk {
    pub stream_id: u16,
    pub ppid: PayloadId,
    pub data: Vec<u8>,
    pub reliability: Reliability,
}

#[derive(Default)]
pub(crate) struct FakeState {
    pub sent: Mutex<Vec<SentChunk>>,
    pub resets: Mutex<Vec<(u16, ResetDirection)>>,
    pub inputs: Mutex<Vec<Vec<u8>>>,
    pub handler: Mutex<Option<Arc<dyn EngineHandler>>>,
    pub params: Mutex<Option<AssociationParams>>,
    pub blocked: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_reset: AtomicBool,
    /// Fire `on_send_ready` from inside every accepted send.
    pub inline_send_ready: AtomicBool,
    /// Write a final packet through `on_write` from inside `shutdown`.
    pub write_on_shutdown: AtomicBool,
    /// Sends left before every send fails hard; `None` never fails.
    pub fail_after: Mutex<Option<usize>>,
    pub connects: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub closes: AtomicUsize,
}

pub(crate) struct FakeEngine {
    pub state: Arc<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(FakeState::default()),
        })
    }

    fn handler(&self) -> Option<Arc<dyn EngineHandler>> {
        self.state.handler.lock().unwrap().clone()
    }

    pub fn params(&self) -> Option<AssociationParams> {
        self.state.params.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<SentChunk> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn resets(&self) -> Vec<(u16, ResetDirection)> {
        self.state.resets.lock().unwrap().clone()
    }

    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.state.inputs.lock().unwrap().clone()
    }

    pub fn set_blocked(&self, blocked: bool) {
        self.state.blocked.store(blocked, Ordering::SeqCst);
    }

    pub fn deliver(&self, data: &[u8], info: RecvInfo) -> i32 {
        self.handler()
            .map_or(CALLBACK_ERR, |h| h.on_receive(data, info))
    }

    pub fn send_ready(&self, free: usize) -> i32 {
        self.handler()
            .map_or(CALLBACK_ERR, |h| h.on_send_ready(free))
    }

    pub fn write(&self, packet: &[u8]) -> i32 {
        self.handler()
            .map_or(CALLBACK_ERR, |h| h.on_write(packet, 0, false))
    }

    pub fn notify(&self, notification: Notification) {
        if let Some(h) = self.handler() {
            h.on_notification(notification);
        }
    }

    pub fn comm_up(&self) {
        self.notify(Notification::AssociationChange(AssocChange::CommUp));
    }
}

impl Engine for FakeEngine {
    fn lifecycle(&self) -> &'static GlobalLifecycle {
        &FAKE_LIFECYCLE
    }

    fn global_init(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn global_cleanup(&self) {}

    fn open(
        &self,
        params: &AssociationParams,
        handler: Arc<dyn EngineHandler>,
    ) -> Result<Box<dyn Association>, EngineError> {
        *self.state.params.lock().unwrap() = Some(params.clone());
        *self.state.handler.lock().unwrap() = Some(handler);
        Ok(Box::new(FakeAssociation {
            state: self.state.clone(),
        }))
    }
}

struct FakeAssociation {
    state: Arc<FakeState>,
}

impl Association for FakeAssociation {
    fn connect(&self) -> Result<(), EngineError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(EngineError::Io("connect refused".into()));
        }
        Ok(())
    }

    fn send(
        &self,
        stream_id: u16,
        ppid: PayloadId,
        data: &[u8],
        reliability: &Reliability,
    ) -> Result<usize, EngineError> {
        if self.state.blocked.load(Ordering::SeqCst) {
            return Err(EngineError::WouldBlock);
        }
        if let Some(left) = self.state.fail_after.lock().unwrap().as_mut() {
            if *left == 0 {
                return Err(EngineError::Io("association aborted".into()));
            }
            *left -= 1;
        }
        self.state.sent.lock().unwrap().push(SentChunk {
            stream_id,
            ppid,
            data: data.to_vec(),
            reliability: *reliability,
        });
        if self.state.inline_send_ready.load(Ordering::SeqCst) {
            let handler = self.state.handler.lock().unwrap().clone();
            if let Some(handler) = handler {
                handler.on_send_ready(1024);
            }
        }
        Ok(data.len())
    }

    fn input(&self, packet: &[u8]) {
        self.state.inputs.lock().unwrap().push(packet.to_vec());
    }

    fn reset_streams(
        &self,
        stream_ids: &[u16],
        direction: ResetDirection,
    ) -> Result<(), EngineError> {
        if self.state.fail_reset.load(Ordering::SeqCst) {
            return Err(EngineError::InvalidStream(stream_ids[0]));
        }
        let mut resets = self.state.resets.lock().unwrap();
        resets.extend(stream_ids.iter().map(|s| (*s, direction)));
        Ok(())
    }

    fn shutdown(&self) -> Result<(), EngineError> {
        self.state.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.state.write_on_shutdown.load(Ordering::SeqCst) {
            let handler = self.state.handler.lock().unwrap().clone();
            if let Some(handler) = handler {
                handler.on_write(b"SHUTDOWN", 0, false);
            }
        }
        Ok(())
    }

    fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Lower transport that keeps every packet it is given.
#[derive(Default)]
pub(crate) struct RecordingLower {
    pub packets: Mutex<Vec<Bytes>>,
    /// Keep completions instead of completing inline.
    pub hold: AtomicBool,
    pub held: Mutex<Vec<WriteCompletion>>,
    pub refuse: AtomicBool,
}

impl RecordingLower {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn packets(&self) -> Vec<Bytes> {
        self.packets.lock().unwrap().clone()
    }
}

impl LowerTransport for RecordingLower {
    fn write(&self, packet: Bytes, completion: WriteCompletion) -> Result<(), TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::WriteFailed("refused".into()));
        }
        self.packets.lock().unwrap().push(packet);
        if self.hold.load(Ordering::SeqCst) {
            self.held.lock().unwrap().push(completion);
        } else {
            completion.complete(Ok(()));
        }
        Ok(())
    }
}

pub(crate) struct Harness {
    pub engine: Arc<FakeEngine>,
    pub lower: Arc<RecordingLower>,
    pub events: Receiver<TransportEvent>,
    pub transport: SctpTransport,
}

pub(crate) fn harness() -> Harness {
    harness_with(TransportConfig::default())
}

pub(crate) fn harness_with(config: TransportConfig) -> Harness {
    let engine = FakeEngine::new();
    let lower = RecordingLower::new();
    let (handler, events) = ChannelHandler::new();
    let transport = SctpTransport::new(engine.clone(), lower.clone(), Arc::new(handler), config)
        .expect("fake transport");
    Harness {
        engine,
        lower,
        events,
        transport,
    }
}
