//! # Segmentation Engine Capability
//!
//! The multi-stream reliable transport engine (congestion control,
//! retransmission, stream sequencing) is opaque to this crate. It is reached
//! only through the traits below, so any engine satisfying them can be
//! substituted, including an in-memory fake for tests.
//!
//! Callbacks into [`EngineHandler`] run on threads the engine owns. They
//! return the engine's numeric status convention ([`CALLBACK_OK`] or
//! [`CALLBACK_ERR`]) and must never unwind back into the engine.

use std::sync::Arc;

use crate::config::Role;
use crate::error::EngineError;
use crate::lifecycle::GlobalLifecycle;
use crate::message::Reliability;
use crate::wire::{PayloadId, RecvInfo};

/// Callback status: success.
pub const CALLBACK_OK: i32 = 0;
/// Callback status: failure (the engine treats the operation as not done).
pub const CALLBACK_ERR: i32 = -1;

// ─── Notifications ──────────────────────────────────────────────────────────

/// Association state changes reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocChange {
    /// Handshake completed; the association is usable.
    CommUp,
    /// The peer vanished or aborted.
    CommLost,
    Restart,
    /// Graceful shutdown finished (either side initiated it).
    ShutdownComplete,
    /// The handshake could not be completed.
    CantStartAssociation,
}

/// Notification kinds a binding may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    AssociationChange,
    SenderDry,
    StreamReset,
}

/// Out-of-band events delivered through [`EngineHandler::on_notification`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    AssociationChange(AssocChange),
    /// All outstanding data has been acknowledged by the peer.
    SenderDry,
    StreamReset {
        /// Streams the peer closed towards us.
        incoming: Vec<u16>,
        /// Streams whose outgoing side we reset and the peer confirmed.
        outgoing: Vec<u16>,
    },
    /// Anything else, identified by the engine's raw notification type.
    Other(u16),
}

impl Notification {
    pub fn kind(&self) -> Option<NotificationKind> {
        match self {
            Notification::AssociationChange(_) => Some(NotificationKind::AssociationChange),
            Notification::SenderDry => Some(NotificationKind::SenderDry),
            Notification::StreamReset { .. } => Some(NotificationKind::StreamReset),
            Notification::Other(_) => None,
        }
    }
}

/// Which half of a stream a reset request closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetDirection {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

// ─── Association Parameters ─────────────────────────────────────────────────

/// Settings applied to a freshly opened association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationParams {
    /// Port used for both the local and the remote side.
    pub port: u16,
    pub role: Role,
    /// Sends must fail with [`EngineError::WouldBlock`] instead of blocking.
    pub non_blocking: bool,
    pub send_buffer_size: usize,
    pub subscriptions: Vec<NotificationKind>,
}

impl AssociationParams {
    pub fn subscribes_to(&self, kind: NotificationKind) -> bool {
        self.subscriptions.contains(&kind)
    }
}

// ─── Capability Traits ──────────────────────────────────────────────────────

/// Callbacks an engine invokes on its own threads.
pub trait EngineHandler: Send + Sync {
    /// One received piece of user data.
    fn on_receive(&self, data: &[u8], info: RecvInfo) -> i32;

    /// The engine has `free` bytes of send buffer available.
    fn on_send_ready(&self, free: usize) -> i32;

    /// The engine wants `packet` written to the lower transport. The
    /// engine reuses the buffer once this returns.
    fn on_write(&self, packet: &[u8], tos: u8, set_df: bool) -> i32;

    fn on_notification(&self, notification: Notification);
}

/// One live association, exclusively owned by one transport instance.
pub trait Association: Send + Sync {
    /// Start the handshake (active) or wait for the peer (passive).
    fn connect(&self) -> Result<(), EngineError>;

    /// Queue one engine-level message. Returns the number of bytes accepted.
    fn send(
        &self,
        stream_id: u16,
        ppid: PayloadId,
        data: &[u8],
        reliability: &Reliability,
    ) -> Result<usize, EngineError>;

    /// Feed a packet received from the lower transport.
    fn input(&self, packet: &[u8]);

    fn reset_streams(&self, stream_ids: &[u16], direction: ResetDirection)
        -> Result<(), EngineError>;

    /// Begin a graceful association shutdown.
    fn shutdown(&self) -> Result<(), EngineError>;

    /// Destroy the handle. Called exactly once; no method is called after it.
    fn close(&self);
}

/// Factory for associations plus the engine's process-wide state.
pub trait Engine: Send + Sync + 'static {
    /// Reference counter shared by every association of this engine.
    fn lifecycle(&self) -> &'static GlobalLifecycle;

    /// One-time global initialization, run on the first acquire.
    fn global_init(&self) -> Result<(), EngineError>;

    /// Global teardown, run when the last user releases.
    fn global_cleanup(&self);

    /// Create an association and register `handler` for its callbacks.
    fn open(
        &self,
        params: &AssociationParams,
        handler: Arc<dyn EngineHandler>,
    ) -> Result<Box<dyn Association>, EngineError>;
}
