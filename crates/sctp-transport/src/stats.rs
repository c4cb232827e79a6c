//! # Transport Statistics
//!
//! Counters are plain atomics bumped from whichever thread does the work
//! (consumer, engine, lower transport) and read as a [`TransportStats`]
//! snapshot.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the transport counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    /// Messages fully handed to the engine.
    pub messages_sent: u64,
    /// Payload bytes of those messages.
    pub bytes_sent: u64,
    /// Engine-level sends (one per chunk).
    pub chunks_sent: u64,
    /// Messages and control payloads delivered upward.
    pub messages_received: u64,
    pub bytes_received: u64,
    /// Packets written to the lower transport.
    pub packets_written: u64,
    pub bytes_written: u64,
    /// Packets fed from the lower transport into the engine.
    pub packets_received: u64,
    /// Inbound deliveries dropped for malformed framing.
    pub discarded_deliveries: u64,
    /// Times a send or drain stopped on engine backpressure.
    pub send_blocked: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub messages_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub chunks_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub packets_written: AtomicU64,
    pub bytes_written: AtomicU64,
    pub packets_received: AtomicU64,
    pub discarded_deliveries: AtomicU64,
    pub send_blocked: AtomicU64,
}

impl StatsCounters {
    #[inline]
    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransportStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        TransportStats {
            messages_sent: load(&self.messages_sent),
            bytes_sent: load(&self.bytes_sent),
            chunks_sent: load(&self.chunks_sent),
            messages_received: load(&self.messages_received),
            bytes_received: load(&self.bytes_received),
            packets_written: load(&self.packets_written),
            bytes_written: load(&self.bytes_written),
            packets_received: load(&self.packets_received),
            discarded_deliveries: load(&self.discarded_deliveries),
            send_blocked: load(&self.send_blocked),
        }
    }
}
