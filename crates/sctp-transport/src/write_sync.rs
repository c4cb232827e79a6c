//! # Write Synchronization
//!
//! The engine's write callback runs on an engine thread and must not return
//! until the lower transport has taken the packet. [`WriteSync`] is the
//! rendezvous between that thread and whichever thread reports completion:
//!
//! ```text
//!   engine thread                          lower transport thread
//!   ─────────────                          ──────────────────────
//!   gate.lock()            (one write in flight)
//!   slot.generation += 1
//!   lower.write(packet, completion) ──────▶ ... sends ...
//!   wait on cond  ◀─────────────────────── completion.complete(Ok)
//!   gate.unlock()
//! ```
//!
//! Each write gets a generation number, so a completion that arrives after
//! its write was abandoned by shutdown cannot satisfy a later write.
//!
//! Teardown happens in two steps. [`WriteSync::close`] releases the writer
//! parked on the gate and stops later writers from waiting for completion,
//! so the engine can still push its final packets through inline while it
//! shuts the association down. [`WriteSync::shutdown`] then refuses every
//! further write. Both wake waiters with [`TransportError::ShutDown`].

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::TransportError;

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    outcome: Option<Result<(), TransportError>>,
    /// Writes are handed off but no longer waited for.
    closing: bool,
    shutdown: bool,
}

#[derive(Debug, Default)]
pub struct WriteSync {
    /// Held for one whole write-and-wait cycle.
    gate: Mutex<()>,
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl WriteSync {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start a write with `start` and block until it completes or shutdown.
    ///
    /// `start` receives the completion handle to pass to the lower
    /// transport. An `Err` from `start` is an immediate failure.
    pub fn write_blocking<F>(self: &Arc<Self>, start: F) -> Result<(), TransportError>
    where
        F: FnOnce(WriteCompletion) -> Result<(), TransportError>,
    {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);

        let (generation, closing) = {
            let mut slot = self.slot();
            if slot.shutdown {
                return Err(TransportError::ShutDown);
            }
            slot.generation += 1;
            slot.outcome = None;
            (slot.generation, slot.closing)
        };

        start(WriteCompletion {
            sync: Some(Arc::clone(self)),
            generation,
        })?;
        if closing {
            // Handed off; nobody waits for the outcome any more.
            return Ok(());
        }

        let mut slot = self.slot();
        loop {
            if slot.generation == generation {
                if let Some(outcome) = slot.outcome.take() {
                    return outcome;
                }
            }
            if slot.shutdown {
                return Err(TransportError::ShutDown);
            }
            if slot.closing {
                return Err(TransportError::ShutDown);
            }
            slot = self
                .cond
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Release the writer waiting for a completion, if any. Later writes
    /// still reach the lower transport but return once handed off.
    pub fn close(&self) {
        self.slot().closing = true;
        self.cond.notify_all();
    }

    /// Release all current and future writers.
    pub fn shutdown(&self) {
        let mut slot = self.slot();
        slot.closing = true;
        slot.shutdown = true;
        drop(slot);
        self.cond.notify_all();
    }

    fn finish(&self, generation: u64, result: Result<(), TransportError>) {
        let mut slot = self.slot();
        if slot.generation == generation && slot.outcome.is_none() {
            slot.outcome = Some(result);
            drop(slot);
            self.cond.notify_all();
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle the lower transport uses to report that one write finished.
///
/// Dropping it without calling [`complete`](Self::complete) fails the write,
/// so a lost handle can never park the engine thread forever.
#[derive(Debug)]
pub struct WriteCompletion {
    sync: Option<Arc<WriteSync>>,
    generation: u64,
}

impl WriteCompletion {
    pub fn complete(mut self, result: Result<(), TransportError>) {
        if let Some(sync) = self.sync.take() {
            sync.finish(self.generation, result);
        }
    }
}

impl Drop for WriteCompletion {
    fn drop(&mut self) {
        if let Some(sync) = self.sync.take() {
            sync.finish(
                self.generation,
                Err(TransportError::WriteFailed("completion dropped".into())),
            );
        }
    }
}
