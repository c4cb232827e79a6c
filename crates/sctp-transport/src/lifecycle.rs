//! # Engine Lifecycle Guard
//!
//! Engines keep process-wide state that must be initialized before the first
//! association exists and torn down after the last one is gone. Each engine
//! exposes a static [`GlobalLifecycle`]; transports hold a
//! [`LifecycleLease`] for as long as they touch the engine.
//!
//! Init runs only on the 0→1 transition and cleanup only on 1→0, both
//! under the lifecycle mutex, so concurrent construction and destruction
//! of sibling transports never double-initialize.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::engine::Engine;
use crate::error::EngineError;

/// Process-wide reference count for one engine's global state.
#[derive(Debug)]
pub struct GlobalLifecycle {
    instances: Mutex<usize>,
}

impl GlobalLifecycle {
    pub const fn new() -> Self {
        Self {
            instances: Mutex::new(0),
        }
    }

    /// Number of live leases.
    pub fn instances(&self) -> usize {
        *self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for GlobalLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that the engine's global state is initialized.
///
/// Dropping the lease releases it.
pub struct LifecycleLease {
    engine: Arc<dyn Engine>,
}

impl LifecycleLease {
    /// Register one more user, initializing the engine if it is the first.
    ///
    /// A failed initialization leaves the count untouched.
    pub fn acquire(engine: Arc<dyn Engine>) -> Result<Self, EngineError> {
        let lifecycle = engine.lifecycle();
        let mut instances = lifecycle
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *instances == 0 {
            debug!("initializing engine global state");
            engine.global_init()?;
        }
        *instances += 1;
        drop(instances);
        Ok(Self { engine })
    }

    /// Give the lease back. Equivalent to dropping it.
    pub fn release(self) {}
}

impl Drop for LifecycleLease {
    fn drop(&mut self) {
        let lifecycle = self.engine.lifecycle();
        let mut instances = lifecycle
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *instances = instances.saturating_sub(1);
        if *instances == 0 {
            debug!("cleaning up engine global state");
            self.engine.global_cleanup();
        }
    }
}
