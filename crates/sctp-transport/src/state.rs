//! # Connection State Machine
//!
//! ```text
//!   Disconnected ──connect──▶ Connecting ──CommUp──▶ Connected
//!         │                      │  │                   │  │
//!         │                      │  └──shutdown────┐    │  │
//!         │                      │                 ▼    ▼  │
//!         │                      │             Disconnected│
//!         └──────────────────────┴────────▶ Failed ◀───────┘
//! ```
//!
//! Failed is terminal. A transition to the current state is refused, so
//! each accepted transition maps to exactly one consumer notification.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Association state as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Failed = 3,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Failed,
        }
    }

    /// Whether `self → to` is a legal transition.
    pub fn can_transition(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, to) {
            (Failed, _) => false,
            (from, to) if from == to => false,
            (_, Failed) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connecting | Connected, Disconnected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free holder of the current [`ConnectionState`].
#[derive(Debug)]
pub struct StateMachine {
    state: AtomicU8,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
        }
    }

    pub fn current(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Attempt `current → to`. Returns the previous state when the
    /// transition was applied, `None` when it was refused.
    ///
    /// Concurrent callers racing for the same transition see exactly one
    /// success.
    pub fn transition(&self, to: ConnectionState) -> Option<ConnectionState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = ConnectionState::from_u8(current);
            if !from.can_transition(to) {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(from),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
