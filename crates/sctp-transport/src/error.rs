//! Error taxonomy for the transport layer.
//!
//! Backpressure is deliberately absent from [`TransportError`]: a buffered
//! send is reported through `Ok(false)` and buffered-amount deltas, never as
//! an error. [`EngineError::WouldBlock`] only travels between the engine and
//! the binding.

use thiserror::Error;

use crate::state::ConnectionState;

// ── Engine Errors ───────────────────────────────────────────────────

/// Failures reported by a segmentation engine implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine has no buffer space for this send right now.
    #[error("engine send buffer full")]
    WouldBlock,
    /// The association handle is closed or was never opened.
    #[error("association closed")]
    Closed,
    #[error("invalid stream id {0}")]
    InvalidStream(u16),
    /// Process-wide engine initialization failed.
    #[error("engine initialization failed: {0}")]
    Init(String),
    #[error("engine I/O error: {0}")]
    Io(String),
}

// ── Transport Errors ────────────────────────────────────────────────

/// Errors surfaced to the consumer of [`SctpTransport`](crate::SctpTransport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Sends are refused once the association is closed or failed.
    #[error("transport not connected (state: {0})")]
    NotConnected(ConnectionState),
    #[error("transport shut down")]
    ShutDown,
    #[error("lower transport write failed: {0}")]
    WriteFailed(String),
    #[error("message of {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },
}

// ── Config Errors ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
}
