//! # sctp-transport
//!
//! Data-channel transport over an SCTP engine.
//!
//! Sits between a packet-oriented lower transport (an encrypted datagram
//! channel) and a message-oriented consumer. Outbound messages are split into
//! engine-sized chunks tagged with their payload protocol identifier;
//! inbound chunks are reassembled into whole messages. The SCTP engine
//! itself is opaque and plugged in through the traits in [`engine`].
//!
//! ## Crate structure
//!
//! - [`wire`]: Payload protocol identifiers, receive metadata, fragmentation
//! - [`message`]: Message kinds, reliability, the message value
//! - [`engine`]: Capability traits the SCTP engine implements
//! - [`lifecycle`]: Process-wide engine init/cleanup refcount
//! - [`state`]: Connection state machine
//! - [`outbound`]: Send queue and buffered-amount accounting
//! - [`inbound`]: Partial-message reassembly
//! - [`write_sync`]: Blocking rendezvous for engine writes
//! - [`lower`]: Contract with the lower transport
//! - [`handler`]: Consumer callbacks
//! - [`config`]: TOML configuration
//! - [`stats`]: Transport counters
//! - [`transport`]: [`SctpTransport`], binding all of the above

pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod inbound;
pub mod lifecycle;
pub mod lower;
pub mod message;
pub mod outbound;
pub mod state;
pub mod stats;
pub mod transport;
pub mod wire;
pub mod write_sync;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::{Role, TransportConfig};
pub use engine::{Association, Engine, EngineHandler, Notification, ResetDirection};
pub use error::{ConfigError, EngineError, TransportError};
pub use handler::{ChannelHandler, TransportEvent, TransportHandler};
pub use lower::LowerTransport;
pub use message::{Message, MessageKind, Reliability, ReliabilityPolicy};
pub use state::ConnectionState;
pub use stats::TransportStats;
pub use transport::SctpTransport;
pub use wire::PayloadId;
pub use write_sync::WriteCompletion;
