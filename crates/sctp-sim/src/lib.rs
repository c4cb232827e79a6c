//! In-process simulation toolkit for `sctp-transport`.
//!
//! Provides a loopback segmentation engine, one-way in-memory pipes standing
//! in for the encrypted datagram layer, and a harness wiring two transports
//! back to back for end-to-end tests and the `loopback-node` binary.

pub mod engine;
pub mod frame;
pub mod harness;
pub mod pipe;

pub use engine::LoopbackEngine;
pub use harness::{connect_pair, Peer, PeerPair};
pub use pipe::{pipe_pair, CompletionMode, Pipe};
