//! Contract with the packet-oriented transport underneath (typically an
//! encrypted datagram channel).

use bytes::Bytes;

use crate::error::TransportError;
use crate::write_sync::WriteCompletion;

/// Write side of the lower transport.
///
/// The read side is the transport calling
/// [`SctpTransport::incoming`](crate::SctpTransport::incoming) for every
/// decoded packet.
pub trait LowerTransport: Send + Sync {
    /// Hand one packet down.
    ///
    /// `Err` means the packet was refused outright. `Ok` means it was
    /// accepted; the implementation then calls `completion.complete(..)`
    /// once the packet is actually out, from any thread, possibly before
    /// returning.
    fn write(&self, packet: Bytes, completion: WriteCompletion) -> Result<(), TransportError>;
}
