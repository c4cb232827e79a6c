//! # Data Channel Payload Framing
//!
//! Every engine-level message carries a payload protocol identifier (PPID)
//! telling the peer which class of payload it holds and whether more
//! pieces of the same message follow.
//!
//! ```text
//!   PPID  class     fragmentation
//!   ────  ───────   ─────────────
//!    50   control   complete
//!    51   string    complete (terminal)
//!    52   binary    partial
//!    53   binary    complete (terminal)
//!    54   string    partial
//!    56   string    empty
//!    57   binary    empty
//! ```
//!
//! The numbering is not sequential. The values are fixed by the WebRTC
//! data channel draft and must stay bit-exact on the wire.

use crate::message::MessageKind;

// ─── Payload Identifiers ────────────────────────────────────────────────────

/// Payload protocol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PayloadId {
    Control = 50,
    String = 51,
    BinaryPartial = 52,
    Binary = 53,
    StringPartial = 54,
    StringEmpty = 56,
    BinaryEmpty = 57,
}

/// Payload class a [`PayloadId`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadClass {
    Control,
    String,
    Binary,
}

/// Body sent in place of an empty message, which engines cannot carry.
pub const EMPTY_PAYLOAD: [u8; 1] = [0];

impl PayloadId {
    /// Map a raw identifier from the wire. Unknown values yield `None`.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            50 => Some(PayloadId::Control),
            51 => Some(PayloadId::String),
            52 => Some(PayloadId::BinaryPartial),
            53 => Some(PayloadId::Binary),
            54 => Some(PayloadId::StringPartial),
            56 => Some(PayloadId::StringEmpty),
            57 => Some(PayloadId::BinaryEmpty),
            _ => None,
        }
    }

    #[inline]
    pub fn value(self) -> u32 {
        self as u32
    }

    pub fn class(self) -> PayloadClass {
        match self {
            PayloadId::Control => PayloadClass::Control,
            PayloadId::String | PayloadId::StringPartial | PayloadId::StringEmpty => {
                PayloadClass::String
            }
            PayloadId::Binary | PayloadId::BinaryPartial | PayloadId::BinaryEmpty => {
                PayloadClass::Binary
            }
        }
    }

    pub fn is_partial(self) -> bool {
        matches!(self, PayloadId::StringPartial | PayloadId::BinaryPartial)
    }

    pub fn is_empty_marker(self) -> bool {
        matches!(self, PayloadId::StringEmpty | PayloadId::BinaryEmpty)
    }

    /// Identifier for the last (or only) piece of a message.
    pub fn terminal(kind: MessageKind, empty: bool) -> Self {
        match (kind, empty) {
            (MessageKind::Control, _) => PayloadId::Control,
            (MessageKind::Text, true) => PayloadId::StringEmpty,
            (MessageKind::Text, false) => PayloadId::String,
            (MessageKind::Binary, true) => PayloadId::BinaryEmpty,
            (MessageKind::Binary, false) => PayloadId::Binary,
        }
    }

    /// Identifier for a non-final piece. Control payloads are never split.
    pub fn partial(kind: MessageKind) -> Option<Self> {
        match kind {
            MessageKind::Text => Some(PayloadId::StringPartial),
            MessageKind::Binary => Some(PayloadId::BinaryPartial),
            MessageKind::Control => None,
        }
    }
}

impl From<PayloadId> for u32 {
    fn from(id: PayloadId) -> u32 {
        id.value()
    }
}

// ─── Receive Metadata ───────────────────────────────────────────────────────

/// Flags the engine reports with each received piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvFlags {
    /// Set on the final piece of one engine-level message.
    pub end_of_record: bool,
}

impl Default for RecvFlags {
    fn default() -> Self {
        Self {
            end_of_record: true,
        }
    }
}

/// Metadata accompanying one engine delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvInfo {
    pub stream_id: u16,
    /// Raw identifier; may hold values outside [`PayloadId`].
    pub ppid: u32,
    pub flags: RecvFlags,
}

impl RecvInfo {
    /// A complete delivery carrying a known payload id.
    pub fn complete(stream_id: u16, ppid: PayloadId) -> Self {
        Self {
            stream_id,
            ppid: ppid.value(),
            flags: RecvFlags::default(),
        }
    }
}

// ─── Outbound Fragmentation ─────────────────────────────────────────────────

/// One engine-level send carved out of a message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub ppid: PayloadId,
    /// Byte range within the message payload. Empty for empty-message markers.
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether this chunk completes its message.
    pub fn is_last(&self, total: usize) -> bool {
        self.end == total
    }
}

/// Next chunk of a `total`-byte message after `offset` bytes were accepted.
///
/// Text and binary payloads longer than `max_fragment` are split into
/// partial-tagged chunks followed by one terminal chunk. Control payloads
/// always go out whole.
pub fn next_chunk(kind: MessageKind, total: usize, offset: usize, max_fragment: usize) -> Chunk {
    if total == 0 {
        return Chunk {
            ppid: PayloadId::terminal(kind, true),
            start: 0,
            end: 0,
        };
    }
    let end = match kind {
        MessageKind::Control => total,
        _ => total.min(offset.saturating_add(max_fragment.max(1))),
    };
    let ppid = if end < total {
        PayloadId::partial(kind).unwrap_or(PayloadId::Control)
    } else {
        PayloadId::terminal(kind, false)
    };
    Chunk {
        ppid,
        start: offset,
        end,
    }
}

/// Number of engine-level sends a message of `total` bytes needs.
pub fn chunk_count(kind: MessageKind, total: usize, max_fragment: usize) -> usize {
    match kind {
        MessageKind::Control => 1,
        _ if total == 0 => 1,
        _ => total.div_ceil(max_fragment.max(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_ids_are_bit_exact() {
        assert_eq!(PayloadId::Control.value(), 50);
        assert_eq!(PayloadId::String.value(), 51);
        assert_eq!(PayloadId::BinaryPartial.value(), 52);
        assert_eq!(PayloadId::Binary.value(), 53);
        assert_eq!(PayloadId::StringPartial.value(), 54);
        assert_eq!(PayloadId::StringEmpty.value(), 56);
        assert_eq!(PayloadId::BinaryEmpty.value(), 57);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        assert_eq!(PayloadId::from_u32(55), None);
        assert_eq!(PayloadId::from_u32(0), None);
        assert_eq!(PayloadId::from_u32(58), None);
        for id in 50..=57 {
            if let Some(ppid) = PayloadId::from_u32(id) {
                assert_eq!(ppid.value(), id);
            }
        }
    }

    #[test]
    fn classes_do_not_mix() {
        assert_eq!(PayloadId::StringPartial.class(), PayloadClass::String);
        assert_eq!(PayloadId::BinaryEmpty.class(), PayloadClass::Binary);
        assert_eq!(PayloadId::Control.class(), PayloadClass::Control);
        assert!(PayloadId::BinaryPartial.is_partial());
        assert!(!PayloadId::Binary.is_partial());
        assert!(PayloadId::StringEmpty.is_empty_marker());
    }

    #[test]
    fn small_message_is_one_terminal_chunk() {
        let chunk = next_chunk(MessageKind::Text, 5, 0, 16);
        assert_eq!(
            chunk,
            Chunk {
                ppid: PayloadId::String,
                start: 0,
                end: 5
            }
        );
        assert!(chunk.is_last(5));
        assert_eq!(chunk_count(MessageKind::Text, 5, 16), 1);
    }

    #[test]
    fn large_binary_message_splits_into_partials() {
        let total = 10;
        let mut offset = 0;
        let mut chunks = Vec::new();
        loop {
            let chunk = next_chunk(MessageKind::Binary, total, offset, 4);
            offset = chunk.end;
            chunks.push(chunk);
            if chunk.is_last(total) {
                break;
            }
        }
        let ppids: Vec<_> = chunks.iter().map(|c| c.ppid).collect();
        assert_eq!(
            ppids,
            vec![
                PayloadId::BinaryPartial,
                PayloadId::BinaryPartial,
                PayloadId::Binary
            ]
        );
        assert_eq!(chunks[2].len(), 2);
        assert_eq!(chunk_count(MessageKind::Binary, total, 4), 3);
    }

    #[test]
    fn empty_message_uses_empty_marker() {
        let chunk = next_chunk(MessageKind::Binary, 0, 0, 4);
        assert_eq!(chunk.ppid, PayloadId::BinaryEmpty);
        assert!(chunk.is_empty());
        assert!(chunk.is_last(0));
    }

    #[test]
    fn control_is_never_split() {
        let chunk = next_chunk(MessageKind::Control, 100, 0, 4);
        assert_eq!(chunk.ppid, PayloadId::Control);
        assert_eq!(chunk.end, 100);
        assert_eq!(chunk_count(MessageKind::Control, 100, 4), 1);
    }
}
