//! # Inbound Reassembler
//!
//! Two layers of reassembly run on every delivery:
//!
//! 1. **Records.** The engine may hand one engine-level message over in
//!    several pieces; all but the last lack the end-of-record flag. Pieces
//!    are concatenated until the record is complete.
//! 2. **Partial payloads.** A complete record tagged string-partial or
//!    binary-partial is appended to that class's slot; the next terminal
//!    tag of the same class flushes the slot as one message.
//!
//! ```text
//!            partial                      terminal
//!   Idle ─────────────▶ Accumulating ─────────────▶ Idle  (emit message)
//!     │                   │     ▲
//!     │ terminal          └─────┘ partial
//!     ▼
//!   emit message
//! ```
//!
//! The string and binary slots are independent. Empty-message tags emit a
//! zero-length message and leave both slots alone. Control payloads pass
//! through untouched.

use bytes::{Bytes, BytesMut};
use std::mem;

use crate::message::{Message, MessageKind};
use crate::wire::{PayloadClass, PayloadId, RecvInfo};

// ─── Partial Slot ───────────────────────────────────────────────────────────

/// Accumulator for one payload class.
#[derive(Debug, Default)]
enum PartialSlot {
    #[default]
    Idle,
    Accumulating(BytesMut),
}

impl PartialSlot {
    fn is_idle(&self) -> bool {
        matches!(self, PartialSlot::Idle)
    }

    fn pending_len(&self) -> usize {
        match self {
            PartialSlot::Idle => 0,
            PartialSlot::Accumulating(buf) => buf.len(),
        }
    }

    fn append(&mut self, data: &[u8]) {
        match self {
            PartialSlot::Idle => *self = PartialSlot::Accumulating(BytesMut::from(data)),
            PartialSlot::Accumulating(buf) => buf.extend_from_slice(data),
        }
    }

    fn take(&mut self) -> Option<BytesMut> {
        match mem::take(self) {
            PartialSlot::Idle => None,
            PartialSlot::Accumulating(buf) => Some(buf),
        }
    }
}

// ─── Outcomes ───────────────────────────────────────────────────────────────

/// A completed inbound unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(Message),
    Control { stream_id: u16, payload: Bytes },
}

/// Why a delivery was dropped. None of these tear down the association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    UnknownPayloadId(u32),
    /// A terminal tag with no pending partial data and no bytes of its own.
    EmptyTerminal,
    /// Reassembly would exceed the configured maximum message size.
    Oversized { size: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// More pieces are needed.
    Pending,
    Complete(Inbound),
    Discarded(DiscardReason),
}

// ─── Reassembler ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Reassembler {
    max_message_size: usize,
    record: BytesMut,
    record_overflow: Option<usize>,
    string: PartialSlot,
    binary: PartialSlot,
}

impl Reassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            record: BytesMut::new(),
            record_overflow: None,
            string: PartialSlot::Idle,
            binary: PartialSlot::Idle,
        }
    }

    /// Whether `class` has partial data waiting for its terminal piece.
    pub fn is_accumulating(&self, class: PayloadClass) -> bool {
        match class {
            PayloadClass::String => !self.string.is_idle(),
            PayloadClass::Binary => !self.binary.is_idle(),
            PayloadClass::Control => false,
        }
    }

    pub fn pending_len(&self, class: PayloadClass) -> usize {
        match class {
            PayloadClass::String => self.string.pending_len(),
            PayloadClass::Binary => self.binary.pending_len(),
            PayloadClass::Control => 0,
        }
    }

    /// Feed one engine delivery, which may be a fragment of a record.
    pub fn push(&mut self, data: &[u8], info: RecvInfo) -> Reassembly {
        if !info.flags.end_of_record {
            self.buffer_record(data);
            return Reassembly::Pending;
        }

        if let Some(size) = self.record_overflow.take() {
            self.record.clear();
            return Reassembly::Discarded(DiscardReason::Oversized {
                size: size + data.len(),
                max: self.max_message_size,
            });
        }

        if self.record.is_empty() {
            return self.process(data, info.stream_id, info.ppid);
        }
        self.record.extend_from_slice(data);
        let record = self.record.split().freeze();
        self.process(&record, info.stream_id, info.ppid)
    }

    /// Apply payload-type framing to one complete record.
    pub fn process(&mut self, data: &[u8], stream_id: u16, ppid: u32) -> Reassembly {
        let Some(id) = PayloadId::from_u32(ppid) else {
            return Reassembly::Discarded(DiscardReason::UnknownPayloadId(ppid));
        };

        match id {
            PayloadId::Control => Reassembly::Complete(Inbound::Control {
                stream_id,
                payload: Bytes::copy_from_slice(data),
            }),
            PayloadId::StringEmpty => complete(MessageKind::Text, stream_id, Bytes::new()),
            PayloadId::BinaryEmpty => complete(MessageKind::Binary, stream_id, Bytes::new()),
            PayloadId::StringPartial | PayloadId::BinaryPartial => {
                let max = self.max_message_size;
                let slot = self.slot_mut(id.class());
                let size = slot.pending_len() + data.len();
                if size > max {
                    slot.take();
                    return Reassembly::Discarded(DiscardReason::Oversized { size, max });
                }
                slot.append(data);
                Reassembly::Pending
            }
            PayloadId::String | PayloadId::Binary => {
                let kind = match id.class() {
                    PayloadClass::String => MessageKind::Text,
                    _ => MessageKind::Binary,
                };
                let max = self.max_message_size;
                match self.slot_mut(id.class()).take() {
                    None if data.is_empty() => {
                        Reassembly::Discarded(DiscardReason::EmptyTerminal)
                    }
                    None => complete(kind, stream_id, Bytes::copy_from_slice(data)),
                    Some(mut buf) => {
                        let size = buf.len() + data.len();
                        if size > max {
                            return Reassembly::Discarded(DiscardReason::Oversized { size, max });
                        }
                        buf.extend_from_slice(data);
                        complete(kind, stream_id, buf.freeze())
                    }
                }
            }
        }
    }

    fn buffer_record(&mut self, data: &[u8]) {
        if let Some(size) = self.record_overflow.as_mut() {
            *size += data.len();
            return;
        }
        let size = self.record.len() + data.len();
        if size > self.max_message_size {
            self.record.clear();
            self.record_overflow = Some(size);
            return;
        }
        self.record.extend_from_slice(data);
    }

    fn slot_mut(&mut self, class: PayloadClass) -> &mut PartialSlot {
        match class {
            PayloadClass::String => &mut self.string,
            _ => &mut self.binary,
        }
    }
}

fn complete(kind: MessageKind, stream_id: u16, payload: Bytes) -> Reassembly {
    Reassembly::Complete(Inbound::Message(Message::new(kind, stream_id, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RecvFlags;

    fn reassembler() -> Reassembler {
        Reassembler::new(1024)
    }

    fn expect_message(outcome: Reassembly) -> Message {
        match outcome {
            Reassembly::Complete(Inbound::Message(msg)) => msg,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn single_complete_string() {
        let mut r = reassembler();
        let msg = expect_message(r.process(b"hi", 1, PayloadId::String.value()));
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.stream_id, 1);
        assert_eq!(msg.as_text(), Some("hi"));
    }

    #[test]
    fn binary_partial_then_complete() {
        let mut r = reassembler();
        assert_eq!(
            r.process(&[0x01, 0x02], 2, PayloadId::BinaryPartial.value()),
            Reassembly::Pending
        );
        assert!(r.is_accumulating(PayloadClass::Binary));
        let msg = expect_message(r.process(&[0x03], 2, PayloadId::Binary.value()));
        assert_eq!(msg.kind, MessageKind::Binary);
        assert_eq!(msg.stream_id, 2);
        assert_eq!(&msg.payload[..], &[0x01, 0x02, 0x03]);
        assert!(!r.is_accumulating(PayloadClass::Binary));
    }

    #[test]
    fn string_empty_leaves_accumulator_alone() {
        let mut r = reassembler();
        r.process(b"abc", 3, PayloadId::StringPartial.value());
        let msg = expect_message(r.process(&[0], 3, PayloadId::StringEmpty.value()));
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.stream_id, 3);
        assert!(msg.is_empty());
        assert_eq!(r.pending_len(PayloadClass::String), 3);

        let msg = expect_message(r.process(b"def", 3, PayloadId::String.value()));
        assert_eq!(msg.as_text(), Some("abcdef"));
    }

    #[test]
    fn binary_empty_from_idle() {
        let mut r = reassembler();
        let msg = expect_message(r.process(&[0], 4, PayloadId::BinaryEmpty.value()));
        assert_eq!(msg.kind, MessageKind::Binary);
        assert!(msg.is_empty());
        assert!(!r.is_accumulating(PayloadClass::Binary));
    }

    #[test]
    fn classes_are_independent() {
        let mut r = reassembler();
        r.process(b"str-", 1, PayloadId::StringPartial.value());
        r.process(b"bin-", 1, PayloadId::BinaryPartial.value());
        let bin = expect_message(r.process(b"end", 1, PayloadId::Binary.value()));
        assert_eq!(&bin.payload[..], b"bin-end");
        assert!(r.is_accumulating(PayloadClass::String));
        let s = expect_message(r.process(b"end", 1, PayloadId::String.value()));
        assert_eq!(s.as_text(), Some("str-end"));
    }

    #[test]
    fn control_passes_through() {
        let mut r = reassembler();
        r.process(b"x", 0, PayloadId::StringPartial.value());
        let outcome = r.process(&[0x03, 0x00], 0, PayloadId::Control.value());
        assert_eq!(
            outcome,
            Reassembly::Complete(Inbound::Control {
                stream_id: 0,
                payload: Bytes::from_static(&[0x03, 0x00]),
            })
        );
        assert_eq!(r.pending_len(PayloadClass::String), 1);
    }

    #[test]
    fn unknown_ppid_is_discarded() {
        let mut r = reassembler();
        assert_eq!(
            r.process(b"?", 1, 55),
            Reassembly::Discarded(DiscardReason::UnknownPayloadId(55))
        );
    }

    #[test]
    fn empty_terminal_without_partial_is_discarded() {
        let mut r = reassembler();
        assert_eq!(
            r.process(&[], 1, PayloadId::Binary.value()),
            Reassembly::Discarded(DiscardReason::EmptyTerminal)
        );
    }

    #[test]
    fn empty_terminal_flushes_pending_partial() {
        let mut r = reassembler();
        r.process(b"tail", 1, PayloadId::BinaryPartial.value());
        let msg = expect_message(r.process(&[], 1, PayloadId::Binary.value()));
        assert_eq!(&msg.payload[..], b"tail");
    }

    #[test]
    fn record_pieces_are_joined_before_framing() {
        let mut r = reassembler();
        let piece = |eor| RecvInfo {
            stream_id: 6,
            ppid: PayloadId::String.value(),
            flags: RecvFlags { end_of_record: eor },
        };
        assert_eq!(r.push(b"hel", piece(false)), Reassembly::Pending);
        assert_eq!(r.push(b"lo ", piece(false)), Reassembly::Pending);
        let msg = expect_message(r.push(b"world", piece(true)));
        assert_eq!(msg.as_text(), Some("hello world"));
        assert_eq!(msg.stream_id, 6);
    }

    #[test]
    fn oversized_partial_is_dropped() {
        let mut r = Reassembler::new(4);
        r.process(b"abc", 1, PayloadId::BinaryPartial.value());
        assert_eq!(
            r.process(b"de", 1, PayloadId::BinaryPartial.value()),
            Reassembly::Discarded(DiscardReason::Oversized { size: 5, max: 4 })
        );
        assert!(!r.is_accumulating(PayloadClass::Binary));
    }

    #[test]
    fn oversized_record_is_reported_once_at_end_of_record() {
        let mut r = Reassembler::new(4);
        let piece = |eor| RecvInfo {
            stream_id: 1,
            ppid: PayloadId::Binary.value(),
            flags: RecvFlags { end_of_record: eor },
        };
        assert_eq!(r.push(b"abc", piece(false)), Reassembly::Pending);
        assert_eq!(r.push(b"def", piece(false)), Reassembly::Pending);
        assert_eq!(
            r.push(b"g", piece(true)),
            Reassembly::Discarded(DiscardReason::Oversized { size: 7, max: 4 })
        );
        let msg = expect_message(r.push(b"ok", piece(true)));
        assert_eq!(&msg.payload[..], b"ok");
    }
}
