//! Property-based tests for outbound fragmentation and inbound reassembly.
//!
//! Messages are carved into chunks exactly as the send path does, then fed
//! back through the reassembler under varied fragment sizes, record splits
//! and interleaved empty-message deliveries.

use bytes::Bytes;
use proptest::prelude::*;
use sctp_transport::inbound::{Inbound, Reassembler, Reassembly};
use sctp_transport::message::{Message, MessageKind};
use sctp_transport::wire::{chunk_count, next_chunk, Chunk, PayloadId, RecvFlags, RecvInfo};

fn chunks_of(kind: MessageKind, total: usize, max_fragment: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    loop {
        let chunk = next_chunk(kind, total, offset, max_fragment);
        offset = chunk.end;
        let last = chunk.is_last(total);
        chunks.push(chunk);
        if last {
            return chunks;
        }
    }
}

fn kind_strategy() -> impl Strategy<Value = MessageKind> {
    prop_oneof![Just(MessageKind::Text), Just(MessageKind::Binary)]
}

// ─── Fragment / Reassemble ───────────────────────────────────────────────────

proptest! {
    /// Every chunk but the last is pending; the last yields the sent
    /// payload, whatever the fragment size.
    #[test]
    fn fragments_reassemble_to_sent_payload(
        kind in kind_strategy(),
        payload in proptest::collection::vec(any::<u8>(), 1..2048),
        max_fragment in 1usize..300,
    ) {
        let chunks = chunks_of(kind, payload.len(), max_fragment);
        prop_assert_eq!(chunks.len(), chunk_count(kind, payload.len(), max_fragment));

        let mut r = Reassembler::new(4096);
        let mut delivered = None;
        for (i, chunk) in chunks.iter().enumerate() {
            let outcome = r.process(&payload[chunk.start..chunk.end], 9, chunk.ppid.value());
            if i + 1 < chunks.len() {
                prop_assert_eq!(outcome, Reassembly::Pending);
            } else {
                delivered = Some(outcome);
            }
        }
        let expected = Message::new(kind, 9, Bytes::from(payload));
        prop_assert_eq!(
            delivered,
            Some(Reassembly::Complete(Inbound::Message(expected)))
        );
    }

    /// Engine records split into arbitrary pieces reassemble the same way.
    #[test]
    fn split_records_are_rejoined(
        payload in proptest::collection::vec(any::<u8>(), 1..512),
        max_fragment in 1usize..128,
        cut in 1usize..64,
    ) {
        let mut r = Reassembler::new(4096);
        let mut delivered = None;
        for chunk in chunks_of(MessageKind::Binary, payload.len(), max_fragment) {
            let piece = &payload[chunk.start..chunk.end];
            let pieces: Vec<&[u8]> = piece.chunks(cut).collect();
            for (i, part) in pieces.iter().enumerate() {
                let info = RecvInfo {
                    stream_id: 2,
                    ppid: chunk.ppid.value(),
                    flags: RecvFlags { end_of_record: i + 1 == pieces.len() },
                };
                let outcome = r.push(part, info);
                if outcome != Reassembly::Pending {
                    delivered = Some(outcome);
                }
            }
        }
        let expected = Message::binary(2, payload);
        prop_assert_eq!(
            delivered,
            Some(Reassembly::Complete(Inbound::Message(expected)))
        );
    }

    /// Empty-message deliveries interleaved with partial chunks are delivered
    /// on their own and leave the accumulators untouched.
    #[test]
    fn empty_tags_do_not_disturb_accumulation(
        payload in proptest::collection::vec(any::<u8>(), 2..512),
        max_fragment in 1usize..64,
        empties in proptest::collection::vec(any::<bool>(), 1..16),
    ) {
        let mut r = Reassembler::new(4096);
        let chunks = chunks_of(MessageKind::Binary, payload.len(), max_fragment);
        let mut empties = empties.into_iter().cycle();
        let mut delivered = Vec::new();
        for chunk in &chunks {
            let string_empty = empties.next().unwrap_or(false);
            let empty_id = if string_empty { PayloadId::StringEmpty } else { PayloadId::BinaryEmpty };
            let before = r.pending_len(sctp_transport::wire::PayloadClass::Binary);
            match r.process(&[0], 1, empty_id.value()) {
                Reassembly::Complete(Inbound::Message(m)) => prop_assert!(m.is_empty()),
                other => prop_assert!(false, "empty delivery gave {:?}", other),
            }
            prop_assert_eq!(r.pending_len(sctp_transport::wire::PayloadClass::Binary), before);

            if let Reassembly::Complete(Inbound::Message(m)) =
                r.process(&payload[chunk.start..chunk.end], 1, chunk.ppid.value())
            {
                delivered.push(m);
            }
        }
        prop_assert_eq!(delivered, vec![Message::binary(1, payload)]);
    }

    /// Oversized accumulations are dropped and the slot is usable afterwards.
    #[test]
    fn oversized_partials_are_discarded(
        max in 8usize..64,
        extra in 1usize..32,
    ) {
        let mut r = Reassembler::new(max);
        let big = vec![7u8; max + extra];
        let outcome = r.process(&big, 1, PayloadId::BinaryPartial.value());
        prop_assert!(matches!(outcome, Reassembly::Discarded(_)));
        prop_assert!(!r.is_accumulating(sctp_transport::wire::PayloadClass::Binary));
        let outcome = r.process(b"ok", 1, PayloadId::Binary.value());
        prop_assert_eq!(
            outcome,
            Reassembly::Complete(Inbound::Message(Message::binary(1, &b"ok"[..])))
        );
    }
}
