//! Property-based tests for the outbound queue.
//!
//! The engine is modelled as a closure that accepts or refuses each chunk
//! according to a generated pattern; drains repeat until the queue empties.

use proptest::prelude::*;
use sctp_transport::message::Message;
use sctp_transport::outbound::{HandOff, OutboundQueue, OutgoingMessage};
use std::collections::HashMap;

proptest! {
    /// Whatever the backpressure pattern, chunks reach the engine in FIFO
    /// order, each message intact, and buffered amounts return to zero.
    #[test]
    fn fifo_and_buffered_accounting_hold_under_backpressure(
        messages in proptest::collection::vec(
            (0u16..4, proptest::collection::vec(any::<u8>(), 0..200)),
            1..20,
        ),
        max_fragment in 1usize..64,
        pattern in proptest::collection::vec(any::<bool>(), 1..32),
    ) {
        let mut queue = OutboundQueue::new();
        let mut deltas = Vec::new();
        for (stream_id, payload) in &messages {
            queue.push(
                OutgoingMessage::new(Message::binary(*stream_id, payload.clone())),
                &mut deltas,
            );
        }

        let mut pattern = pattern.into_iter().cycle();
        let mut received: Vec<(u16, Vec<u8>)> = Vec::new();
        let mut current: Vec<u8> = Vec::new();
        let mut passes = 0;
        while !queue.is_empty() {
            passes += 1;
            prop_assert!(passes < 100_000, "queue never drained");
            // Refuse only after an acceptance so every pass makes progress.
            let mut accepted = false;
            queue.drain(
                max_fragment,
                |msg, chunk| {
                    if accepted && !pattern.next().unwrap_or(true) {
                        return HandOff::Blocked;
                    }
                    accepted = true;
                    current.extend_from_slice(&msg.payload[chunk.start..chunk.end]);
                    if chunk.is_last(msg.len()) {
                        received.push((msg.stream_id, std::mem::take(&mut current)));
                    }
                    HandOff::Accepted
                },
                &mut deltas,
            );
        }

        prop_assert_eq!(received, messages);

        let mut totals: HashMap<u16, isize> = HashMap::new();
        for (stream_id, delta) in deltas {
            *totals.entry(stream_id).or_default() += delta;
        }
        prop_assert!(totals.values().all(|t| *t == 0));
        for stream_id in 0u16..4 {
            prop_assert_eq!(queue.buffered_amount(stream_id), 0);
        }
    }
}
