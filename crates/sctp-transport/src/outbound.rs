//! # Outbound Path
//!
//! FIFO queue of messages the engine could not take yet, plus per-stream
//! buffered-amount accounting.
//!
//! A message goes to the engine chunk by chunk (see [`crate::wire`]). When
//! the engine refuses a chunk, the message keeps its progress at the head of
//! the queue and nothing behind it is attempted, so per-stream order holds
//! and no other message is interleaved into a half-sent one.
//!
//! Buffered amount counts bytes accepted into the queue but not yet
//! accepted by the engine. Every nonzero change is reported as a
//! `(stream_id, delta)` pair for the caller to forward once its lock is
//! released.

use std::collections::{HashMap, VecDeque};

use crate::error::EngineError;
use crate::message::Message;
use crate::wire::{next_chunk, Chunk};

/// Result of offering one chunk (or a whole message) to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandOff {
    Accepted,
    /// Engine buffer full; retry on the next send-ready signal.
    Blocked,
    /// Hard failure; the message cannot be delivered.
    Failed(EngineError),
}

/// A message plus how much of it the engine has already accepted.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    message: Message,
    offset: usize,
    complete: bool,
}

impl OutgoingMessage {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            offset: 0,
            complete: false,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn stream_id(&self) -> u16 {
        self.message.stream_id
    }

    /// Bytes not yet accepted by the engine.
    pub fn remaining(&self) -> usize {
        self.message.len() - self.offset
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Some chunk of the message was accepted, but not the last one.
    pub fn is_started(&self) -> bool {
        self.offset > 0 && !self.complete
    }

    /// Offer chunks until the message is done or the engine pushes back.
    ///
    /// `on_accepted` is told the payload length of each accepted chunk.
    pub fn pump<F, A>(
        &mut self,
        max_fragment: usize,
        mut hand_off: F,
        mut on_accepted: A,
    ) -> HandOff
    where
        F: FnMut(&Message, Chunk) -> HandOff,
        A: FnMut(usize),
    {
        while !self.complete {
            let chunk = next_chunk(
                self.message.kind,
                self.message.len(),
                self.offset,
                max_fragment,
            );
            match hand_off(&self.message, chunk) {
                HandOff::Accepted => {
                    self.offset = chunk.end;
                    self.complete = chunk.is_last(self.message.len());
                    on_accepted(chunk.len());
                }
                other => return other,
            }
        }
        HandOff::Accepted
    }
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Messages fully handed to the engine.
    pub completed: Vec<Message>,
    /// Messages dropped after a hard engine failure.
    pub failed: Vec<(u16, EngineError)>,
    /// Whether the pass stopped on backpressure with work left.
    pub blocked: bool,
    /// A message failed after some of its chunks were accepted. The pass
    /// stops there.
    pub torn: bool,
}

#[derive(Debug, Default)]
pub struct OutboundQueue {
    queue: VecDeque<OutgoingMessage>,
    buffered: HashMap<u16, usize>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn buffered_amount(&self, stream_id: u16) -> usize {
        self.buffered.get(&stream_id).copied().unwrap_or(0)
    }

    /// Append a (possibly partly sent) message, recording its buffered delta.
    pub fn push(&mut self, message: OutgoingMessage, deltas: &mut Vec<(u16, isize)>) {
        let stream_id = message.stream_id();
        let remaining = message.remaining();
        self.queue.push_back(message);
        self.adjust(stream_id, remaining as isize, deltas);
    }

    /// Hand queued messages to the engine in FIFO order, stopping at the
    /// first one the engine cannot fully take.
    pub fn drain<F>(
        &mut self,
        max_fragment: usize,
        mut hand_off: F,
        deltas: &mut Vec<(u16, isize)>,
    ) -> DrainReport
    where
        F: FnMut(&Message, Chunk) -> HandOff,
    {
        let mut report = DrainReport::default();
        while let Some(head) = self.queue.front_mut() {
            let stream_id = head.stream_id();
            let mut accepted = 0usize;
            let outcome = head.pump(max_fragment, &mut hand_off, |n| accepted += n);
            let remaining = head.remaining();
            match outcome {
                HandOff::Accepted => {
                    if let Some(done) = self.queue.pop_front() {
                        report.completed.push(done.message);
                    }
                    self.adjust(stream_id, -(accepted as isize), deltas);
                }
                HandOff::Blocked => {
                    self.adjust(stream_id, -(accepted as isize), deltas);
                    report.blocked = true;
                    break;
                }
                HandOff::Failed(err) => {
                    let torn = head.is_started();
                    self.queue.pop_front();
                    self.adjust(stream_id, -((accepted + remaining) as isize), deltas);
                    report.failed.push((stream_id, err));
                    if torn {
                        report.torn = true;
                        break;
                    }
                }
            }
        }
        report
    }

    /// Drop everything still queued, reporting the abandoned bytes.
    pub fn clear(&mut self, deltas: &mut Vec<(u16, isize)>) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        let mut streams: Vec<_> = self.buffered.drain().collect();
        streams.sort_unstable_by_key(|(stream_id, _)| *stream_id);
        for (stream_id, amount) in streams {
            if amount > 0 {
                deltas.push((stream_id, -(amount as isize)));
            }
        }
        dropped
    }

    fn adjust(&mut self, stream_id: u16, delta: isize, deltas: &mut Vec<(u16, isize)>) {
        if delta == 0 {
            return;
        }
        let entry = self.buffered.entry(stream_id).or_insert(0);
        *entry = entry.saturating_add_signed(delta);
        if *entry == 0 {
            self.buffered.remove(&stream_id);
        }
        deltas.push((stream_id, delta));
    }
}
