//! Messages exchanged with the consumer.

use bytes::Bytes;
use std::time::Duration;

/// Payload class of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// UTF-8 payload (string data channel message).
    Text,
    Binary,
    /// Session-layer control payload, passed through untouched.
    Control,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Binary => "binary",
            MessageKind::Control => "control",
        }
    }
}

/// Retransmission policy forwarded to the engine for each send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReliabilityPolicy {
    #[default]
    Reliable,
    /// Give up after this many retransmissions.
    MaxRetransmits(u16),
    /// Give up once the message has been buffered this long.
    MaxLifetime(Duration),
}

/// Delivery guarantees requested for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reliability {
    pub ordered: bool,
    pub policy: ReliabilityPolicy,
}

impl Default for Reliability {
    fn default() -> Self {
        Self {
            ordered: true,
            policy: ReliabilityPolicy::Reliable,
        }
    }
}

/// A complete message on one stream.
///
/// Ownership moves with the value: from the consumer into the outbound
/// queue, or from the reassembler into the consumer's callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub stream_id: u16,
    pub payload: Bytes,
    pub reliability: Reliability,
}

impl Message {
    pub fn new(kind: MessageKind, stream_id: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            stream_id,
            payload: payload.into(),
            reliability: Reliability::default(),
        }
    }

    pub fn text(stream_id: u16, text: impl Into<String>) -> Self {
        Self::new(MessageKind::Text, stream_id, Bytes::from(text.into()))
    }

    pub fn binary(stream_id: u16, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Binary, stream_id, payload)
    }

    pub fn control(stream_id: u16, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Control, stream_id, payload)
    }

    pub fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// The payload as text, if this is a text message holding valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            MessageKind::Text => std::str::from_utf8(&self.payload).ok(),
            _ => None,
        }
    }
}
