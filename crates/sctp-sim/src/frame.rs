//! Packet format spoken between two loopback associations.
//!
//! ```text
//!  0               1               2               3
//! +---------------+---------------+---------------+---------------+
//! |     type      |  type-specific body ...                       |
//! +---------------+-----------------------------------------------+
//!
//! DATA:  [type][stream u16][ppid u32][payload ...]
//! RESET: [type][direction u8][count u16][stream u16 ...]
//! others carry no body
//! ```
//!
//! All integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sctp_transport::engine::ResetDirection;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Init = 1,
    InitAck = 2,
    Data = 3,
    Reset = 4,
    Shutdown = 5,
    ShutdownAck = 6,
    Abort = 7,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Init),
            2 => Some(Self::InitAck),
            3 => Some(Self::Data),
            4 => Some(Self::Reset),
            5 => Some(Self::Shutdown),
            6 => Some(Self::ShutdownAck),
            7 => Some(Self::Abort),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Init,
    InitAck,
    Data {
        stream_id: u16,
        ppid: u32,
        payload: Bytes,
    },
    Reset {
        direction: ResetDirection,
        streams: Vec<u16>,
    },
    Shutdown,
    ShutdownAck,
    Abort,
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Init => FrameType::Init,
            Frame::InitAck => FrameType::InitAck,
            Frame::Data { .. } => FrameType::Data,
            Frame::Reset { .. } => FrameType::Reset,
            Frame::Shutdown => FrameType::Shutdown,
            Frame::ShutdownAck => FrameType::ShutdownAck,
            Frame::Abort => FrameType::Abort,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.frame_type() as u8);
        match self {
            Frame::Data {
                stream_id,
                ppid,
                payload,
            } => {
                buf.put_u16(*stream_id);
                buf.put_u32(*ppid);
                buf.put_slice(payload);
            }
            Frame::Reset { direction, streams } => {
                buf.put_u8(direction_to_u8(*direction));
                buf.put_u16(streams.len() as u16);
                for stream_id in streams {
                    buf.put_u16(*stream_id);
                }
            }
            _ => {}
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if !buf.has_remaining() {
            return None;
        }
        let frame = match FrameType::from_u8(buf.get_u8())? {
            FrameType::Init => Frame::Init,
            FrameType::InitAck => Frame::InitAck,
            FrameType::Shutdown => Frame::Shutdown,
            FrameType::ShutdownAck => Frame::ShutdownAck,
            FrameType::Abort => Frame::Abort,
            FrameType::Data => {
                if buf.remaining() < 6 {
                    return None;
                }
                let stream_id = buf.get_u16();
                let ppid = buf.get_u32();
                let payload = buf.copy_to_bytes(buf.remaining());
                Frame::Data {
                    stream_id,
                    ppid,
                    payload,
                }
            }
            FrameType::Reset => {
                if buf.remaining() < 3 {
                    return None;
                }
                let direction = direction_from_u8(buf.get_u8())?;
                let count = buf.get_u16() as usize;
                if buf.remaining() < count * 2 {
                    return None;
                }
                let streams = (0..count).map(|_| buf.get_u16()).collect();
                Frame::Reset { direction, streams }
            }
        };
        Some(frame)
    }
}

fn direction_to_u8(direction: ResetDirection) -> u8 {
    match direction {
        ResetDirection::Outgoing => 0,
        ResetDirection::Incoming => 1,
        ResetDirection::Both => 2,
    }
}

fn direction_from_u8(value: u8) -> Option<ResetDirection> {
    match value {
        0 => Some(ResetDirection::Outgoing),
        1 => Some(ResetDirection::Incoming),
        2 => Some(ResetDirection::Both),
        _ => None,
    }
}
