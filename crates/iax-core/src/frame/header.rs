//! Full and mini frame headers
//!
//! ```text
//! Full frame (12 bytes):
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-----------------------------+-------------------------------+
//! |F|     source call number      |   destination call number     |
//! +-+-----------------------------+-------------------------------+
//! |                           timestamp                           |
//! +-------------------------------+---------------+---------------+
//! |        sequence number        |  frame type   |   subclass    |
//! +-------------------------------+---------------+---------------+
//!
//! Mini frame (4 bytes, voice only):
//! +-+-----------------------------+-------------------------------+
//! |0|     source call number      |     timestamp (low 16 bits)   |
//! +-+-----------------------------+-------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::subclass::{compress_subclass, uncompress_subclass};
use crate::error::{Error, Result};

pub const FULL_HEADER_LEN: usize = 12;
pub const MINI_HEADER_LEN: usize = 4;

/// High bit of the first word marks a full frame
pub const FULL_FRAME_FLAG: u16 = 0x8000;

const CALLNO_MASK: u16 = 0x7FFF;

/// Header of a reliable, sequenced frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullHeader {
    pub src_call: u16,
    pub dst_call: u16,
    pub timestamp: u32,
    pub seqno: u16,
    pub frame_type: u8,
    /// Uncompressed subclass
    pub subclass: u32,
}

impl FullHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FULL_HEADER_LEN);
        buf.put_u16((self.src_call & CALLNO_MASK) | FULL_FRAME_FLAG);
        buf.put_u16(self.dst_call);
        buf.put_u32(self.timestamp);
        buf.put_u16(self.seqno);
        buf.put_u8(self.frame_type);
        buf.put_u8(compress_subclass(self.subclass));
    }

    /// Header followed by payload as one datagram
    pub fn to_datagram(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(FULL_HEADER_LEN + payload.len());
        self.encode(&mut buf);
        buf.put_slice(payload);
        buf.freeze()
    }
}

/// Header of an unsequenced voice frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniHeader {
    pub src_call: u16,
    /// Low 16 bits of the frame timestamp
    pub timestamp: u16,
}

impl MiniHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(MINI_HEADER_LEN);
        buf.put_u16(self.src_call & CALLNO_MASK);
        buf.put_u16(self.timestamp);
    }

    pub fn to_datagram(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(MINI_HEADER_LEN + payload.len());
        self.encode(&mut buf);
        buf.put_slice(payload);
        buf.freeze()
    }
}

/// Decoded header of either kind.
///
/// For mini frames `dst_call`, `frame_type`, `subclass` and `seqno` are 0
/// and `timestamp` holds only the low 16 bits; the receiver fills in the
/// rest from session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedHeader {
    pub is_full: bool,
    pub src_call: u16,
    pub dst_call: u16,
    pub frame_type: u8,
    pub subclass: u32,
    pub seqno: u16,
    pub timestamp: u32,
    pub payload_offset: usize,
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Parse the header at the front of a datagram
pub fn parse_header(buf: &[u8]) -> Result<ParsedHeader> {
    if buf.len() < MINI_HEADER_LEN {
        return Err(Error::MalformedFrame {
            needed: MINI_HEADER_LEN,
            actual: buf.len(),
        });
    }

    let first = read_u16(buf, 0);
    if first & FULL_FRAME_FLAG == 0 {
        return Ok(ParsedHeader {
            is_full: false,
            src_call: first,
            dst_call: 0,
            frame_type: 0,
            subclass: 0,
            seqno: 0,
            timestamp: read_u16(buf, 2) as u32,
            payload_offset: MINI_HEADER_LEN,
        });
    }

    if buf.len() < FULL_HEADER_LEN {
        return Err(Error::MalformedFrame {
            needed: FULL_HEADER_LEN,
            actual: buf.len(),
        });
    }

    Ok(ParsedHeader {
        is_full: true,
        src_call: first & CALLNO_MASK,
        dst_call: read_u16(buf, 2),
        timestamp: read_u32(buf, 4),
        seqno: read_u16(buf, 8),
        frame_type: buf[10],
        subclass: uncompress_subclass(buf[11]),
        payload_offset: FULL_HEADER_LEN,
    })
}
