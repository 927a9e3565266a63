//! IAX frame codec
//!
//! Everything needed to turn datagrams into headers and payload
//! parameters and back. Nothing in here knows about sessions.

pub mod header;
pub mod params;
pub mod subclass;
pub mod types;

use bytes::Bytes;

pub use header::{
    parse_header, FullHeader, MiniHeader, ParsedHeader, FULL_FRAME_FLAG, FULL_HEADER_LEN,
    MINI_HEADER_LEN,
};
pub use params::IaxParams;
pub use subclass::{compress_subclass, uncompress_subclass};
pub use types::{format, FrameType, IaxCommand, CONTROL_ANSWER};

/// A frame as handed to or received from a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    pub frame_type: FrameType,
    pub subclass: u32,
    /// Milliseconds since the sender's call epoch
    pub timestamp: u32,
    pub payload: Bytes,
}

impl MediaFrame {
    pub fn new(frame_type: FrameType, subclass: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            subclass,
            timestamp: 0,
            payload: payload.into(),
        }
    }

    pub fn voice(format: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Voice, format, payload)
    }

    pub fn iax(command: IaxCommand, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Iax, command.subclass(), payload)
    }

    pub fn is_voice(&self) -> bool {
        self.frame_type == FrameType::Voice
    }

    pub fn command(&self) -> Option<IaxCommand> {
        match self.frame_type {
            FrameType::Iax => IaxCommand::from_subclass(self.subclass),
            _ => None,
        }
    }

    pub fn is_command(&self, command: IaxCommand) -> bool {
        self.command() == Some(command)
    }
}

/// One-line description of a frame for debug tracing
pub fn describe(header: &ParsedHeader) -> String {
    if !header.is_full {
        return format!(
            "mini frame callno={} ts={}",
            header.src_call, header.timestamp
        );
    }
    let kind = FrameType::from_u8(header.frame_type)
        .map(|t| t.name().to_string())
        .unwrap_or_else(|| format!("type {}", header.frame_type));
    let sub = match FrameType::from_u8(header.frame_type) {
        Some(FrameType::Iax) => IaxCommand::from_subclass(header.subclass)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| header.subclass.to_string()),
        Some(FrameType::Voice) => format::name(header.subclass).to_string(),
        _ => header.subclass.to_string(),
    };
    format!(
        "{} {} seqno={} ts={} src={} dst={}",
        kind, sub, header.seqno, header.timestamp, header.src_call, header.dst_call
    )
}
