//! Frame types, IAX commands and voice format bits

use std::fmt;

/// Top-level frame type carried in the full header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Dtmf = 1,
    Voice = 2,
    Video = 3,
    Control = 4,
    Null = 5,
    Iax = 6,
    Text = 7,
    Image = 8,
    Html = 9,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => FrameType::Dtmf,
            2 => FrameType::Voice,
            3 => FrameType::Video,
            4 => FrameType::Control,
            5 => FrameType::Null,
            6 => FrameType::Iax,
            7 => FrameType::Text,
            8 => FrameType::Image,
            9 => FrameType::Html,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameType::Dtmf => "DTMF",
            FrameType::Voice => "VOICE",
            FrameType::Video => "VIDEO",
            FrameType::Control => "CONTROL",
            FrameType::Null => "NULL",
            FrameType::Iax => "IAX",
            FrameType::Text => "TEXT",
            FrameType::Image => "IMAGE",
            FrameType::Html => "HTML",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Subclass values of [`FrameType::Iax`] frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum IaxCommand {
    New = 1,
    Ping = 2,
    Pong = 3,
    Ack = 4,
    Hangup = 5,
    Reject = 6,
    Accept = 7,
    AuthReq = 8,
    AuthRep = 9,
    Inval = 10,
    LagRq = 11,
    LagRp = 12,
    /// Reserved, not handled
    RegReq = 13,
    /// Reserved, not handled
    RegRep = 14,
}

impl IaxCommand {
    pub fn from_subclass(value: u32) -> Option<Self> {
        Some(match value {
            1 => IaxCommand::New,
            2 => IaxCommand::Ping,
            3 => IaxCommand::Pong,
            4 => IaxCommand::Ack,
            5 => IaxCommand::Hangup,
            6 => IaxCommand::Reject,
            7 => IaxCommand::Accept,
            8 => IaxCommand::AuthReq,
            9 => IaxCommand::AuthRep,
            10 => IaxCommand::Inval,
            11 => IaxCommand::LagRq,
            12 => IaxCommand::LagRp,
            13 => IaxCommand::RegReq,
            14 => IaxCommand::RegRep,
            _ => return None,
        })
    }

    pub fn subclass(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            IaxCommand::New => "NEW",
            IaxCommand::Ping => "PING",
            IaxCommand::Pong => "PONG",
            IaxCommand::Ack => "ACK",
            IaxCommand::Hangup => "HANGUP",
            IaxCommand::Reject => "REJECT",
            IaxCommand::Accept => "ACCEPT",
            IaxCommand::AuthReq => "AUTHREQ",
            IaxCommand::AuthRep => "AUTHREP",
            IaxCommand::Inval => "INVAL",
            IaxCommand::LagRq => "LAGRQ",
            IaxCommand::LagRp => "LAGRP",
            IaxCommand::RegReq => "REGREQ",
            IaxCommand::RegRep => "REGREP",
        }
    }
}

impl fmt::Display for IaxCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Control frame subclass asking the far end to answer
pub const CONTROL_ANSWER: u32 = 4;

/// Voice format bitmask values.
///
/// A call's capability is the OR of every format it can handle; a single
/// negotiated format is always exactly one bit.
pub mod format {
    pub const G723_1: u32 = 1 << 0;
    pub const GSM: u32 = 1 << 1;
    pub const ULAW: u32 = 1 << 2;
    pub const ALAW: u32 = 1 << 3;
    pub const G726: u32 = 1 << 4;
    pub const ADPCM: u32 = 1 << 5;
    pub const SLINEAR: u32 = 1 << 6;
    pub const LPC10: u32 = 1 << 7;
    pub const G729A: u32 = 1 << 8;
    pub const SPEEX: u32 = 1 << 9;
    pub const ILBC: u32 = 1 << 10;

    /// Every audio format bit
    pub const ALL: u32 = 0xFFFF;

    pub const FULL_BANDWIDTH: u32 = 0xFFFF;
    pub const MEDIUM_BANDWIDTH: u32 = FULL_BANDWIDTH & !SLINEAR & !ULAW & !ALAW;
    pub const LOW_BANDWIDTH: u32 = MEDIUM_BANDWIDTH & !ADPCM & !G726;

    /// Most preferred first
    pub const PREFERENCE: [u32; 11] = [
        ULAW, ALAW, SLINEAR, G726, ADPCM, GSM, ILBC, SPEEX, LPC10, G729A, G723_1,
    ];

    const NAMES: [(u32, &str); 11] = [
        (G723_1, "g723"),
        (GSM, "gsm"),
        (ULAW, "ulaw"),
        (ALAW, "alaw"),
        (G726, "g726"),
        (ADPCM, "adpcm"),
        (SLINEAR, "slin"),
        (LPC10, "lpc10"),
        (G729A, "g729"),
        (SPEEX, "speex"),
        (ILBC, "ilbc"),
    ];

    /// Pick the best single format out of a capability mask
    pub fn best_codec(mask: u32) -> Option<u32> {
        PREFERENCE.iter().copied().find(|f| mask & f != 0)
    }

    /// Look a format up by its configuration name; "all" selects every format
    pub fn by_name(name: &str) -> Option<u32> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("all") {
            return Some(ALL);
        }
        NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(bit, _)| *bit)
    }

    /// Name of a single format bit
    pub fn name(format: u32) -> &'static str {
        NAMES
            .iter()
            .find(|(bit, _)| *bit == format)
            .map(|(_, n)| *n)
            .unwrap_or("unknown")
    }

    /// Names of every format set in a mask, separated by `|`
    pub fn names(mask: u32) -> String {
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(bit, _)| mask & bit != 0)
            .map(|(_, n)| *n)
            .collect();
        if names.is_empty() {
            "nothing".to_string()
        } else {
            names.join("|")
        }
    }
}
