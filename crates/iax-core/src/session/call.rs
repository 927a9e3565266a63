//! Per-call state

use std::fmt;
use std::net::SocketAddr;

use tokio::time::Instant;

use crate::auth::AuthMethods;
use crate::channel::{ChannelEvent, ChannelLink};
use crate::error::CallError;
use crate::jitter::JitterBuffer;
use crate::sched::TimerId;

/// Initial round-trip estimate used for retransmit timing, in ms
pub const DEFAULT_RETRY_TIME: u32 = 1000;

/// Stable reference to one incarnation of a call.
///
/// Call numbers are reused; the serial distinguishes a timer or channel
/// that outlived its call from the call now holding the same number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallRef {
    pub callno: u16,
    pub serial: u64,
}

impl fmt::Display for CallRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.callno, self.serial)
    }
}

/// Authentication / lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Unauthenticated,
    /// Outbound: we answered the far end's challenge
    ChallengeSent,
    /// Inbound: we sent AUTHREQ and wait for AUTHREP
    AwaitingCredentials,
    /// Inbound: AUTHREP verified
    Authenticated,
    /// Media may flow
    Started,
}

impl CallState {
    pub fn name(self) -> &'static str {
        match self {
            CallState::Unauthenticated => "unauthenticated",
            CallState::ChallengeSent => "challenge-sent",
            CallState::AwaitingCredentials => "awaiting-credentials",
            CallState::Authenticated => "authenticated",
            CallState::Started => "started",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

pub struct CallSession {
    pub callno: u16,
    pub serial: u64,
    /// Unset until the far end's first frame reveals it
    pub peer_callno: Option<u16>,
    pub addr: SocketAddr,
    pub direction: Direction,
    pub state: CallState,

    /// Next sequence number we send
    pub oseqno: u16,
    /// Next sequence number we expect
    pub iseqno: u16,

    /// Epoch for outgoing timestamps, set on first send
    pub tx_epoch: Option<Instant>,
    /// Epoch for the receive clock, set on first measured frame
    pub rx_epoch: Option<Instant>,
    /// Last timestamp we sent
    pub lastsent: u32,
    /// Newest timestamp received
    pub last: u32,

    /// Round trip estimate in ms, from PING/PONG
    pub pingtime: u32,
    /// One-way lag in ms, from LAGRQ/LAGRP
    pub lag: u32,

    /// Format of the last voice frame received
    pub voiceformat: u32,
    /// Format of the last voice frame sent in a full frame
    pub svoiceformat: u32,
    /// Codecs we offer on this call
    pub capability: u32,
    /// Format the far end asked for or accepted
    pub peerformat: u32,
    pub peercapability: u32,

    pub jitter: JitterBuffer,

    /// Configured peer we dialed, if any
    pub peer: Option<String>,
    pub username: String,
    pub secret: String,
    pub challenge: String,
    pub methods: AuthMethods,
    pub exten: String,
    pub context: String,
    pub callerid: String,
    pub ani: String,
    pub dnid: String,
    pub language: String,

    pub error: Option<CallError>,
    /// The far end is gone (or going); nothing more is sent or delivered
    pub alreadygone: bool,

    pub owner: Option<ChannelLink>,

    pub ping_timer: Option<TimerId>,
    pub lag_timer: Option<TimerId>,
}

impl CallSession {
    pub fn new(callno: u16, serial: u64, addr: SocketAddr, peer_callno: Option<u16>, direction: Direction) -> Self {
        Self {
            callno,
            serial,
            peer_callno,
            addr,
            direction,
            state: CallState::Unauthenticated,
            oseqno: 0,
            iseqno: 0,
            tx_epoch: None,
            rx_epoch: None,
            lastsent: 0,
            last: 0,
            pingtime: DEFAULT_RETRY_TIME,
            lag: 0,
            voiceformat: 0,
            svoiceformat: 0,
            capability: 0,
            peerformat: 0,
            peercapability: 0,
            jitter: JitterBuffer::new(),
            peer: None,
            username: String::new(),
            secret: String::new(),
            challenge: String::new(),
            methods: AuthMethods::default(),
            exten: "s".to_string(),
            context: String::new(),
            callerid: String::new(),
            ani: String::new(),
            dnid: String::new(),
            language: String::new(),
            error: None,
            alreadygone: false,
            owner: None,
            ping_timer: None,
            lag_timer: None,
        }
    }

    pub fn call_ref(&self) -> CallRef {
        CallRef {
            callno: self.callno,
            serial: self.serial,
        }
    }

    pub fn is_started(&self) -> bool {
        self.state == CallState::Started
    }

    /// Timestamp for an outgoing frame.
    ///
    /// A non-zero `ts` is used as given. Otherwise the time since the
    /// first send, bumped so that no timestamp is ever sent twice.
    pub fn calc_timestamp(&mut self, now: Instant, ts: u32) -> u32 {
        let epoch = *self.tx_epoch.get_or_insert(now);
        if ts != 0 {
            return ts;
        }
        let mut ms = now.saturating_duration_since(epoch).as_millis() as u32;
        if ms <= self.lastsent {
            ms = self.lastsent.wrapping_add(1);
        }
        self.lastsent = ms;
        ms
    }

    /// Milliseconds on the receive clock
    pub fn calc_rxstamp(&mut self, now: Instant) -> u32 {
        let epoch = *self.rx_epoch.get_or_insert(now);
        now.saturating_duration_since(epoch).as_millis() as u32
    }

    /// Wake the owning channel, if any
    pub fn notify_owner(&self, event: ChannelEvent) -> bool {
        match &self.owner {
            Some(link) => link.send(event),
            None => false,
        }
    }

    /// Owning channel's display name
    pub fn channel_name(&self, host: &str) -> String {
        if self.username.is_empty() {
            format!("IAX[{}]/{}", host, self.callno)
        } else {
            format!("IAX[{}@{}]/{}", self.username, host, self.callno)
        }
    }
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("callno", &self.callno)
            .field("serial", &self.serial)
            .field("peer_callno", &self.peer_callno)
            .field("addr", &self.addr)
            .field("state", &self.state)
            .field("oseqno", &self.oseqno)
            .field("iseqno", &self.iseqno)
            .field("error", &self.error)
            .field("alreadygone", &self.alreadygone)
            .field("owned", &self.owner.is_some())
            .finish()
    }
}
