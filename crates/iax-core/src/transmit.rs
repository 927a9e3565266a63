//! Retransmit queue
//!
//! Every outgoing frame, reliable or not, passes through this queue. The
//! network task drains unsent entries once per loop iteration; frames that
//! need acknowledgement stay queued with a retransmit timer until they are
//! ACKed or run out of retries.

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::Bytes;
use tracing::debug;

use crate::frame::{FrameType, IaxCommand};
use crate::sched::TimerId;
use crate::session::CallRef;

/// Floor on the retransmit interval, in ms
pub const MIN_RETRY_TIME: u32 = 10;

/// Ceiling on the retransmit interval, in ms
pub const MAX_RETRY_TIME: u32 = 10000;

/// `retries` value of a frame that must not be (re)transmitted again
pub const NO_RETRANSMIT: i32 = -1;

pub type FrameId = u64;

/// Initial retransmit interval for a call with the given round trip
pub fn initial_retry_time(pingtime: u32) -> u32 {
    pingtime
        .saturating_mul(2)
        .clamp(MIN_RETRY_TIME, MAX_RETRY_TIME)
}

/// Next retransmit interval after one more attempt
pub fn backoff(retry_time: u32) -> u32 {
    retry_time.saturating_mul(10).min(MAX_RETRY_TIME)
}

#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub id: FrameId,
    pub call: CallRef,
    pub addr: SocketAddr,
    /// Present on full frames only
    pub seqno: Option<u16>,
    pub timestamp: u32,
    pub frame_type: FrameType,
    pub subclass: u32,
    /// Attempts so far, or [`NO_RETRANSMIT`]
    pub retries: i32,
    /// Current retransmit interval in ms
    pub retry_time: u32,
    pub sent_yet: bool,
    /// The call ends once this frame is ACKed or given up on
    pub is_final: bool,
    pub datagram: Bytes,
    pub timer: Option<TimerId>,
}

impl OutboundFrame {
    pub fn is_ack(&self) -> bool {
        self.frame_type == FrameType::Iax && self.subclass == IaxCommand::Ack.subclass()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.retries == NO_RETRANSMIT
    }
}

/// Result of matching an incoming ACK
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AckOutcome {
    pub matched: usize,
    /// Set when an acknowledged frame was the call's last
    pub final_call: Option<CallRef>,
}

#[derive(Debug, Default)]
pub struct RetransmitQueue {
    frames: VecDeque<OutboundFrame>,
    last_id: FrameId,
}

impl RetransmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn unsent(&self) -> usize {
        self.frames.iter().filter(|f| !f.sent_yet).count()
    }

    /// Append a frame; its `id`, `sent_yet` and `timer` are assigned here
    pub fn enqueue(&mut self, mut frame: OutboundFrame) -> FrameId {
        self.last_id += 1;
        frame.id = self.last_id;
        frame.sent_yet = false;
        frame.timer = None;
        self.frames.push_back(frame);
        self.last_id
    }

    pub fn get(&self, id: FrameId) -> Option<&OutboundFrame> {
        self.frames.iter().find(|f| f.id == id)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut OutboundFrame> {
        self.frames.iter_mut().find(|f| f.id == id)
    }

    pub fn remove(&mut self, id: FrameId) -> Option<OutboundFrame> {
        let index = self.frames.iter().position(|f| f.id == id)?;
        self.frames.remove(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundFrame> {
        self.frames.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut OutboundFrame> {
        self.frames.iter_mut()
    }

    /// Mark every outstanding full frame of `call` with this sequence
    /// number as acknowledged. Already acknowledged frames are ignored, so
    /// a duplicate ACK changes nothing.
    pub fn ack(&mut self, call: CallRef, seqno: u16) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        for frame in self.frames.iter_mut() {
            if frame.call == call && frame.seqno == Some(seqno) && !frame.is_acknowledged() {
                frame.retries = NO_RETRANSMIT;
                outcome.matched += 1;
                if frame.is_final {
                    outcome.final_call = Some(call);
                }
            }
        }
        if outcome.matched == 0 {
            debug!("ACK for call {} seqno {} matched nothing", call, seqno);
        }
        outcome
    }

    /// Stop retransmitting anything belonging to `call`. Unsent frames are
    /// still sent once by the next drain.
    pub fn abandon_call(&mut self, call: CallRef) {
        for frame in self.frames.iter_mut().filter(|f| f.call == call) {
            frame.retries = NO_RETRANSMIT;
        }
    }

    /// Take the frames that have been sent and acknowledged, leaving
    /// everything else in order
    pub fn take_acknowledged(&mut self) -> Vec<OutboundFrame> {
        let (done, keep): (Vec<_>, Vec<_>) = self
            .frames
            .drain(..)
            .partition(|f| f.sent_yet && f.is_acknowledged());
        self.frames = keep.into();
        done
    }
}
