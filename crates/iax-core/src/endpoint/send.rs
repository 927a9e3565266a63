//! Outgoing frames

use std::net::SocketAddr;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, Level};

use super::{Datagram, Engine};
use crate::channel::ChannelEvent;
use crate::frame::{
    describe, parse_header, FrameType, FullHeader, IaxCommand, MediaFrame, MiniHeader,
};
use crate::session::CallSession;
use crate::transmit::{initial_retry_time, OutboundFrame, NO_RETRANSMIT};

/// How a frame leaves the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendMode {
    /// Through the retransmit queue
    Queued,
    /// Straight to the outbox, never retransmitted
    Immediate,
    /// Queued; the call ends when it is ACKed or given up on
    Final,
}

impl Engine {
    /// Frame and send one frame on a call.
    ///
    /// `ts` of 0 means "now"; `seqno` of `None` takes the next outgoing
    /// sequence number. Voice goes out as a mini frame whenever the
    /// timestamp's high 16 bits and the format are unchanged since the last
    /// full voice frame.
    pub(crate) fn transmit(
        &self,
        session: &mut CallSession,
        frame: &MediaFrame,
        ts: u32,
        seqno: Option<u16>,
        now: Instant,
        mode: SendMode,
    ) {
        let lastsent = session.lastsent;
        let timestamp = session.calc_timestamp(now, ts);
        let mini = (timestamp & 0xFFFF_0000) == (lastsent & 0xFFFF_0000)
            && frame.is_voice()
            && frame.subclass == session.svoiceformat;

        let (datagram, seqno, retries) = if mini {
            let header = MiniHeader {
                src_call: session.callno,
                timestamp: timestamp as u16,
            };
            (header.to_datagram(&frame.payload), None, NO_RETRANSMIT)
        } else {
            let seqno = seqno.unwrap_or_else(|| {
                let next = session.oseqno;
                session.oseqno = next.wrapping_add(1);
                next
            });
            let header = FullHeader {
                src_call: session.callno,
                dst_call: session.peer_callno.unwrap_or(0),
                timestamp,
                seqno,
                frame_type: frame.frame_type.as_u8(),
                subclass: frame.subclass,
            };
            if frame.is_voice() {
                session.svoiceformat = frame.subclass;
            }
            let retries = if frame.is_command(IaxCommand::Ack) {
                NO_RETRANSMIT
            } else {
                0
            };
            (header.to_datagram(&frame.payload), Some(seqno), retries)
        };

        if mode == SendMode::Immediate {
            if session.error.is_none() {
                self.push_outbox(session.addr, datagram);
            }
            return;
        }

        self.queue.lock().enqueue(OutboundFrame {
            id: 0,
            call: session.call_ref(),
            addr: session.addr,
            seqno,
            timestamp,
            frame_type: frame.frame_type,
            subclass: frame.subclass,
            retries,
            retry_time: initial_retry_time(session.pingtime),
            sent_yet: false,
            is_final: mode == SendMode::Final,
            datagram,
            timer: None,
        });
        self.wake.notify_one();
    }

    pub(crate) fn send_command(
        &self,
        session: &mut CallSession,
        command: IaxCommand,
        ts: u32,
        payload: Bytes,
        seqno: Option<u16>,
        now: Instant,
        mode: SendMode,
    ) {
        let frame = MediaFrame::iax(command, payload);
        self.transmit(session, &frame, ts, seqno, now, mode);
    }

    /// Send the last frame of a call. The call stops probing and is
    /// detached from its channel right away.
    pub(crate) fn send_command_final(
        &self,
        session: &mut CallSession,
        command: IaxCommand,
        ts: u32,
        payload: Bytes,
        now: Instant,
    ) {
        self.predestroy(session);
        self.send_command(session, command, ts, payload, None, now, SendMode::Final);
    }

    /// ACK a full frame, echoing its timestamp and sequence number
    pub(crate) fn send_ack(&self, session: &mut CallSession, ts: u32, seqno: u16, now: Instant) {
        self.send_command(
            session,
            IaxCommand::Ack,
            ts,
            Bytes::new(),
            Some(seqno),
            now,
            SendMode::Immediate,
        );
    }

    /// Mark a call as going away: stop its probes and cut it loose from
    /// its channel
    pub(crate) fn predestroy(&self, session: &mut CallSession) {
        {
            let mut timers = self.timers.lock();
            for timer in [session.ping_timer.take(), session.lag_timer.take()]
                .into_iter()
                .flatten()
            {
                timers.cancel(timer);
            }
        }
        session.alreadygone = true;
        if let Some(owner) = session.owner.take() {
            owner.send(ChannelEvent::Hangup {
                cause: session.error,
            });
        }
    }

    /// Answer a frame for an unknown call with a bare INVAL. Call numbers
    /// are swapped; nothing is queued.
    pub(crate) fn send_raw_inval(&self, addr: SocketAddr, src_call: u16, dst_call: u16) {
        let header = FullHeader {
            src_call,
            dst_call,
            timestamp: 0,
            seqno: 0,
            frame_type: FrameType::Iax.as_u8(),
            subclass: IaxCommand::Inval.subclass(),
        };
        let datagram = header.to_datagram(&[]);
        debug!("Raw INVAL to {} (src {}, dst {})", addr, src_call, dst_call);
        self.push_outbox(addr, datagram);
    }

    pub(crate) fn push_outbox(&self, addr: SocketAddr, data: Bytes) {
        self.trace_frame("Tx", &data, addr);
        self.counters.frames_out.fetch_add(1, Ordering::Relaxed);
        self.outbox.lock().push_back(Datagram { addr, data });
        self.wake.notify_one();
    }

    pub(crate) fn trace_frame(&self, direction: &str, datagram: &[u8], addr: SocketAddr) {
        let debug = self.is_debug();
        if !debug && !tracing::enabled!(Level::DEBUG) {
            return;
        }
        let Ok(header) = parse_header(datagram) else {
            return;
        };
        if debug {
            info!("{} {} {}", direction, addr, describe(&header));
        } else {
            debug!("{} {} {}", direction, addr, describe(&header));
        }
    }
}
