//! Incoming datagrams and IAX command handling

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Engine, SendMode, TimerTask};
use crate::auth::{self, AuthRequest};
use crate::channel::{ChannelEvent, ChannelState};
use crate::config::{HostAccess, PROTOCOL_VERSION};
use crate::error::CallError;
use crate::frame::{
    format, parse_header, FrameType, IaxCommand, IaxParams, MediaFrame, MINI_HEADER_LEN,
};
use crate::jitter::{JitterBuffer, Playout};
use crate::session::{CallSession, CallState, FindMode, SessionTable};

const NO_AUTHORITY: &[u8] = b"No authority found";
const NO_CODEC: &[u8] = b"Unable to negotiate codec";

/// Pick the voice format for a call.
///
/// The format the far end asked for wins if we support it; otherwise the
/// best of its capabilities that we share. `None` means no common codec.
pub fn negotiate_format(peerformat: u32, peercapability: u32, capability: u32) -> Option<u32> {
    let requested = peerformat & capability;
    if requested != 0 {
        return Some(format::best_codec(requested).unwrap_or(requested));
    }
    format::best_codec(peercapability & capability)
}

/// Has a frame with `seqno` already been accepted, given that `expected`
/// is the next one due?
fn already_seen(expected: u16, seqno: u16) -> bool {
    (expected.wrapping_sub(seqno) as i16) > 0
}

impl Engine {
    /// Process one datagram received from `from`
    pub fn handle_datagram(self: &Arc<Self>, data: &[u8], from: SocketAddr, now: Instant) {
        if data.len() < MINI_HEADER_LEN {
            warn!(
                "midget packet received ({} of {} min) from {}",
                data.len(),
                MINI_HEADER_LEN,
                from
            );
            self.counters.invalid.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let header = match parse_header(data) {
            Ok(header) => header,
            Err(e) => {
                warn!("Discarding datagram from {}: {}", from, e);
                self.counters.invalid.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        self.counters.frames_in.fetch_add(1, Ordering::Relaxed);
        self.trace_frame("Rx", data, from);

        let payload = Bytes::copy_from_slice(&data[header.payload_offset..]);
        let frame_type = if header.is_full {
            FrameType::from_u8(header.frame_type)
        } else {
            Some(FrameType::Voice)
        };
        let command = match frame_type {
            Some(FrameType::Iax) if header.is_full => IaxCommand::from_subclass(header.subclass),
            _ => None,
        };
        let mode = if command == Some(IaxCommand::New) {
            FindMode::AllowNew
        } else {
            FindMode::PreventNew
        };

        let mut sessions = self.sessions.lock();
        let found = match sessions.find_or_create(header.src_call, header.dst_call, from, mode) {
            Ok(found) => found,
            Err(e) => {
                warn!("Cannot take call from {}: {}", from, e);
                None
            }
        };
        let Some((callno, created)) = found else {
            if header.is_full && command != Some(IaxCommand::Inval) {
                self.send_raw_inval(from, header.dst_call, header.src_call);
            }
            return;
        };
        let Some(session) = sessions.get_mut(callno) else {
            return;
        };
        if created {
            self.init_session(session, now);
            info!("New call {} from {}", callno, from);
        }
        session.peer_callno = Some(header.src_call);

        let frame = if header.is_full {
            let ack_or_inval = matches!(command, Some(IaxCommand::Ack | IaxCommand::Inval));
            if session.iseqno != header.seqno && !ack_or_inval {
                debug!(
                    "Packet arrived out of order on {} (expecting {}, got {})",
                    callno, session.iseqno, header.seqno
                );
                if already_seen(session.iseqno, header.seqno) {
                    self.send_ack(session, header.timestamp, header.seqno, now);
                }
                return;
            }
            if !ack_or_inval {
                session.iseqno = session.iseqno.wrapping_add(1);
                self.send_ack(session, header.timestamp, header.seqno, now);
            }

            let Some(frame_type) = frame_type else {
                warn!("Unknown frame type {} from {}", header.frame_type, from);
                return;
            };
            if frame_type == FrameType::Voice && header.subclass != session.voiceformat {
                session.voiceformat = header.subclass;
                debug!(
                    "Voice format on {} changed to {}",
                    callno,
                    format::name(header.subclass)
                );
            }

            let frame = MediaFrame {
                frame_type,
                subclass: header.subclass,
                timestamp: header.timestamp,
                payload,
            };
            if frame_type == FrameType::Iax {
                self.handle_command(&mut sessions, callno, command, frame, header.seqno, now);
                return;
            }
            frame
        } else {
            if session.voiceformat == 0 {
                warn!("Received mini frame before first full voice frame on {}", callno);
                return;
            }
            MediaFrame {
                frame_type: FrameType::Voice,
                subclass: session.voiceformat,
                timestamp: (session.last & 0xFFFF_0000) | header.timestamp,
                payload,
            }
        };

        if !session.is_started() {
            debug!("Dropping {} frame on call {} which has not started", frame.frame_type, callno);
            return;
        }
        if session.last < frame.timestamp {
            session.last = frame.timestamp;
        } else {
            debug!(
                "Received out of order packet on {} (ts = {}, last = {})",
                callno, frame.timestamp, session.last
            );
        }
        self.schedule_delivery(session, frame, true, now);
    }

    fn handle_command(
        self: &Arc<Self>,
        sessions: &mut SessionTable,
        callno: u16,
        command: Option<IaxCommand>,
        frame: MediaFrame,
        seqno: u16,
        now: Instant,
    ) {
        let Some(session) = sessions.get_mut(callno) else {
            return;
        };
        // Everything but a lag request only feeds the jitter statistics
        if command != Some(IaxCommand::LagRq) {
            self.schedule_delivery(session, frame.clone(), false, now);
        }
        let Some(command) = command else {
            debug!(
                "Unknown IAX command {} on {}/{:?}",
                frame.subclass, callno, session.peer_callno
            );
            return;
        };
        debug!("IAX {} received on {}", command, callno);

        match command {
            IaxCommand::Ack => {
                let outcome = self.queue.lock().ack(session.call_ref(), seqno);
                if let Some(call) = outcome.final_call {
                    debug!("Really destroying {}, having been acked on final message", call);
                    self.destroy_call(sessions, callno);
                }
            }
            IaxCommand::Ping => {
                self.send_command(
                    session,
                    IaxCommand::Pong,
                    frame.timestamp,
                    Bytes::new(),
                    None,
                    now,
                    SendMode::Queued,
                );
            }
            IaxCommand::Pong => {
                let ts = session.calc_timestamp(now, 0);
                session.pingtime = ts.wrapping_sub(frame.timestamp);
                debug!("Ping time on {} is {} ms", callno, session.pingtime);
            }
            IaxCommand::LagRq | IaxCommand::LagRp => {
                self.schedule_delivery(session, frame, true, now);
            }
            IaxCommand::New => self.handle_new(session, &frame, now),
            IaxCommand::Hangup => {
                session.alreadygone = true;
                debug!("Immediately destroying {}, having received hangup", callno);
                self.destroy_call(sessions, callno);
            }
            IaxCommand::Reject => {
                let reason = crate::frame::params::payload_text(&frame.payload);
                if session.owner.is_some() {
                    warn!("Call rejected by {}: {}", session.addr, reason);
                }
                session.error = Some(if session.state == CallState::ChallengeSent {
                    CallError::AuthFailed
                } else {
                    CallError::Rejected
                });
                debug!("Immediately destroying {}, having received reject", callno);
                self.destroy_call(sessions, callno);
            }
            IaxCommand::Accept => self.handle_accept(session, &frame, now),
            IaxCommand::AuthReq => self.handle_authreq(session, &frame, now),
            IaxCommand::AuthRep => self.handle_authrep(session, &frame, now),
            IaxCommand::Inval => {
                session.error = Some(CallError::NotConnected);
                debug!("Immediately destroying {}, having received INVAL", callno);
                self.destroy_call(sessions, callno);
            }
            IaxCommand::RegReq | IaxCommand::RegRep => {
                debug!("Registration is not supported, ignoring {} on {}", command, callno);
            }
        }
    }

    fn handle_new(self: &Arc<Self>, session: &mut CallSession, frame: &MediaFrame, now: Instant) {
        if session.is_started() {
            debug!("Ignoring NEW on call {} which is already up", session.callno);
            return;
        }
        let params = IaxParams::parse(&frame.payload);
        if let Err(reason) = self.check_access(session, &params) {
            info!(
                "Rejected connect attempt from {}, request '{}': {}",
                session.addr, params, reason
            );
            self.send_command_final(session, IaxCommand::Reject, 0, Bytes::from_static(NO_AUTHORITY), now);
            return;
        }

        if session.secret.is_empty() {
            self.start_inbound(session, now);
        } else {
            let (request, challenge) = auth::build_request(session.methods, &session.username);
            session.challenge = challenge.unwrap_or_default();
            self.send_command(
                session,
                IaxCommand::AuthReq,
                0,
                request.encode(),
                None,
                now,
                SendMode::Queued,
            );
            session.state = CallState::AwaitingCredentials;
        }
    }

    /// Load the caller's request onto the call and find the user entry it
    /// is allowed to use
    fn check_access(&self, session: &mut CallSession, params: &IaxParams) -> Result<(), String> {
        let mut version = PROTOCOL_VERSION;
        let mut got_capability = false;
        for (key, value) in params.iter() {
            match key {
                "exten" => session.exten = value.to_string(),
                "callerid" => session.callerid = value.to_string(),
                "ani" => session.ani = value.to_string(),
                "dnid" => session.dnid = value.to_string(),
                "context" => session.context = value.to_string(),
                "language" => session.language = value.to_string(),
                "username" => session.username = value.to_string(),
                "formats" => session.peerformat = value.trim().parse().unwrap_or(0),
                "capability" => {
                    got_capability = true;
                    session.peercapability = value.trim().parse().unwrap_or(0);
                }
                "version" => version = value.trim().parse().unwrap_or(0),
                _ => warn!("Unknown variable '{}' with value '{}'", key, value),
            }
        }
        if !got_capability {
            session.peercapability = session.peerformat;
        }
        if version > PROTOCOL_VERSION {
            warn!(
                "Peer '{}' has too new a protocol version ({}) for me",
                session.addr.ip(),
                version
            );
            return Err(format!("unsupported protocol version {}", version));
        }

        let config = self.config();
        let ip = session.addr.ip();
        let user = config.users.iter().find(|user| {
            (session.username.is_empty() || session.username == user.name)
                && HostAccess::compile(&user.access).is_ok_and(|ha| ha.allows(ip))
                && (session.context.is_empty() || user.context.contains(&session.context))
        });
        let Some(user) = user else {
            return Err("no matching user".to_string());
        };

        if session.username.is_empty() {
            session.username = user.name.clone();
        }
        if session.context.is_empty() {
            session.context = user
                .context
                .first()
                .cloned()
                .unwrap_or_else(|| config.general.context.clone());
        }
        session.secret = user.secret.clone();
        session.methods = user.methods();
        if !session.callerid.is_empty() {
            if let Some(callerid) = &user.callerid {
                session.callerid = callerid.clone();
                session.ani = callerid.clone();
            }
        }
        Ok(())
    }

    /// Negotiate a codec, send ACCEPT and hand the call to the PBX
    fn start_inbound(self: &Arc<Self>, session: &mut CallSession, now: Instant) {
        let Some(format) =
            negotiate_format(session.peerformat, session.peercapability, session.capability)
        else {
            info!(
                "Rejected connect attempt from {}, requested/capability 0x{:x}/0x{:x} incompatible with our capability 0x{:x}",
                session.addr, session.peerformat, session.peercapability, session.capability
            );
            self.send_command_final(session, IaxCommand::Reject, 0, Bytes::from_static(NO_CODEC), now);
            return;
        };

        let accept = IaxParams::new().with("formats", format);
        self.send_command(
            session,
            IaxCommand::Accept,
            0,
            accept.encode(),
            None,
            now,
            SendMode::Queued,
        );
        session.state = CallState::Started;
        info!(
            "Accepting call {} from {}, requested format = {}, actual format = {}",
            session.callno,
            session.addr,
            format::names(session.peerformat),
            format::name(format)
        );

        let channel = self.attach_channel(session, ChannelState::Ringing, format);
        self.incoming.lock().push_back(channel);
        self.wake.notify_one();
    }

    fn handle_authrep(self: &Arc<Self>, session: &mut CallSession, frame: &MediaFrame, now: Instant) {
        if session.is_started() {
            warn!("Call {} is already up, can't start on it", session.callno);
            return;
        }
        if session.state != CallState::AwaitingCredentials {
            warn!("Unexpected AUTHREP on call {}", session.callno);
            return;
        }
        let reply = IaxParams::parse(&frame.payload);
        if !auth::verify(session.methods, &session.challenge, &session.secret, &reply) {
            info!(
                "Host {} failed to authenticate as {}",
                session.addr.ip(),
                session.username
            );
            self.send_command_final(session, IaxCommand::Reject, 0, Bytes::from_static(NO_AUTHORITY), now);
            return;
        }
        session.state = CallState::Authenticated;
        self.start_inbound(session, now);
    }

    fn handle_accept(&self, session: &mut CallSession, frame: &MediaFrame, now: Instant) {
        if matches!(
            session.state,
            CallState::Started | CallState::AwaitingCredentials | CallState::Authenticated
        ) {
            return;
        }
        if frame.payload.is_empty() {
            session.peerformat = session.capability;
        } else {
            let params = IaxParams::parse(&frame.payload);
            for (key, value) in params.iter() {
                match key {
                    "formats" => session.peerformat = value.trim().parse().unwrap_or(0),
                    _ => warn!("Unknown variable '{}' with value '{}'", key, value),
                }
            }
        }
        info!(
            "Call accepted by {} (format {})",
            session.addr.ip(),
            format::names(session.peerformat)
        );

        if session.peerformat & session.capability == 0 {
            info!(
                "Rejected call to {}, format 0x{:x} incompatible with our capability 0x{:x}",
                session.addr, session.peerformat, session.capability
            );
            self.send_command_final(session, IaxCommand::Reject, 0, Bytes::from_static(NO_CODEC), now);
            return;
        }
        session.state = CallState::Started;
        let format = format::best_codec(session.peerformat & session.capability)
            .unwrap_or(session.peerformat);
        session.notify_owner(ChannelEvent::Accepted { format });
    }

    /// Answer the far end's challenge, with the call's own secret or with
    /// that of a matching peer
    fn handle_authreq(&self, session: &mut CallSession, frame: &MediaFrame, now: Instant) {
        if session.is_started() {
            warn!("Call {} is already up, can't start on it", session.callno);
            return;
        }
        let params = IaxParams::parse(&frame.payload);
        let request = AuthRequest::parse(&params);
        if let Some(username) = &request.username {
            session.username = username.clone();
        }
        session.challenge = request.challenge.clone();

        let reply = if !session.secret.is_empty() {
            auth::build_reply(&request, &session.secret)
        } else {
            let config = self.config();
            config
                .peers
                .iter()
                .filter(|peer| {
                    session
                        .peer
                        .as_ref()
                        .is_none_or(|name| peer.name.eq_ignore_ascii_case(name))
                        && (peer.username.is_empty() || peer.username == session.username)
                        && peer.matches_host(session.addr.ip())
                })
                .find_map(|peer| auth::build_reply(&request, &peer.secret))
        };

        match reply {
            Some(reply) => {
                self.send_command(
                    session,
                    IaxCommand::AuthRep,
                    0,
                    reply.encode(),
                    None,
                    now,
                    SendMode::Queued,
                );
                session.state = CallState::ChallengeSent;
            }
            None => warn!(
                "I don't know how to authenticate {} to {}",
                params,
                session.addr.ip()
            ),
        }
    }

    /// Measure a received frame and deliver it, now or after its jitter
    /// buffer delay. With `really_deliver` false only the statistics move.
    pub(crate) fn schedule_delivery(
        &self,
        session: &mut CallSession,
        frame: MediaFrame,
        really_deliver: bool,
        now: Instant,
    ) {
        let settings = self.jitter_settings();
        let rx = session.calc_rxstamp(now);
        let delay = session.jitter.update(rx, frame.timestamp, &settings);
        if !really_deliver {
            return;
        }
        match JitterBuffer::playout(delay, frame.is_voice()) {
            Playout::Now => self.deliver(session, frame, now),
            Playout::After(ms) => {
                let call = session.call_ref();
                self.timers.lock().schedule(
                    now,
                    Duration::from_millis(ms as u64),
                    TimerTask::Deliver { call, frame },
                );
            }
            Playout::Drop => {
                self.counters.late_drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Final step of delivery. Lag probes are answered or measured here so
    /// that they see the same buffering as voice.
    pub(crate) fn deliver(&self, session: &mut CallSession, frame: MediaFrame, now: Instant) {
        if session.alreadygone {
            debug!("Not delivering to call {} which is going away", session.callno);
            return;
        }
        match frame.command() {
            Some(IaxCommand::LagRq) => {
                self.send_command(
                    session,
                    IaxCommand::LagRp,
                    frame.timestamp,
                    frame.payload,
                    None,
                    now,
                    SendMode::Queued,
                );
            }
            Some(IaxCommand::LagRp) => {
                let ts = session.calc_timestamp(now, 0);
                session.lag = ts.wrapping_sub(frame.timestamp);
                debug!("Lag on {} is {} ms", session.callno, session.lag);
            }
            Some(_) => {}
            None => {
                session.notify_owner(ChannelEvent::Frame(frame));
            }
        }
    }
}
