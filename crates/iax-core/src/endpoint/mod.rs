//! IAX protocol engine
//!
//! [`Engine`] holds every piece of protocol state: the call table, the
//! retransmit queue, the timer queue and the outbox of datagrams waiting
//! for the socket. It never touches the socket itself; the network task
//! (see [`crate::network`]) feeds it datagrams and timer ticks and flushes
//! its outbox. Every entry point takes the current time so the protocol
//! can be driven deterministically in tests.
//!
//! Locks are always taken in this order: sessions, queue, timers, outbox,
//! incoming.

pub mod dial;
mod dispatch;
mod send;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use dial::{CallOptions, CallTarget, DialString};
pub use dispatch::negotiate_format;
pub(crate) use send::SendMode;

use crate::channel::{ChannelInfo, ChannelLink, ChannelState, IaxChannel};
use crate::config::IaxConfig;
use crate::error::{CallError, Error, Result};
use crate::frame::{FrameType, IaxCommand, MediaFrame};
use crate::jitter::JitterSettings;
use crate::sched::Scheduler;
use crate::session::{CallRef, CallSession, CallState, DestroyOutcome, SessionTable};
use crate::transmit::{backoff, FrameId, RetransmitQueue};

/// Delayed work owned by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerTask {
    Ping { call: CallRef },
    LagRequest { call: CallRef },
    Retransmit { frame: FrameId },
    Deliver { call: CallRef, frame: MediaFrame },
}

impl TimerTask {
    fn belongs_to(&self, target: CallRef) -> bool {
        match self {
            TimerTask::Ping { call }
            | TimerTask::LagRequest { call }
            | TimerTask::Deliver { call, .. } => *call == target,
            TimerTask::Retransmit { .. } => false,
        }
    }
}

/// A datagram waiting for the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub addr: SocketAddr,
    pub data: Bytes,
}

#[derive(Debug, Default)]
struct Counters {
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    retransmits: AtomicU64,
    timeouts: AtomicU64,
    late_drops: AtomicU64,
    invalid: AtomicU64,
}

/// Point-in-time engine figures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub calls: usize,
    pub queued_frames: usize,
    pub unsent_frames: usize,
    pub pending_timers: usize,
    pub frames_in: u64,
    pub frames_out: u64,
    pub retransmits: u64,
    pub timeouts: u64,
    pub late_drops: u64,
    pub invalid_datagrams: u64,
}

pub struct Engine {
    sessions: Mutex<SessionTable>,
    queue: Mutex<RetransmitQueue>,
    timers: Mutex<Scheduler<TimerTask>>,
    outbox: Mutex<VecDeque<Datagram>>,
    incoming: Mutex<VecDeque<IaxChannel>>,
    config: RwLock<Arc<IaxConfig>>,
    jitter: RwLock<JitterSettings>,
    wake: Notify,
    counters: Counters,
    debug: AtomicBool,
}

impl Engine {
    pub fn new(config: IaxConfig) -> Arc<Self> {
        let jitter = config.jitter_settings();
        let debug = config.general.debug;
        Arc::new(Self {
            sessions: Mutex::new(SessionTable::new(config.general.maxcalls)),
            queue: Mutex::new(RetransmitQueue::new()),
            timers: Mutex::new(Scheduler::new()),
            outbox: Mutex::new(VecDeque::new()),
            incoming: Mutex::new(VecDeque::new()),
            config: RwLock::new(Arc::new(config)),
            jitter: RwLock::new(jitter),
            wake: Notify::new(),
            counters: Counters::default(),
            debug: AtomicBool::new(debug),
        })
    }

    pub fn config(&self) -> Arc<IaxConfig> {
        self.config.read().clone()
    }

    /// Swap in a new configuration. Calls in progress keep their
    /// negotiated state; new calls see the new users, peers and settings.
    /// The size of the call table is fixed at startup.
    pub fn reload(&self, config: IaxConfig) {
        if config.general.maxcalls != self.config().general.maxcalls {
            warn!("maxcalls changes take effect on restart only");
        }
        *self.jitter.write() = config.jitter_settings();
        self.debug.store(config.general.debug, Ordering::Relaxed);
        *self.config.write() = Arc::new(config);
        info!("IAX configuration reloaded");
    }

    pub fn jitter_settings(&self) -> JitterSettings {
        *self.jitter.read()
    }

    pub fn set_max_jitter_buffer(&self, ms: i32) {
        let ms = ms.max(0);
        self.jitter.write().max_jitter_buffer = ms;
        info!("Maximum jitter buffer set to {} ms", ms);
    }

    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
        info!("IAX debugging {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Signalled whenever the outbox or retransmit queue gains work
    pub fn notifier(&self) -> &Notify {
        &self.wake
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.lock().next_deadline()
    }

    pub fn take_outbox(&self) -> Vec<Datagram> {
        self.outbox.lock().drain(..).collect()
    }

    /// Inbound calls accepted since the last call, ready for the PBX
    pub fn take_incoming(&self) -> Vec<IaxChannel> {
        self.incoming.lock().drain(..).collect()
    }

    pub fn call_error(&self, call: CallRef) -> Option<CallError> {
        self.sessions.lock().get_ref(call).and_then(|s| s.error)
    }

    pub fn call_state(&self, call: CallRef) -> Option<CallState> {
        self.sessions.lock().get_ref(call).map(|s| s.state)
    }

    /// Run `f` against the call table
    pub fn with_sessions<R>(&self, f: impl FnOnce(&SessionTable) -> R) -> R {
        f(&self.sessions.lock())
    }

    pub fn stats(&self) -> EngineStats {
        let calls = self.sessions.lock().len();
        let (queued_frames, unsent_frames) = {
            let queue = self.queue.lock();
            (queue.len(), queue.unsent())
        };
        let pending_timers = self.timers.lock().len();
        let c = &self.counters;
        EngineStats {
            calls,
            queued_frames,
            unsent_frames,
            pending_timers,
            frames_in: c.frames_in.load(Ordering::Relaxed),
            frames_out: c.frames_out.load(Ordering::Relaxed),
            retransmits: c.retransmits.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            late_drops: c.late_drops.load(Ordering::Relaxed),
            invalid_datagrams: c.invalid.load(Ordering::Relaxed),
        }
    }

    /// Set up a freshly allocated call: codecs and periodic probes
    fn init_session(&self, session: &mut CallSession, now: Instant) {
        let config = self.config();
        session.capability = config.capability();
        let call = session.call_ref();
        let mut timers = self.timers.lock();
        session.ping_timer =
            Some(timers.schedule(now, config.ping_interval(), TimerTask::Ping { call }));
        session.lag_timer = Some(timers.schedule(
            now,
            config.lagrq_interval(),
            TimerTask::LagRequest { call },
        ));
    }

    /// Attach a new channel to `session`
    fn attach_channel(
        self: &Arc<Self>,
        session: &mut CallSession,
        state: ChannelState,
        format: u32,
    ) -> IaxChannel {
        let (link, events) = ChannelLink::pair();
        session.owner = Some(link);
        let info = ChannelInfo {
            exten: session.exten.clone(),
            context: session.context.clone(),
            callerid: session.callerid.clone(),
            ani: session.ani.clone(),
            dnid: session.dnid.clone(),
            username: session.username.clone(),
            language: session.language.clone(),
            peer_addr: Some(session.addr),
        };
        let host = session
            .peer
            .clone()
            .unwrap_or_else(|| session.addr.ip().to_string());
        IaxChannel::new(
            self.clone(),
            session.call_ref(),
            session.channel_name(&host),
            events,
            state,
            format,
            info,
        )
    }

    /// Destroy a call and release everything scheduled on its behalf
    pub(crate) fn destroy_call(&self, sessions: &mut SessionTable, callno: u16) -> DestroyOutcome {
        let outcome = sessions.destroy(callno);
        if let DestroyOutcome::Destroyed(released) | DestroyOutcome::Deferred(released) = &outcome {
            self.queue.lock().abandon_call(released.call);
            let mut timers = self.timers.lock();
            for id in &released.timers {
                timers.cancel(*id);
            }
            timers.retain(|task| !task.belongs_to(released.call));
        }
        outcome
    }

    /// Send everything queued but not yet sent, arm retransmit timers and
    /// retire acknowledged frames. Runs once per network loop iteration.
    pub fn drain(&self, now: Instant) {
        let sessions = self.sessions.lock();
        let mut queue = self.queue.lock();

        let mut sends = Vec::new();
        let mut rearm = Vec::new();
        for frame in queue.iter_mut().filter(|f| !f.sent_yet) {
            frame.sent_yet = true;
            let sendable = sessions
                .get(frame.call.callno)
                .is_some_and(|s| s.serial == frame.call.serial && s.error.is_none());
            if sendable {
                sends.push(Datagram {
                    addr: frame.addr,
                    data: frame.datagram.clone(),
                });
            }
            if !frame.is_acknowledged() {
                frame.retries += 1;
                rearm.push((frame.id, frame.retry_time));
            }
        }

        let retired = queue.take_acknowledged();
        let mut timers = self.timers.lock();
        for frame in retired {
            if let Some(timer) = frame.timer {
                timers.cancel(timer);
            }
        }
        for (id, retry_time) in rearm {
            let timer = timers.schedule(
                now,
                Duration::from_millis(retry_time as u64),
                TimerTask::Retransmit { frame: id },
            );
            if let Some(frame) = queue.get_mut(id) {
                frame.timer = Some(timer);
            }
        }
        drop(timers);
        drop(queue);
        drop(sessions);

        if !sends.is_empty() {
            for datagram in &sends {
                self.trace_frame("Tx", &datagram.data, datagram.addr);
            }
            self.counters
                .frames_out
                .fetch_add(sends.len() as u64, Ordering::Relaxed);
            self.outbox.lock().extend(sends);
        }
    }

    /// Run every timer due at `now`. Returns how many ran.
    pub fn run_timers(&self, now: Instant) -> usize {
        let due = self.timers.lock().poll(now);
        let count = due.len();
        for (_, task) in due {
            match task {
                TimerTask::Ping { call } => self.send_probe(call, IaxCommand::Ping, now),
                TimerTask::LagRequest { call } => self.send_probe(call, IaxCommand::LagRq, now),
                TimerTask::Retransmit { frame } => self.attempt_transmit(frame, now),
                TimerTask::Deliver { call, frame } => {
                    let mut sessions = self.sessions.lock();
                    match sessions.get_ref(call) {
                        Some(session) => self.deliver(session, frame, now),
                        None => debug!("Discarding delayed frame for vanished call {}", call),
                    }
                }
            }
        }
        count
    }

    fn send_probe(&self, call: CallRef, command: IaxCommand, now: Instant) {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_ref(call) else {
            return;
        };
        self.send_command(session, command, 0, Bytes::new(), None, now, SendMode::Queued);

        let config = self.config();
        let (interval, task) = match command {
            IaxCommand::Ping => (config.ping_interval(), TimerTask::Ping { call }),
            _ => (config.lagrq_interval(), TimerTask::LagRequest { call }),
        };
        let timer = Some(self.timers.lock().schedule(now, interval, task));
        match command {
            IaxCommand::Ping => session.ping_timer = timer,
            _ => session.lag_timer = timer,
        }
    }

    /// Retransmit timer for one queued frame
    fn attempt_transmit(&self, id: FrameId, now: Instant) {
        let mut sessions = self.sessions.lock();
        let mut queue = self.queue.lock();
        let Some(frame) = queue.get_mut(id) else {
            return;
        };
        frame.timer = None;
        let call = frame.call;

        if !sessions.contains(call) || frame.is_acknowledged() {
            queue.remove(id);
            return;
        }

        let max_retries = self.config().general.maxretries;
        if frame.retries >= max_retries {
            let Some(frame) = queue.remove(id) else {
                return;
            };
            drop(queue);
            self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
            if frame.is_final {
                warn!(
                    "Max retries exceeded to host {} on {} (final frame)",
                    frame.addr, call
                );
            } else {
                warn!(
                    "Max retries exceeded to host {} on {} (type = {}, subclass = {}, ts = {}, seqno = {:?})",
                    frame.addr, call, frame.frame_type, frame.subclass, frame.timestamp, frame.seqno
                );
                if let Some(session) = sessions.get_ref(call) {
                    session.error = Some(CallError::TimedOut);
                }
            }
            self.destroy_call(&mut sessions, call.callno);
            return;
        }

        let failed = sessions.get(call.callno).is_some_and(|s| s.error.is_some());
        let resend = (!failed).then(|| Datagram {
            addr: frame.addr,
            data: frame.datagram.clone(),
        });
        frame.retries += 1;
        frame.retry_time = backoff(frame.retry_time);
        let delay = Duration::from_millis(frame.retry_time as u64);
        frame.timer = Some(
            self.timers
                .lock()
                .schedule(now, delay, TimerTask::Retransmit { frame: id }),
        );
        drop(queue);
        drop(sessions);

        if let Some(datagram) = resend {
            debug!("Retransmitting frame {} on {}", id, call);
            self.counters.retransmits.fetch_add(1, Ordering::Relaxed);
            self.push_outbox(datagram.addr, datagram.data);
        }
    }

    /// Frame write from a channel
    pub(crate) fn channel_write(&self, call: CallRef, frame: MediaFrame) -> Result<()> {
        if frame.frame_type == FrameType::Null {
            return Ok(());
        }
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_ref(call) else {
            return Err(Error::call_gone(call.callno, "call has been destroyed"));
        };
        if let Some(error) = session.error {
            return Err(Error::call_gone(call.callno, error.to_string()));
        }
        if session.alreadygone || session.owner.is_none() {
            return Ok(());
        }
        self.transmit(session, &frame, 0, None, now, SendMode::Queued);
        Ok(())
    }

    /// Hangup from a channel
    pub(crate) fn channel_hangup(&self, call: CallRef) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_ref(call) else {
            return;
        };
        if session.owner.is_none() {
            return;
        }
        let was_gone = session.alreadygone;
        let failed = session.error.is_some();
        info!("Hanging up call {}", call);
        if !failed && !was_gone {
            self.send_command_final(session, IaxCommand::Hangup, 0, Bytes::new(), now);
        } else {
            session.owner = None;
        }
        if was_gone || failed {
            self.destroy_call(&mut sessions, call.callno);
        }
    }

    /// Tear down every call, telling owning channels to hang up
    pub fn shutdown(&self) {
        let mut sessions = self.sessions.lock();
        let callnos: Vec<u16> = sessions.iter().map(|s| s.callno).collect();
        for callno in callnos {
            self.destroy_call(&mut sessions, callno);
        }
        info!("IAX engine stopped with {} calls still owned", sessions.len());
    }
}

#[cfg(test)]
mod tests;
