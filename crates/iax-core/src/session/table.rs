//! Call table keyed by local call number

use std::net::SocketAddr;

use tracing::{debug, warn};

use super::call::{CallRef, CallSession, Direction};
use crate::channel::ChannelEvent;
use crate::error::{Error, Result};
use crate::sched::TimerId;

/// How to treat a frame that matches no live call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindMode {
    /// Only look up
    PreventNew,
    /// Look up, create on a miss
    AllowNew,
    /// Always create (outbound calls)
    ForceNew,
}

/// What is left for the caller to clean up after a destroy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    pub call: CallRef,
    /// Probe timers the session held
    pub timers: Vec<TimerId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// Slot freed
    Destroyed(Released),
    /// A channel still owns the call; it has been told to hang up and the
    /// slot is freed once it detaches
    Deferred(Released),
    NotFound,
}

/// Fixed-capacity arena of calls.
///
/// Slot 0 is never used: a zero destination call number on the wire means
/// "not yet known".
pub struct SessionTable {
    slots: Vec<Option<CallSession>>,
    next_callno: usize,
    next_serial: u64,
    live: usize,
}

impl SessionTable {
    pub fn new(max_calls: usize) -> Self {
        let capacity = max_calls.clamp(2, crate::config::MAX_CALLS);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            next_callno: 0,
            next_serial: 0,
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn get(&self, callno: u16) -> Option<&CallSession> {
        self.slots.get(callno as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, callno: u16) -> Option<&mut CallSession> {
        self.slots.get_mut(callno as usize)?.as_mut()
    }

    /// The session `call` refers to, unless that call has since ended
    pub fn get_ref(&mut self, call: CallRef) -> Option<&mut CallSession> {
        self.get_mut(call.callno).filter(|s| s.serial == call.serial)
    }

    pub fn contains(&self, call: CallRef) -> bool {
        self.get(call.callno).is_some_and(|s| s.serial == call.serial)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallSession> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Find the call a frame from `addr` belongs to.
    ///
    /// A call matches when the address is the same and either the far
    /// end's call number is the frame's source, or the frame names our
    /// call number while the far end's is still unknown.
    pub fn find(&self, src_call: u16, dst_call: u16, addr: SocketAddr) -> Option<u16> {
        self.iter()
            .find(|s| {
                s.addr == addr
                    && (s.peer_callno == Some(src_call)
                        || (dst_call == s.callno && s.peer_callno.is_none()))
            })
            .map(|s| s.callno)
    }

    /// Look a call up and, depending on `mode`, allocate one.
    ///
    /// Returns the call number and whether it was newly created.
    pub fn find_or_create(
        &mut self,
        src_call: u16,
        dst_call: u16,
        addr: SocketAddr,
        mode: FindMode,
    ) -> Result<Option<(u16, bool)>> {
        if mode != FindMode::ForceNew {
            if let Some(callno) = self.find(src_call, dst_call, addr) {
                return Ok(Some((callno, false)));
            }
        }
        if mode == FindMode::PreventNew {
            return Ok(None);
        }
        let (peer_callno, direction) = match mode {
            FindMode::ForceNew => (None, Direction::Outbound),
            _ => (Some(src_call), Direction::Inbound),
        };
        let callno = self.create(addr, peer_callno, direction)?;
        Ok(Some((callno, true)))
    }

    /// Allocate the next free call number, scanning circularly from the
    /// last one handed out
    pub fn create(
        &mut self,
        addr: SocketAddr,
        peer_callno: Option<u16>,
        direction: Direction,
    ) -> Result<u16> {
        let capacity = self.slots.len();
        let mut candidate = self.next_callno;
        for _ in 1..capacity {
            candidate = candidate % (capacity - 1) + 1;
            if self.slots[candidate].is_none() {
                self.next_callno = candidate;
                self.next_serial += 1;
                let callno = candidate as u16;
                self.slots[candidate] = Some(CallSession::new(
                    callno,
                    self.next_serial,
                    addr,
                    peer_callno,
                    direction,
                ));
                self.live += 1;
                debug!("Allocated call {} for {}", callno, addr);
                return Ok(callno);
            }
        }
        warn!("Unable to accept more calls from {}", addr);
        Err(Error::NoFreeCallSlots)
    }

    /// Tear a call down, or hand it back to its channel if one owns it
    pub fn destroy(&mut self, callno: u16) -> DestroyOutcome {
        let Some(session) = self.get_mut(callno) else {
            return DestroyOutcome::NotFound;
        };
        let timers: Vec<TimerId> = [session.ping_timer.take(), session.lag_timer.take()]
            .into_iter()
            .flatten()
            .collect();
        let call = session.call_ref();

        if session.owner.is_some() {
            session.alreadygone = true;
            session.notify_owner(ChannelEvent::Hangup {
                cause: session.error,
            });
            debug!("Call {} still owned; waiting for the channel to hang up", call);
            return DestroyOutcome::Deferred(Released { call, timers });
        }

        self.slots[callno as usize] = None;
        self.live -= 1;
        debug!("Destroyed call {}", call);
        DestroyOutcome::Destroyed(Released { call, timers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelLink;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_allocation_skips_zero_and_wraps() {
        let mut table = SessionTable::new(4);
        assert_eq!(table.capacity(), 3);
        let a = table.create(addr(1), None, Direction::Outbound).unwrap();
        let b = table.create(addr(1), None, Direction::Outbound).unwrap();
        let c = table.create(addr(1), None, Direction::Outbound).unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
        assert!(matches!(
            table.create(addr(1), None, Direction::Outbound),
            Err(Error::NoFreeCallSlots)
        ));

        table.destroy(2);
        // Scanning resumes after the last number handed out
        assert_eq!(table.create(addr(1), None, Direction::Outbound).unwrap(), 2);
        table.destroy(1);
        assert_eq!(table.create(addr(1), None, Direction::Outbound).unwrap(), 1);
    }

    #[test]
    fn test_match_by_peer_callno_or_unset_dst() {
        let mut table = SessionTable::new(16);
        let (ours, created) = table
            .find_or_create(0, 0, addr(5036), FindMode::ForceNew)
            .unwrap()
            .unwrap();
        assert!(created);

        // Reply naming our call number while the far end is unknown
        assert_eq!(table.find(77, ours, addr(5036)), Some(ours));
        // Wrong address never matches
        assert_eq!(table.find(77, ours, addr(5037)), None);

        table.get_mut(ours).unwrap().peer_callno = Some(77);
        assert_eq!(table.find(77, 0, addr(5036)), Some(ours));
        assert_eq!(table.find(78, ours, addr(5036)), None);
    }

    #[test]
    fn test_prevent_new_does_not_allocate() {
        let mut table = SessionTable::new(16);
        assert_eq!(
            table
                .find_or_create(9, 0, addr(1), FindMode::PreventNew)
                .unwrap(),
            None
        );
        let (callno, created) = table
            .find_or_create(9, 0, addr(1), FindMode::AllowNew)
            .unwrap()
            .unwrap();
        assert!(created);
        assert_eq!(table.get(callno).unwrap().peer_callno, Some(9));
        let (again, created) = table
            .find_or_create(9, 0, addr(1), FindMode::AllowNew)
            .unwrap()
            .unwrap();
        assert_eq!((again, created), (callno, false));
    }

    #[test]
    fn test_owned_session_is_deferred() {
        let mut table = SessionTable::new(16);
        let callno = table.create(addr(1), Some(5), Direction::Inbound).unwrap();
        let (link, mut rx) = ChannelLink::pair();
        table.get_mut(callno).unwrap().owner = Some(link);

        assert!(matches!(table.destroy(callno), DestroyOutcome::Deferred(_)));
        let session = table.get(callno).unwrap();
        assert!(session.alreadygone);
        assert!(matches!(
            rx.try_recv(),
            Ok(ChannelEvent::Hangup { cause: None })
        ));

        table.get_mut(callno).unwrap().owner = None;
        assert!(matches!(table.destroy(callno), DestroyOutcome::Destroyed(_)));
        assert_eq!(table.destroy(callno), DestroyOutcome::NotFound);
        assert!(table.is_empty());
    }

    #[test]
    fn test_stale_ref_is_rejected() {
        let mut table = SessionTable::new(3);
        let first = table.create(addr(1), None, Direction::Outbound).unwrap();
        let stale = table.get(first).unwrap().call_ref();
        table.destroy(first);
        table.create(addr(1), None, Direction::Outbound).unwrap();
        let reused = table.create(addr(1), None, Direction::Outbound).unwrap();
        assert_eq!(reused, first);
        assert!(table.get_ref(stale).is_none());
        assert!(!table.contains(stale));
    }

    proptest! {
        #[test]
        fn live_call_numbers_are_unique(ops in proptest::collection::vec(any::<(bool, u8)>(), 1..200)) {
            let mut table = SessionTable::new(32);
            for (create, pick) in ops {
                if create {
                    let _ = table.create(addr(1), None, Direction::Outbound);
                } else {
                    let live: Vec<u16> = table.iter().map(|s| s.callno).collect();
                    if !live.is_empty() {
                        table.destroy(live[pick as usize % live.len()]);
                    }
                }
                let numbers: Vec<u16> = table.iter().map(|s| s.callno).collect();
                let unique: HashSet<u16> = numbers.iter().copied().collect();
                prop_assert_eq!(numbers.len(), unique.len());
                prop_assert_eq!(numbers.len(), table.len());
                prop_assert!(!unique.contains(&0));
            }
        }
    }
}
