//! Deadline-ordered timer queue
//!
//! Drives every delayed action in the engine: ping and lag probes,
//! retransmissions and jitter-buffered deliveries. The network task asks
//! for [`Scheduler::next_deadline`] to size its sleep, then [`Scheduler::poll`]s
//! whatever has come due.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

pub type TimerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimerKey {
    execute_at: Instant,
    id: TimerId,
}

pub struct Scheduler<T> {
    tasks: BTreeMap<TimerKey, T>,
    index: HashMap<TimerId, Instant>,
    last_id: TimerId,
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            index: HashMap::new(),
            last_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run `task` once `delay` has passed since `now`
    pub fn schedule(&mut self, now: Instant, delay: Duration, task: T) -> TimerId {
        self.schedule_at(now + delay, task)
    }

    pub fn schedule_at(&mut self, execute_at: Instant, task: T) -> TimerId {
        self.last_id += 1;
        let id = self.last_id;
        self.tasks.insert(TimerKey { execute_at, id }, task);
        self.index.insert(id, execute_at);
        id
    }

    /// Remove a pending task. Cancelling a fired or unknown id returns `None`.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let execute_at = self.index.remove(&id)?;
        self.tasks.remove(&TimerKey { execute_at, id })
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.keys().next().map(|key| key.execute_at)
    }

    /// Take every task due at or before `now`, earliest first
    pub fn poll(&mut self, now: Instant) -> Vec<(TimerId, T)> {
        let mut due = Vec::new();
        while let Some(entry) = self.tasks.first_entry() {
            if entry.key().execute_at > now {
                break;
            }
            let id = entry.key().id;
            let task = entry.remove();
            self.index.remove(&id);
            due.push((id, task));
        }
        due
    }

    /// Drop every task matching the predicate
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        let index = &mut self.index;
        self.tasks.retain(|key, task| {
            let kept = keep(task);
            if !kept {
                index.remove(&key.id);
            }
            kept
        });
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_and_cancel() {
        let mut sched = Scheduler::new();
        let now = Instant::now();
        let id = sched.schedule_at(now, "task1");
        assert_eq!(id, 1);
        assert!(sched.is_pending(id));
        assert_eq!(sched.cancel(id), Some("task1"));
        assert_eq!(sched.cancel(id), None);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_poll_returns_due_tasks_in_order() {
        let mut sched = Scheduler::new();
        let now = Instant::now();
        sched.schedule(now, Duration::from_millis(30), "c");
        sched.schedule(now, Duration::from_millis(10), "a");
        sched.schedule(now, Duration::from_millis(20), "b");
        sched.schedule(now, Duration::from_secs(5), "late");

        assert_eq!(sched.next_deadline(), Some(now + Duration::from_millis(10)));
        assert!(sched.poll(now).is_empty());

        let due: Vec<_> = sched
            .poll(now + Duration::from_millis(30))
            .into_iter()
            .map(|(_, t)| t)
            .collect();
        assert_eq!(due, vec!["a", "b", "c"]);
        assert_eq!(sched.len(), 1);
    }

    #[test]
    fn test_same_deadline_keeps_both() {
        let mut sched = Scheduler::new();
        let now = Instant::now();
        sched.schedule_at(now, 1);
        sched.schedule_at(now, 2);
        assert_eq!(sched.len(), 2);
        assert_eq!(sched.poll(now).len(), 2);
    }

    #[test]
    fn test_retain() {
        let mut sched = Scheduler::new();
        let now = Instant::now();
        let keep = sched.schedule_at(now, 1);
        let drop = sched.schedule_at(now, 2);
        sched.retain(|t| *t != 2);
        assert!(sched.is_pending(keep));
        assert!(!sched.is_pending(drop));
    }
}
