//! Deadline bookkeeping for the cooperative event loop (`spec.md` §5, §9).
//!
//! The shell doesn't run its own clock or thread; it just tracks, per
//! [`TimerId`], when that timer is next due, and the hosting binary calls
//! [`TimerWheel::due_before`] on its own schedule to find out what fired.
//! This mirrors the teacher's `reorder_deadlines` map rather than a true
//! wheel: `TimerId` already partitions by kind and scope, so a flat map
//! keyed on it is enough.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use warden_kernel::{TimerId, TimerKind};

/// Number of distinct [`TimerKind`] variants, used only to size the map's
/// initial capacity (one slot per global timer plus a handful of scoped
/// ones is the common case).
pub const K_KIND_COUNT: usize = 13;

#[derive(Debug, Default)]
pub struct TimerWheel {
    deadlines: HashMap<TimerId, Instant>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self {
            deadlines: HashMap::with_capacity(K_KIND_COUNT),
        }
    }

    /// Schedules `id` to fire `after` from `now`, replacing any existing
    /// deadline for the same id.
    pub fn set(&mut self, id: TimerId, now: Instant, after: Duration) {
        self.deadlines.insert(id, now + after);
    }

    pub fn cancel(&mut self, id: TimerId) {
        self.deadlines.remove(&id);
    }

    pub fn is_set(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    /// Every timer whose deadline is at or before `now`, removed from the
    /// wheel so the caller must re-`set` recurring ones itself.
    pub fn due_before(&mut self, now: Instant) -> Vec<TimerId> {
        let due: Vec<TimerId> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            self.deadlines.remove(id);
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::ReplicaId;

    #[test]
    fn a_timer_fires_once_its_deadline_passes() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let id = TimerId::global(TimerKind::PrePrepare);
        wheel.set(id, now, Duration::from_millis(10));
        assert!(wheel.due_before(now).is_empty());
        assert_eq!(wheel.due_before(now + Duration::from_millis(20)), vec![id]);
    }

    #[test]
    fn a_fired_timer_is_not_due_again_until_reset() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let id = TimerId::scoped(TimerKind::Retrans, ReplicaId::new(2));
        wheel.set(id, now, Duration::from_millis(5));
        let fired = wheel.due_before(now + Duration::from_millis(10));
        assert_eq!(fired, vec![id]);
        assert!(wheel.due_before(now + Duration::from_millis(20)).is_empty());
    }

    #[test]
    fn cancel_prevents_a_future_fire() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let id = TimerId::global(TimerKind::SuspectVc);
        wheel.set(id, now, Duration::from_millis(5));
        wheel.cancel(id);
        assert!(!wheel.is_set(id));
        assert!(wheel.due_before(now + Duration::from_millis(20)).is_empty());
    }
}
