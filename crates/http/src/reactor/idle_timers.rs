//! Per-slot idle timers.
//!
//! Every pool slot owns at most one deadline. Restarting a timer only moves the
//! slot's deadline; the heap keeps at most one live entry per slot and an entry
//! that pops before the slot's current deadline is simply queued again. This
//! keeps restarts (one per successful read or write) allocation free.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

#[derive(Debug)]
pub(crate) struct IdleTimers {
    heap: BinaryHeap<Reverse<(Instant, usize)>>,
    /// Current deadline of each slot, `None` when the timer is stopped
    deadlines: Vec<Option<Instant>>,
    /// Deadline of the heap entry a slot currently has, if any
    queued: Vec<Option<Instant>>,
}

impl IdleTimers {
    pub(crate) fn new(slots: usize) -> Self {
        Self { heap: BinaryHeap::with_capacity(slots), deadlines: vec![None; slots], queued: vec![None; slots] }
    }

    /// Starts or restarts the timer of `slot`.
    pub(crate) fn arm(&mut self, slot: usize, deadline: Instant) {
        self.deadlines[slot] = Some(deadline);
        match self.queued[slot] {
            Some(queued) if queued <= deadline => {}
            _ => {
                self.heap.push(Reverse((deadline, slot)));
                self.queued[slot] = Some(deadline);
            }
        }
    }

    pub(crate) fn disarm(&mut self, slot: usize) {
        self.deadlines[slot] = None;
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self, slot: usize) -> bool {
        self.deadlines[slot].is_some()
    }

    /// Earliest instant something may expire. May be earlier than the real
    /// next expiry; waking up early is harmless.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Collects every slot whose deadline is at or before `now` into `expired`
    /// and stops their timers.
    pub(crate) fn expire(&mut self, now: Instant, expired: &mut Vec<usize>) {
        while let Some(Reverse((deadline, slot))) = self.heap.peek().copied() {
            if deadline > now {
                break;
            }
            self.heap.pop();

            // a stale duplicate left behind by an earlier re-queue
            if self.queued[slot] != Some(deadline) {
                continue;
            }
            self.queued[slot] = None;

            match self.deadlines[slot] {
                Some(current) if current <= now => {
                    self.deadlines[slot] = None;
                    expired.push(slot);
                }
                Some(current) => {
                    self.heap.push(Reverse((current, slot)));
                    self.queued[slot] = Some(current);
                }
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn expires_once() {
        let start = Instant::now();
        let mut timers = IdleTimers::new(4);
        timers.arm(1, start + Duration::from_secs(1));

        let mut expired = Vec::new();
        timers.expire(start, &mut expired);
        assert!(expired.is_empty());

        timers.expire(start + Duration::from_secs(1), &mut expired);
        assert_eq!(expired, vec![1]);
        assert!(!timers.is_armed(1));

        expired.clear();
        timers.expire(start + Duration::from_secs(10), &mut expired);
        assert!(expired.is_empty());
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn restart_pushes_expiry_back() {
        let start = Instant::now();
        let mut timers = IdleTimers::new(2);
        timers.arm(0, start + Duration::from_secs(1));
        timers.arm(0, start + Duration::from_secs(3));

        let mut expired = Vec::new();
        timers.expire(start + Duration::from_secs(2), &mut expired);
        assert!(expired.is_empty());
        assert!(timers.is_armed(0));
        assert_eq!(timers.next_deadline(), Some(start + Duration::from_secs(3)));

        timers.expire(start + Duration::from_secs(3), &mut expired);
        assert_eq!(expired, vec![0]);
    }

    #[test]
    fn disarmed_timer_never_fires() {
        let start = Instant::now();
        let mut timers = IdleTimers::new(2);
        timers.arm(0, start + Duration::from_secs(1));
        timers.disarm(0);

        let mut expired = Vec::new();
        timers.expire(start + Duration::from_secs(5), &mut expired);
        assert!(expired.is_empty());
    }

    #[test]
    fn earlier_rearm_is_honoured() {
        let start = Instant::now();
        let mut timers = IdleTimers::new(2);
        timers.arm(0, start + Duration::from_secs(10));
        timers.disarm(0);
        timers.arm(0, start + Duration::from_secs(1));

        let mut expired = Vec::new();
        timers.expire(start + Duration::from_secs(1), &mut expired);
        assert_eq!(expired, vec![0]);

        // the entry queued for the first deadline is stale now
        expired.clear();
        timers.expire(start + Duration::from_secs(10), &mut expired);
        assert!(expired.is_empty());
    }

    #[test]
    fn slots_expire_in_deadline_order() {
        let start = Instant::now();
        let mut timers = IdleTimers::new(3);
        timers.arm(2, start + Duration::from_secs(2));
        timers.arm(0, start + Duration::from_secs(3));
        timers.arm(1, start + Duration::from_secs(1));

        let mut expired = Vec::new();
        timers.expire(start + Duration::from_secs(5), &mut expired);
        assert_eq!(expired, vec![1, 2, 0]);
    }
}
