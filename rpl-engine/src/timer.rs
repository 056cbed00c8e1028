//! Timer wheel: the engine's only notion of "a timer fired" is an event it
//! scheduled on itself and later pulls back off this queue — there is no
//! `threading.Timer` owned by a `Dodag`.
//!
//! The queue has no cancellation API. Trickle and DAO-ACK retry events
//! therefore carry a per-DODAG generation counter; the engine bumps it
//! whenever it reschedules, and firings whose generation has gone stale are
//! silently dropped. The DAO-delay timer needs no such tag: it is gated by a
//! single `armed` flag per DODAG, matching the original's "ignore new calls
//! while armed" behavior, and only one can ever be outstanding.

use rpl_dodag::DodagHandle;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    DisBroadcast,
    TrickleFire(DodagHandle, u64),
    TrickleIntervalEnd(DodagHandle, u64),
    DaoDelay(DodagHandle),
    DaoAckRetry(DodagHandle, u64),
}

#[derive(Debug)]
struct Scheduled {
    at: Instant,
    seq: u64,
    event: TimerEvent,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for Scheduled {}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so a max-heap (BinaryHeap's default) behaves as a min-heap
        // ordered by deadline, with insertion order breaking ties.
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct TimerWheel {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new(), next_seq: 0 }
    }

    pub fn schedule_at(&mut self, at: Instant, event: TimerEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled { at, seq, event });
    }

    pub fn schedule_after(&mut self, delay: Duration, event: TimerEvent) {
        self.schedule_at(Instant::now() + delay, event);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|s| s.at)
    }

    /// Pop the earliest-scheduled event if its deadline has passed.
    pub fn pop_due(&mut self) -> Option<TimerEvent> {
        if self.next_deadline().map(|d| d <= Instant::now()).unwrap_or(false) {
            self.heap.pop().map(|s| s.event)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_deadline_order_regardless_of_schedule_order() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        wheel.schedule_at(now + Duration::from_millis(20), TimerEvent::DisBroadcast);
        wheel.schedule_at(now + Duration::from_millis(5), TimerEvent::DisBroadcast);
        assert_eq!(wheel.next_deadline(), Some(now + Duration::from_millis(5)));
    }

    #[test]
    fn nothing_pops_before_its_deadline() {
        let mut wheel = TimerWheel::new();
        wheel.schedule_after(Duration::from_secs(60), TimerEvent::DisBroadcast);
        assert!(wheel.pop_due().is_none());
    }
}
