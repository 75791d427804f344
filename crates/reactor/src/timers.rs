// Chunk: docs/chunks/secondary_loop - mio-backed secondary event loop
//! Timer heap with lazy deletion.
//!
//! Deadlines live in a min-heap keyed by `(deadline, seq)`, so timers with the
//! same deadline fire in the order they were armed. Cancelling a timer only
//! removes its slot; the stale heap entry is skipped when it surfaces.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::EventLoop;

/// Identifies an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// A timer's callback, one-shot or repeating.
pub(crate) enum TimerCallback {
    Once(Box<dyn FnOnce(&EventLoop) + Send>),
    Repeat {
        callback: Box<dyn FnMut(&EventLoop) + Send>,
        period: Duration,
    },
}

struct Slot {
    seq: u64,
    callback: TimerCallback,
}

#[derive(Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<Reverse<(Instant, u64, TimerId)>>,
    slots: HashMap<TimerId, Slot>,
    /// Repeating timers whose callback is currently running
    in_flight: HashSet<TimerId>,
    next_id: u64,
    next_seq: u64,
}

impl TimerHeap {
    pub fn insert(&mut self, deadline: Instant, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.arm(id, deadline, callback);
        id
    }

    fn arm(&mut self, id: TimerId, deadline: Instant, callback: TimerCallback) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((deadline, seq, id)));
        self.slots.insert(id, Slot { seq, callback });
    }

    /// Re-arms a repeating timer after its callback ran.
    ///
    /// Does nothing if the timer was cleared while its callback was running.
    pub fn rearm(&mut self, id: TimerId, deadline: Instant, callback: TimerCallback) {
        if self.in_flight.remove(&id) {
            self.arm(id, deadline, callback);
        }
    }

    /// Cancels a timer. Returns false if it was unknown or already fired.
    pub fn remove(&mut self, id: TimerId) -> bool {
        self.slots.remove(&id).is_some() || self.in_flight.remove(&id)
    }

    /// Earliest live deadline, discarding stale heap entries on the way.
    pub fn earliest(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, seq, id))) = self.heap.peek().copied() {
            if self.is_live(id, seq) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Removes and returns every timer due at `now`, in firing order.
    ///
    /// Repeating timers are marked in flight until [`TimerHeap::rearm`].
    pub fn take_due(&mut self, now: Instant) -> Vec<(TimerId, TimerCallback)> {
        let mut due = Vec::new();
        while let Some(Reverse((deadline, seq, id))) = self.heap.peek().copied() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            if !self.is_live(id, seq) {
                continue;
            }
            if let Some(slot) = self.slots.remove(&id) {
                if matches!(slot.callback, TimerCallback::Repeat { .. }) {
                    self.in_flight.insert(id);
                }
                due.push((id, slot.callback));
            }
        }
        due
    }

    /// Number of armed timers, counting repeating timers that are running.
    pub fn len(&self) -> usize {
        self.slots.len() + self.in_flight.len()
    }

    fn is_live(&self, id: TimerId, seq: u64) -> bool {
        self.slots.get(&id).is_some_and(|slot| slot.seq == seq)
    }
}
