//! Deferred callbacks scheduled against the authoritative clock.
//!
//! Timers never block and are never interrupted. A timer that should no
//! longer apply is cancelled by clearing the guard its payload checks when it
//! fires (for example, an entity-side token), so firing a stale timer is a
//! no-op rather than an error.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::time::SimTime;

/// Handle returned by [`TimerQueue::schedule`]. Unique per queue, usable as a
/// guard token.
pub type TimerId = u64;

#[derive(Debug, Clone)]
struct Scheduled<T> {
    fire_at: SimTime,
    id: TimerId,
    payload: T,
}

impl<T> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Scheduled<T> {}

impl<T> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Scheduled<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .total_cmp(&other.fire_at)
            .then(self.id.cmp(&other.id))
    }
}

/// Priority queue of payloads keyed by fire time, FIFO among equal times.
#[derive(Debug, Clone)]
pub struct TimerQueue<T> {
    heap: BinaryHeap<Reverse<Scheduled<T>>>,
    next_id: TimerId,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_id: 1,
        }
    }

    /// Schedule `payload` to fire at `fire_at`.
    pub fn schedule(&mut self, fire_at: SimTime, payload: T) -> TimerId {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.heap.push(Reverse(Scheduled {
            fire_at,
            id,
            payload,
        }));
        id
    }

    /// Pop the earliest payload whose fire time is `<= now`.
    pub fn pop_due(&mut self, now: SimTime) -> Option<(TimerId, T)> {
        let due = self.heap.peek().is_some_and(|Reverse(s)| s.fire_at <= now);
        if !due {
            return None;
        }
        self.heap.pop().map(|Reverse(s)| (s.id, s.payload))
    }

    /// Keep only the pending timers whose payload satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.heap.retain(|Reverse(s)| keep(&s.payload));
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
