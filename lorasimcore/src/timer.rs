//! Virtual clock and delayed event delivery.
//!
//! [`Scheduler`] is both the simulation's global event queue and, in tests, a fake
//! clock that is advanced by hand. Events fire in nondecreasing time order and
//! events scheduled for the same instant fire in the order they were scheduled.
//! A cancelled event is never returned by [`Scheduler::pop_next`].

use std::collections::{BinaryHeap, HashSet};

use serde::{Deserialize, Serialize};

use crate::units::Time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerHandle(u64);

/// Minimal timer interface the MAC is written against.
pub trait Timer {
    type Event;

    fn now(&self) -> Time;
    fn schedule_after(&mut self, delay: Time, event: Self::Event) -> TimerHandle;

    /// Cancelling an event that already fired or was already cancelled does nothing.
    fn cancel(&mut self, handle: TimerHandle);
    fn is_pending(&self, handle: TimerHandle) -> bool;
}

#[derive(Debug, Clone)]
struct Scheduled<E> {
    time: Time,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap pops the earliest event first.
impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler<E> {
    now: Time,
    next_seq: u64,
    queue: BinaryHeap<Scheduled<E>>,
    pending: HashSet<u64>,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            now: Time::ZERO,
            next_seq: 0,
            queue: BinaryHeap::new(),
            pending: HashSet::new(),
        }
    }

    pub fn now(&self) -> Time {
        self.now
    }

    /// Events in the past are delivered at the current time.
    pub fn schedule_at(&mut self, time: Time, event: E) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.queue.push(Scheduled {
            time: time.max(self.now),
            seq,
            event,
        });
        self.pending.insert(seq);

        TimerHandle(seq)
    }

    /// Removes the next live event and advances the clock to its time.
    pub fn pop_next(&mut self) -> Option<(Time, E)> {
        while let Some(item) = self.queue.pop() {
            if self.pending.remove(&item.seq) {
                self.now = item.time;
                return Some((item.time, item.event));
            }
        }

        None
    }

    /// Time of the next live event.
    pub fn peek_time(&mut self) -> Option<Time> {
        while let Some(item) = self.queue.peek() {
            if self.pending.contains(&item.seq) {
                return Some(item.time);
            }
            self.queue.pop();
        }

        None
    }

    /// Number of events that have not fired or been cancelled.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Moves the clock forward without firing anything, for driving the scheduler
    /// as a fake clock. Fire the events due before `time` first.
    pub fn advance_to(&mut self, time: Time) {
        self.now = self.now.max(time);
    }

    /// Drops every pending event without firing it.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.pending.clear();
    }
}

impl<E> Timer for Scheduler<E> {
    type Event = E;

    fn now(&self) -> Time {
        self.now
    }

    fn schedule_after(&mut self, delay: Time, event: E) -> TimerHandle {
        self.schedule_at(self.now + delay, event)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.pending.remove(&handle.0);
    }

    fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.contains(&handle.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::SECONDS;

    #[test]
    fn fires_in_time_order() {
        let mut timer = Scheduler::new();
        timer.schedule_after(3.0 * SECONDS, "c");
        timer.schedule_after(1.0 * SECONDS, "a");
        timer.schedule_after(2.0 * SECONDS, "b");

        let order: Vec<_> = std::iter::from_fn(|| timer.pop_next().map(|x| x.1)).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(timer.now(), 3.0 * SECONDS);
    }

    #[test]
    fn ties_fire_in_insertion_order() {
        let mut timer = Scheduler::new();
        for n in 0..10 {
            timer.schedule_after(1.0 * SECONDS, n);
        }

        let order: Vec<_> = std::iter::from_fn(|| timer.pop_next().map(|x| x.1)).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn cancelled_never_fires() {
        let mut timer = Scheduler::new();
        let a = timer.schedule_after(1.0 * SECONDS, "a");
        timer.schedule_after(2.0 * SECONDS, "b");

        assert!(timer.is_pending(a));
        timer.cancel(a);
        assert!(!timer.is_pending(a));
        assert_eq!(timer.len(), 1);
        assert_eq!(timer.peek_time(), Some(2.0 * SECONDS));
        assert_eq!(timer.pop_next(), Some((2.0 * SECONDS, "b")));
        assert_eq!(timer.pop_next(), None);
    }

    #[test]
    fn fired_handle_not_pending() {
        let mut timer = Scheduler::new();
        let a = timer.schedule_after(1.0 * SECONDS, ());
        timer.pop_next();
        assert!(!timer.is_pending(a));

        // no effect
        timer.cancel(a);
        assert!(timer.is_empty());
    }
}
