//! Cancelable delayed-task queue.
//!
//! Timers here never fire on their own. The owner asks for the keys that
//! are due with [`TimerQueue::fire_due`] and handles them inline, so a
//! timer callback can never interleave with another mutation of the same
//! state. Scheduling a key that is already pending replaces its deadline,
//! which is exactly what a trailing debounce needs.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Slot {
    deadline: Instant,
    seq: u64,
}

/// A set of pending timers keyed by `K`.
#[derive(Debug, Clone)]
pub struct TimerQueue<K> {
    slots: HashMap<K, Slot>,
    next_seq: u64,
}

impl<K: Eq + Hash + Clone> TimerQueue<K> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Schedules `key` to fire at `deadline`.
    ///
    /// Returns true if a pending timer with the same key was replaced.
    pub fn schedule(&mut self, key: K, deadline: Instant) -> bool {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(key, Slot { deadline, seq }).is_some()
    }

    /// Schedules `key` only if it isn't already pending.
    pub fn schedule_if_absent(&mut self, key: K, deadline: Instant) -> bool {
        if self.slots.contains_key(&key) {
            return false;
        }
        self.schedule(key, deadline);
        true
    }

    /// Cancels a pending timer. Returns true if one was pending.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.slots.remove(key).is_some()
    }

    /// Cancels every pending timer whose key matches the predicate.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let before = self.slots.len();
        self.slots.retain(|key, _| !predicate(key));
        before - self.slots.len()
    }

    /// Cancels everything. Returns how many timers were pending.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.slots.len();
        self.slots.clear();
        count
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.slots.get(key).map(|slot| slot.deadline)
    }

    /// Number of timers matching the predicate.
    pub fn count_where(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        self.slots.keys().filter(|key| predicate(key)).count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().map(|slot| slot.deadline).min()
    }

    /// Removes and returns every key whose deadline is at or before `now`.
    ///
    /// Keys come back ordered by deadline; timers with equal deadlines keep
    /// the order they were scheduled in.
    pub fn fire_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(K, Slot)> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.deadline <= now)
            .map(|(key, slot)| (key.clone(), *slot))
            .collect();

        if due.is_empty() {
            return Vec::new();
        }

        due.sort_by(|a, b| a.1.deadline.cmp(&b.1.deadline).then(a.1.seq.cmp(&b.1.seq)));
        for (key, _) in &due {
            self.slots.remove(key);
        }
        due.into_iter().map(|(key, _)| key).collect()
    }
}

impl<K: Eq + Hash + Clone> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
