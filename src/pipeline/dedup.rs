// src/pipeline/dedup.rs
//
// Bounded set of recently emitted event keys. Stops a reprocessed frame
// from handing the same event to the sink twice; the sink's own key
// check covers anything older than the window.

use std::collections::{HashSet, VecDeque};

use crate::types::EventKey;

const DEFAULT_CAPACITY: usize = 4096;

pub struct EventDeduplicator {
    order: VecDeque<EventKey>,
    seen: HashSet<EventKey>,
    capacity: usize,
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl EventDeduplicator {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            seen: HashSet::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
        }
    }

    pub fn contains(&self, key: &EventKey) -> bool {
        self.seen.contains(key)
    }

    /// Remember a key. Returns false if it was already known.
    pub fn remember(&mut self, key: EventKey) -> bool {
        if self.capacity == 0 || self.seen.contains(&key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
