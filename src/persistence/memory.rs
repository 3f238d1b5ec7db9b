// src/persistence/memory.rs
//
// In-memory reference sink. Clones share one store, so a caller can keep
// a handle and query the log while the pipeline owns the other clone.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Ack, EventSink};
use crate::error::WriteError;
use crate::types::{Event, EventKey, FrameStats, StatBucket};

#[derive(Debug, Default)]
struct MemoryStore {
    events: Vec<Event>,
    keys: HashSet<EventKey>,
    buckets: BTreeMap<u64, StatBucket>,
    frame_stats: BTreeMap<u64, FrameStats>,
    /// Errors returned by the next operations, in order
    injected: VecDeque<WriteError>,
    flushes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStore> {
        // A panicked writer cannot leave a half-applied record behind
        match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn take_injected(store: &mut MemoryStore) -> Result<(), WriteError> {
        match store.injected.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Make the next operations fail with these errors, one per call.
    pub fn inject_failures(&self, errors: Vec<WriteError>) {
        self.lock().injected.extend(errors);
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn event_keys(&self) -> HashSet<EventKey> {
        self.lock().keys.clone()
    }

    pub fn buckets(&self) -> Vec<StatBucket> {
        self.lock().buckets.values().cloned().collect()
    }

    pub fn frame_stats(&self) -> Vec<FrameStats> {
        self.lock().frame_stats.values().cloned().collect()
    }

    pub fn flush_count(&self) -> u64 {
        self.lock().flushes
    }
}

impl EventSink for MemorySink {
    fn append(&mut self, event: &Event) -> Result<Ack, WriteError> {
        let mut store = self.lock();
        Self::take_injected(&mut store)?;
        if !store.keys.insert(event.key()) {
            return Ok(Ack::Duplicate);
        }
        store.events.push(event.clone());
        Ok(Ack::Written)
    }

    fn write_bucket(&mut self, bucket: &StatBucket) -> Result<Ack, WriteError> {
        let mut store = self.lock();
        Self::take_injected(&mut store)?;
        if store.buckets.contains_key(&bucket.bucket_start_ms) {
            return Ok(Ack::Duplicate);
        }
        store.buckets.insert(bucket.bucket_start_ms, bucket.clone());
        Ok(Ack::Written)
    }

    fn write_frame_stats(&mut self, stats: &FrameStats) -> Result<Ack, WriteError> {
        let mut store = self.lock();
        Self::take_injected(&mut store)?;
        if store.frame_stats.contains_key(&stats.frame_number) {
            return Ok(Ack::Duplicate);
        }
        store.frame_stats.insert(stats.frame_number, stats.clone());
        Ok(Ack::Written)
    }

    fn flush(&mut self) -> Result<(), WriteError> {
        let mut store = self.lock();
        Self::take_injected(&mut store)?;
        store.flushes += 1;
        Ok(())
    }
}
