// src/pipeline/event_bus.rs
//
// Notification bus. Components publish what happened on a frame; the
// runner drains it after every frame and hands it to an observer.
// Notifications only; the durable event log goes through the sink.

use std::collections::VecDeque;
use tracing::warn;

use crate::pipeline::orchestrator::RunState;
use crate::types::{Event, EventKey, StatBucket};

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    IdentityConfirmed {
        confirmed_id: u64,
        raw_track_id: i64,
        frame_number: u64,
    },

    IdentityEvicted {
        raw_track_id: i64,
        confirmed_id: Option<u64>,
        frame_number: u64,
    },

    EventPersisted(Event),

    DuplicateSuppressed {
        key: EventKey,
    },

    BucketClosed(StatBucket),

    StateChanged {
        from: RunState,
        to: RunState,
    },
}

pub struct EventBus {
    events: VecDeque<PipelineEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending.min(1024)),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        if self.max_pending == 0 {
            return;
        }
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} notifications), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evicted(raw: i64) -> PipelineEvent {
        PipelineEvent::IdentityEvicted {
            raw_track_id: raw,
            confirmed_id: None,
            frame_number: 1,
        }
    }

    #[test]
    fn test_drain_in_publish_order() {
        let mut bus = EventBus::new(8);
        bus.publish(evicted(1));
        bus.publish(evicted(2));
        let drained = bus.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(
            drained[0],
            PipelineEvent::IdentityEvicted { raw_track_id: 1, .. }
        ));
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut bus = EventBus::new(2);
        for raw in 1..=3 {
            bus.publish(evicted(raw));
        }
        let drained = bus.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(
            drained[0],
            PipelineEvent::IdentityEvicted { raw_track_id: 2, .. }
        ));
    }
}
