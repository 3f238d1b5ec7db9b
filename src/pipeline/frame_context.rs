// src/pipeline/frame_context.rs
//
// Everything one frame produced, in processing order. The orchestrator
// fills it stage by stage and returns it once the frame is committed, so
// callers and tests read a single consistent view of the frame.

use crate::analysis::track_confirmation::EvictedTrack;
use crate::types::{ConfirmedDetection, Event, FrameStats, StatBucket};

#[derive(Debug, Clone, Default)]
pub struct FrameContext {
    pub frame_number: u64,
    pub timestamp_ms: f64,
    /// Same frame number as the last committed frame
    pub is_replay: bool,

    // Intake
    pub raw_detections: usize,
    pub filtered_detections: usize,

    // Confirmation
    pub confirmed: Vec<ConfirmedDetection>,
    pub newly_confirmed: Vec<u64>,
    pub evicted: Vec<EvictedTrack>,

    // Zones
    pub inside_any_zone: u64,
    /// Events acknowledged by the sink for this frame
    pub events: Vec<Event>,
    pub duplicates_suppressed: usize,

    // Statistics
    pub frame_stats: Option<FrameStats>,
    pub closed_bucket: Option<StatBucket>,
}

impl FrameContext {
    pub fn new(frame_number: u64, timestamp_ms: f64) -> Self {
        Self {
            frame_number,
            timestamp_ms,
            ..Default::default()
        }
    }

    pub fn zone_enters(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == crate::types::EventType::Enter)
            .count()
    }

    pub fn zone_exits(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == crate::types::EventType::Exit)
            .count()
    }

    pub fn line_crossings(&self) -> usize {
        self.events.iter().filter(|e| e.event_type.is_crossing()).count()
    }
}
