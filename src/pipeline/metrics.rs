// src/pipeline/metrics.rs
//
// Live counters for a run. Clones share the same atomics, so a RunHandle
// on another thread can read progress while the processor writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub replayed_frames: Arc<AtomicU64>,
    pub raw_detections: Arc<AtomicU64>,
    pub filtered_detections: Arc<AtomicU64>,
    pub confirmations: Arc<AtomicU64>,
    pub evictions: Arc<AtomicU64>,
    pub zone_enters: Arc<AtomicU64>,
    pub zone_exits: Arc<AtomicU64>,
    pub line_crossings: Arc<AtomicU64>,
    pub duplicates_suppressed: Arc<AtomicU64>,
    pub sink_retries: Arc<AtomicU64>,
    pub last_frame_number: Arc<AtomicU64>,
    pub frame_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            replayed_frames: Arc::new(AtomicU64::new(0)),
            raw_detections: Arc::new(AtomicU64::new(0)),
            filtered_detections: Arc::new(AtomicU64::new(0)),
            confirmations: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
            zone_enters: Arc::new(AtomicU64::new(0)),
            zone_exits: Arc::new(AtomicU64::new(0)),
            line_crossings: Arc::new(AtomicU64::new(0)),
            duplicates_suppressed: Arc::new(AtomicU64::new(0)),
            sink_retries: Arc::new(AtomicU64::new(0)),
            last_frame_number: Arc::new(AtomicU64::new(0)),
            frame_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set(&self, counter: &AtomicU64, value: u64) {
        counter.store(value, Ordering::Relaxed);
    }

    /// Processing rate in frames per wall-clock second.
    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            replayed_frames: self.replayed_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            raw_detections: self.raw_detections.load(Ordering::Relaxed),
            filtered_detections: self.filtered_detections.load(Ordering::Relaxed),
            confirmations: self.confirmations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            zone_enters: self.zone_enters.load(Ordering::Relaxed),
            zone_exits: self.zone_exits.load(Ordering::Relaxed),
            line_crossings: self.line_crossings.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            sink_retries: self.sink_retries.load(Ordering::Relaxed),
            last_frame_number: self.last_frame_number.load(Ordering::Relaxed),
            last_frame_us: self.frame_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub replayed_frames: u64,
    pub fps: f64,
    pub raw_detections: u64,
    pub filtered_detections: u64,
    pub confirmations: u64,
    pub evictions: u64,
    pub zone_enters: u64,
    pub zone_exits: u64,
    pub line_crossings: u64,
    pub duplicates_suppressed: u64,
    pub sink_retries: u64,
    pub last_frame_number: u64,
    pub last_frame_us: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = PipelineMetrics::new();
        let reader = metrics.clone();
        metrics.inc(&metrics.total_frames);
        metrics.add(&metrics.zone_enters, 3);
        let summary = reader.summary();
        assert_eq!(summary.total_frames, 1);
        assert_eq!(summary.zone_enters, 3);
    }
}
