use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::InputError;
use crate::geometry::Point;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub video: VideoConfig,
    pub confirmation: ConfirmationConfig,
    pub filter: FilterConfig,
    pub statistics: StatisticsConfig,
    pub dedup: DedupConfig,
    pub persistence: PersistenceConfig,
    pub runner: RunnerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Frames per second of the analysed video; converts frame numbers to time
    pub fps: f64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self { fps: 30.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Consecutive frames a raw id must be seen before it gets a stable id
    pub confirm_hits: u32,
    /// Consecutive missed frames tolerated before the raw id is forgotten
    pub max_missed_frames: u32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            confirm_hits: 5,
            max_missed_frames: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Class labels to keep. Empty keeps everything.
    pub classes: Vec<String>,
    pub min_confidence: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            classes: Vec::new(),
            min_confidence: 0.0,
        }
    }
}

impl FilterConfig {
    pub fn accepts(&self, detection: &RawDetection) -> bool {
        if detection.confidence < self.min_confidence {
            return false;
        }
        self.classes.is_empty() || self.classes.iter().any(|c| *c == detection.class_label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Width of a statistics bucket in seconds of video time
    pub bucket_seconds: u64,
    /// Also hand one row per committed frame to the sink
    pub write_frame_stats: bool,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            bucket_seconds: 60,
            write_frame_stats: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Recently emitted event keys remembered by the deduplicator
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub output_dir: String,
    /// Fixed analysis id; a fresh UUID v4 is generated when unset
    pub analysis_id: Option<String>,
    pub retry: RetryConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            output_dir: "output".to_string(),
            analysis_id: None,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            backoff_multiplier: 2.0,
            max_backoff_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Frame batches buffered between the feed thread and the processor
    pub queue_capacity: usize,
    pub timeout_secs: Option<u64>,
    /// How often the processor wakes up to check stop/timeout while idle
    pub poll_interval_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            timeout_secs: None,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// TIME BASE
// ============================================================================

/// Maps frame numbers to video-relative and wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    pub fps: f64,
    pub started_at: DateTime<Utc>,
}

impl TimeBase {
    pub fn new(fps: f64, started_at: DateTime<Utc>) -> Self {
        Self { fps, started_at }
    }

    pub fn timestamp_ms(&self, frame_number: u64) -> f64 {
        frame_number as f64 * 1000.0 / self.fps
    }

    pub fn wall_clock(&self, timestamp_ms: f64) -> DateTime<Utc> {
        if !timestamp_ms.is_finite() {
            return self.started_at;
        }
        let offset = Duration::microseconds((timestamp_ms * 1000.0).round() as i64);
        self.started_at
            .checked_add_signed(offset)
            .unwrap_or(self.started_at)
    }
}

// ============================================================================
// DETECTIONS
// ============================================================================

/// One box from the external detector/tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub frame_number: u64,
    pub raw_track_id: i64,
    pub class_label: String,
    pub confidence: f32,
    /// [x1, y1, x2, y2] in pixels
    pub bbox: [f64; 4],
    pub centroid: Point,
}

impl RawDetection {
    pub fn bbox_center(bbox: &[f64; 4]) -> Point {
        Point::new((bbox[0] + bbox[2]) * 0.5, (bbox[1] + bbox[3]) * 0.5)
    }

    pub fn validate(&self) -> Result<(), InputError> {
        let malformed = |reason: &str| InputError::MalformedDetection {
            frame_number: self.frame_number,
            raw_track_id: self.raw_track_id,
            reason: reason.to_string(),
        };

        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(malformed("confidence outside [0, 1]"));
        }
        if self.bbox.iter().any(|v| !v.is_finite()) {
            return Err(malformed("non-finite bbox"));
        }
        if self.bbox[2] < self.bbox[0] || self.bbox[3] < self.bbox[1] {
            return Err(malformed("inverted bbox"));
        }
        if !self.centroid.is_finite() {
            return Err(malformed("non-finite centroid"));
        }
        Ok(())
    }
}

/// Every detection the detector produced for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameBatch {
    pub frame_number: u64,
    pub detections: Vec<RawDetection>,
}

impl FrameBatch {
    pub fn new(frame_number: u64, detections: Vec<RawDetection>) -> Self {
        Self {
            frame_number,
            detections,
        }
    }

    pub fn empty(frame_number: u64) -> Self {
        Self::new(frame_number, Vec::new())
    }
}

/// A detection whose raw id has survived confirmation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmedDetection {
    pub confirmed_id: u64,
    pub raw_track_id: i64,
    pub class_label: String,
    pub confidence: f32,
    pub bbox: [f64; 4],
    pub centroid: Point,
}

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingDirection {
    LeftToRight,
    RightToLeft,
}

impl CrossingDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeftToRight => "left_to_right",
            Self::RightToLeft => "right_to_left",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "left_to_right" => Some(Self::LeftToRight),
            "right_to_left" => Some(Self::RightToLeft),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Enter,
    Exit,
    Crossing(CrossingDirection),
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
            Self::Crossing(CrossingDirection::LeftToRight) => "crossing_left_to_right",
            Self::Crossing(CrossingDirection::RightToLeft) => "crossing_right_to_left",
        }
    }

    pub fn is_crossing(&self) -> bool {
        matches!(self, Self::Crossing(_))
    }
}

/// Idempotency key. Crossing direction is folded into the event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub confirmed_id: u64,
    pub zone_id: String,
    pub event_type: EventType,
    pub frame_number: u64,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.confirmed_id,
            self.zone_id,
            self.event_type.as_str(),
            self.frame_number
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub confirmed_id: u64,
    pub zone_id: String,
    pub zone_name: String,
    pub event_type: EventType,
    pub frame_number: u64,
    pub timestamp_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub position: Point,
    pub class_label: String,
    pub confidence: f32,
}

impl Event {
    pub fn key(&self) -> EventKey {
        EventKey {
            confirmed_id: self.confirmed_id,
            zone_id: self.zone_id.clone(),
            event_type: self.event_type,
            frame_number: self.frame_number,
        }
    }

    pub fn direction(&self) -> Option<CrossingDirection> {
        match self.event_type {
            EventType::Crossing(direction) => Some(direction),
            _ => None,
        }
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Totals for one fixed-width window of video time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatBucket {
    pub bucket_start_ms: u64,
    pub bucket_start: DateTime<Utc>,
    pub frames: u64,
    pub total_detections: u64,
    pub confirmed_detections: u64,
    /// Distinct confirmed ids seen inside this window
    pub unique_confirmed_ids: u64,
    pub zone_enters: u64,
    pub zone_exits: u64,
    pub line_crossings: u64,
    /// Flushed before its window closed (run stopped or failed)
    pub partial: bool,
}

/// Per-frame counters, committed once the frame's events are acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameStats {
    pub frame_number: u64,
    pub timestamp_ms: f64,
    pub raw_detections: u64,
    pub confirmed_detections: u64,
    /// Distinct confirmed ids since the run started
    pub unique_confirmed_ids: u64,
    pub inside_any_zone: u64,
    pub zone_enters: u64,
    pub zone_exits: u64,
    pub line_crossings: u64,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(confidence: f32, bbox: [f64; 4]) -> RawDetection {
        RawDetection {
            frame_number: 3,
            raw_track_id: 9,
            class_label: "person".to_string(),
            confidence,
            bbox,
            centroid: RawDetection::bbox_center(&bbox),
        }
    }

    #[test]
    fn test_time_base() {
        let started = Utc::now();
        let tb = TimeBase::new(30.0, started);
        assert!((tb.timestamp_ms(30) - 1000.0).abs() < 1e-9);
        assert_eq!(tb.wall_clock(1500.0), started + Duration::milliseconds(1500));
    }

    #[test]
    fn test_wall_clock_with_zero_fps_does_not_panic() {
        let started = Utc::now();
        let tb = TimeBase::new(0.0, started);
        assert!(tb.timestamp_ms(5).is_infinite());
        assert_eq!(tb.wall_clock(tb.timestamp_ms(5)), started);
        assert_eq!(tb.wall_clock(f64::MAX), started);
    }

    #[test]
    fn test_detection_validation() {
        assert!(detection(0.9, [0.0, 0.0, 10.0, 10.0]).validate().is_ok());
        assert!(detection(1.2, [0.0, 0.0, 10.0, 10.0]).validate().is_err());
        assert!(detection(0.5, [10.0, 0.0, 0.0, 10.0]).validate().is_err());
        assert!(detection(0.5, [0.0, f64::NAN, 10.0, 10.0]).validate().is_err());
    }

    #[test]
    fn test_filter_accepts() {
        let filter = FilterConfig {
            classes: vec!["car".to_string()],
            min_confidence: 0.5,
        };
        let mut d = detection(0.9, [0.0, 0.0, 10.0, 10.0]);
        assert!(!filter.accepts(&d));
        d.class_label = "car".to_string();
        assert!(filter.accepts(&d));
        d.confidence = 0.4;
        assert!(!filter.accepts(&d));
        assert!(FilterConfig::default().accepts(&d));
    }

    #[test]
    fn test_event_key_display() {
        let key = EventKey {
            confirmed_id: 4,
            zone_id: "line_1".to_string(),
            event_type: EventType::Crossing(CrossingDirection::RightToLeft),
            frame_number: 120,
        };
        assert_eq!(key.to_string(), "4:line_1:crossing_right_to_left:120");
    }
}
