// src/feed.rs
//
// Detector-side input. A feed yields frame batches in frame order and
// `None` once the input is exhausted. The producer thread in the runner
// is the only caller.

use serde::Deserialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::FeedError;
use crate::geometry::Point;
use crate::types::{FrameBatch, RawDetection};

pub trait DetectionFeed: Send {
    fn next_batch(&mut self) -> Result<Option<FrameBatch>, FeedError>;
}

impl<F: DetectionFeed + ?Sized> DetectionFeed for Box<F> {
    fn next_batch(&mut self) -> Result<Option<FrameBatch>, FeedError> {
        (**self).next_batch()
    }
}

// ============================================================================
// JSON LINES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedLine {
    Failure { error: String },
    Frame(FrameRecord),
}

#[derive(Debug, Deserialize)]
struct FrameRecord {
    frame_number: u64,
    #[serde(default)]
    detections: Vec<DetectionRecord>,
}

#[derive(Debug, Deserialize)]
struct DetectionRecord {
    #[serde(alias = "track_id")]
    raw_track_id: i64,
    #[serde(alias = "class_name")]
    class_label: String,
    confidence: f32,
    bbox: [f64; 4],
    #[serde(default)]
    centroid: Option<[f64; 2]>,
}

impl DetectionRecord {
    fn into_detection(self, frame_number: u64) -> RawDetection {
        let centroid = match self.centroid {
            Some([x, y]) => Point::new(x, y),
            None => RawDetection::bbox_center(&self.bbox),
        };
        RawDetection {
            frame_number,
            raw_track_id: self.raw_track_id,
            class_label: self.class_label,
            confidence: self.confidence,
            bbox: self.bbox,
            centroid,
        }
    }
}

/// One JSON object per line:
///
/// `{"frame_number": 12, "detections": [{"track_id": 3, "class_name": "person",
///   "confidence": 0.91, "bbox": [x1, y1, x2, y2]}]}`
///
/// `centroid` is optional and defaults to the bbox center. A line of the
/// form `{"error": "..."}` reports a detector failure.
pub struct JsonlFeed<R: BufRead> {
    reader: R,
    line_number: usize,
    buf: String,
}

impl JsonlFeed<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        info!("✓ Reading detections from {}", path.display());
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonlFeed<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_number: 0,
            buf: String::new(),
        }
    }
}

impl<R: BufRead + Send> DetectionFeed for JsonlFeed<R> {
    fn next_batch(&mut self) -> Result<Option<FrameBatch>, FeedError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                debug!("Detection feed exhausted after {} line(s)", self.line_number);
                return Ok(None);
            }
            self.line_number += 1;

            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }

            let parsed: FeedLine =
                serde_json::from_str(line).map_err(|e| FeedError::Malformed {
                    line: self.line_number,
                    reason: e.to_string(),
                })?;

            return match parsed {
                FeedLine::Failure { error } => Err(FeedError::Detector(error)),
                FeedLine::Frame(record) => {
                    let frame = record.frame_number;
                    let detections = record
                        .detections
                        .into_iter()
                        .map(|d| d.into_detection(frame))
                        .collect();
                    Ok(Some(FrameBatch::new(frame, detections)))
                }
            };
        }
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Pre-built batches, mainly for tests.
pub struct VecFeed {
    batches: VecDeque<FrameBatch>,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl VecFeed {
    pub fn new(batches: Vec<FrameBatch>) -> Self {
        Self {
            batches: batches.into(),
            failure: None,
            delay: None,
        }
    }

    /// Report a detector failure once the batches run out.
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Sleep before handing out each batch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl DetectionFeed for VecFeed {
    fn next_batch(&mut self) -> Result<Option<FrameBatch>, FeedError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match self.batches.pop_front() {
            Some(batch) => Ok(Some(batch)),
            None => match self.failure.take() {
                Some(message) => Err(FeedError::Detector(message)),
                None => Ok(None),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn feed(text: &str) -> JsonlFeed<Cursor<Vec<u8>>> {
        JsonlFeed::new(Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn test_jsonl_parses_frames_and_aliases() {
        let mut f = feed(concat!(
            "{\"frame_number\": 3, \"detections\": [",
            "{\"track_id\": 7, \"class_name\": \"person\", \"confidence\": 0.8, \"bbox\": [0, 0, 10, 20]}]}\n",
            "\n",
            "{\"frame_number\": 4, \"detections\": [",
            "{\"raw_track_id\": 7, \"class_label\": \"person\", \"confidence\": 0.7, ",
            "\"bbox\": [0, 0, 10, 20], \"centroid\": [1, 2]}]}\n",
            "{\"frame_number\": 5}\n",
        ));

        let b3 = f.next_batch().unwrap().unwrap();
        assert_eq!(b3.frame_number, 3);
        assert_eq!(b3.detections[0].raw_track_id, 7);
        assert_eq!(b3.detections[0].frame_number, 3);
        assert_eq!(b3.detections[0].centroid, Point::new(5.0, 10.0));

        let b4 = f.next_batch().unwrap().unwrap();
        assert_eq!(b4.detections[0].centroid, Point::new(1.0, 2.0));

        let b5 = f.next_batch().unwrap().unwrap();
        assert!(b5.detections.is_empty());

        assert!(f.next_batch().unwrap().is_none());
    }

    #[test]
    fn test_jsonl_reports_malformed_line_number() {
        let mut f = feed("{\"frame_number\": 1}\nnot json\n");
        f.next_batch().unwrap();
        match f.next_batch() {
            Err(FeedError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed error, got {:?}", other),
        }
    }

    #[test]
    fn test_jsonl_detector_failure_line() {
        let mut f = feed("{\"error\": \"camera disconnected\"}\n");
        match f.next_batch() {
            Err(FeedError::Detector(msg)) => assert_eq!(msg, "camera disconnected"),
            other => panic!("expected detector failure, got {:?}", other),
        }
    }

    #[test]
    fn test_vec_feed_then_fail() {
        let mut f = VecFeed::new(vec![FrameBatch::empty(1)]).then_fail("boom");
        assert!(f.next_batch().unwrap().is_some());
        assert!(matches!(f.next_batch(), Err(FeedError::Detector(_))));
        assert!(f.next_batch().unwrap().is_none());
    }
}
