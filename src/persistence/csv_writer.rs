// src/persistence/csv_writer.rs
//
// CSV reference sink. One file per record stream inside an output
// directory:
//
//   zone_events.csv           enter/exit
//   line_crossing_events.csv  directed crossings
//   minute_statistics.csv     per-bucket totals
//   frame_statistics.csv      per-frame counters (created on first write)
//
// Every row is flushed before its Ack. Opening an existing directory
// reloads the keys already on disk, so replaying an interrupted run with
// the same analysis id appends nothing twice.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{Ack, EventSink};
use crate::error::WriteError;
use crate::types::{Event, FrameStats, StatBucket};

pub const ZONE_EVENTS_FILE: &str = "zone_events.csv";
pub const LINE_CROSSINGS_FILE: &str = "line_crossing_events.csv";
pub const BUCKETS_FILE: &str = "minute_statistics.csv";
pub const FRAME_STATS_FILE: &str = "frame_statistics.csv";

// ============================================================================
// ROWS
// ============================================================================

trait CsvRow: Serialize + DeserializeOwned {
    fn key(&self) -> String;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ZoneEventRow {
    id: u64,
    analysis_id: String,
    zone_id: String,
    zone_name: String,
    confirmed_id: u64,
    event_type: String,
    frame_number: u64,
    timestamp_ms: f64,
    timestamp: DateTime<Utc>,
    position_x: f64,
    position_y: f64,
    class_label: String,
    confidence: f32,
}

impl CsvRow for ZoneEventRow {
    fn key(&self) -> String {
        format!(
            "{}|{}:{}:{}:{}",
            self.analysis_id, self.confirmed_id, self.zone_id, self.event_type, self.frame_number
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LineCrossingRow {
    id: u64,
    analysis_id: String,
    zone_id: String,
    zone_name: String,
    confirmed_id: u64,
    direction: String,
    frame_number: u64,
    timestamp_ms: f64,
    timestamp: DateTime<Utc>,
    position_x: f64,
    position_y: f64,
    class_label: String,
    confidence: f32,
}

impl CsvRow for LineCrossingRow {
    fn key(&self) -> String {
        format!(
            "{}|{}:{}:crossing_{}:{}",
            self.analysis_id, self.confirmed_id, self.zone_id, self.direction, self.frame_number
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BucketRow {
    analysis_id: String,
    bucket_start_ms: u64,
    bucket_start: DateTime<Utc>,
    frames: u64,
    total_detections: u64,
    confirmed_detections: u64,
    unique_confirmed_ids: u64,
    zone_enters: u64,
    zone_exits: u64,
    line_crossings: u64,
    partial: bool,
}

impl CsvRow for BucketRow {
    fn key(&self) -> String {
        format!("{}|{}", self.analysis_id, self.bucket_start_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameStatsRow {
    analysis_id: String,
    frame_number: u64,
    timestamp_ms: f64,
    raw_detections: u64,
    confirmed_detections: u64,
    unique_confirmed_ids: u64,
    inside_any_zone: u64,
    zone_enters: u64,
    zone_exits: u64,
    line_crossings: u64,
}

impl CsvRow for FrameStatsRow {
    fn key(&self) -> String {
        format!("{}|{}", self.analysis_id, self.frame_number)
    }
}

// ============================================================================
// TABLE
// ============================================================================

/// One append-only CSV file with its set of known keys.
struct CsvTable<R> {
    writer: csv::Writer<File>,
    keys: HashSet<String>,
    next_id: u64,
    _row: PhantomData<R>,
}

impl<R: CsvRow> CsvTable<R> {
    fn open(path: PathBuf) -> Result<Self, WriteError> {
        let mut keys = HashSet::new();
        let mut rows = 0u64;

        let existing = path.exists() && fs::metadata(&path)?.len() > 0;
        if existing {
            let mut reader = csv::Reader::from_path(&path)?;
            for (i, row) in reader.deserialize::<R>().enumerate() {
                match row {
                    Ok(row) => {
                        keys.insert(row.key());
                        rows += 1;
                    }
                    // Typically a row cut short by an interrupted write
                    Err(e) => {
                        warn!("Skipping unreadable row {} in {}: {}", i + 1, path.display(), e)
                    }
                }
            }
            info!("Reloaded {} row(s) from {}", rows, path.display());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        if existing && !ends_with_newline(&mut file)? {
            file.write_all(b"\n")?;
        }

        let writer = csv::WriterBuilder::new()
            .has_headers(!existing)
            .from_writer(file);

        Ok(Self {
            writer,
            keys,
            next_id: rows + 1,
            _row: PhantomData,
        })
    }

    fn append(&mut self, row: R) -> Result<Ack, WriteError> {
        let key = row.key();
        if self.keys.contains(&key) {
            // An earlier attempt may have buffered the row without flushing it
            self.writer.flush()?;
            return Ok(Ack::Duplicate);
        }
        self.writer.serialize(&row)?;
        self.keys.insert(key);
        self.next_id += 1;
        self.writer.flush()?;
        Ok(Ack::Written)
    }

    fn flush(&mut self) -> Result<(), WriteError> {
        self.writer.flush()?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

fn ends_with_newline(file: &mut File) -> Result<bool, WriteError> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

// ============================================================================
// SINK
// ============================================================================

pub struct CsvSink {
    dir: PathBuf,
    analysis_id: String,
    zone_events: CsvTable<ZoneEventRow>,
    line_crossings: CsvTable<LineCrossingRow>,
    buckets: CsvTable<BucketRow>,
    frame_stats: Option<CsvTable<FrameStatsRow>>,
}

impl CsvSink {
    pub fn open(dir: &Path, analysis_id: impl Into<String>) -> Result<Self, WriteError> {
        fs::create_dir_all(dir)?;
        let sink = Self {
            dir: dir.to_path_buf(),
            analysis_id: analysis_id.into(),
            zone_events: CsvTable::open(dir.join(ZONE_EVENTS_FILE))?,
            line_crossings: CsvTable::open(dir.join(LINE_CROSSINGS_FILE))?,
            buckets: CsvTable::open(dir.join(BUCKETS_FILE))?,
            frame_stats: None,
        };
        info!(
            "✓ CSV sink at {} (analysis {})",
            sink.dir.display(),
            sink.analysis_id
        );
        Ok(sink)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Event rows currently on disk across both event files, all analyses.
    pub fn event_rows(&self) -> usize {
        self.zone_events.len() + self.line_crossings.len()
    }
}

impl EventSink for CsvSink {
    fn append(&mut self, event: &Event) -> Result<Ack, WriteError> {
        match event.direction() {
            None => {
                let row = ZoneEventRow {
                    id: self.zone_events.next_id,
                    analysis_id: self.analysis_id.clone(),
                    zone_id: event.zone_id.clone(),
                    zone_name: event.zone_name.clone(),
                    confirmed_id: event.confirmed_id,
                    event_type: event.event_type.as_str().to_string(),
                    frame_number: event.frame_number,
                    timestamp_ms: event.timestamp_ms,
                    timestamp: event.timestamp,
                    position_x: event.position.x,
                    position_y: event.position.y,
                    class_label: event.class_label.clone(),
                    confidence: event.confidence,
                };
                self.zone_events.append(row)
            }
            Some(direction) => {
                let row = LineCrossingRow {
                    id: self.line_crossings.next_id,
                    analysis_id: self.analysis_id.clone(),
                    zone_id: event.zone_id.clone(),
                    zone_name: event.zone_name.clone(),
                    confirmed_id: event.confirmed_id,
                    direction: direction.as_str().to_string(),
                    frame_number: event.frame_number,
                    timestamp_ms: event.timestamp_ms,
                    timestamp: event.timestamp,
                    position_x: event.position.x,
                    position_y: event.position.y,
                    class_label: event.class_label.clone(),
                    confidence: event.confidence,
                };
                self.line_crossings.append(row)
            }
        }
    }

    fn write_bucket(&mut self, bucket: &StatBucket) -> Result<Ack, WriteError> {
        self.buckets.append(BucketRow {
            analysis_id: self.analysis_id.clone(),
            bucket_start_ms: bucket.bucket_start_ms,
            bucket_start: bucket.bucket_start,
            frames: bucket.frames,
            total_detections: bucket.total_detections,
            confirmed_detections: bucket.confirmed_detections,
            unique_confirmed_ids: bucket.unique_confirmed_ids,
            zone_enters: bucket.zone_enters,
            zone_exits: bucket.zone_exits,
            line_crossings: bucket.line_crossings,
            partial: bucket.partial,
        })
    }

    fn write_frame_stats(&mut self, stats: &FrameStats) -> Result<Ack, WriteError> {
        let row = FrameStatsRow {
            analysis_id: self.analysis_id.clone(),
            frame_number: stats.frame_number,
            timestamp_ms: stats.timestamp_ms,
            raw_detections: stats.raw_detections,
            confirmed_detections: stats.confirmed_detections,
            unique_confirmed_ids: stats.unique_confirmed_ids,
            inside_any_zone: stats.inside_any_zone,
            zone_enters: stats.zone_enters,
            zone_exits: stats.zone_exits,
            line_crossings: stats.line_crossings,
        };
        match self.frame_stats.as_mut() {
            Some(table) => table.append(row),
            None => {
                let mut table = CsvTable::open(self.dir.join(FRAME_STATS_FILE))?;
                let ack = table.append(row);
                self.frame_stats = Some(table);
                ack
            }
        }
    }

    fn flush(&mut self) -> Result<(), WriteError> {
        self.zone_events.flush()?;
        self.line_crossings.flush()?;
        self.buckets.flush()?;
        if let Some(table) = self.frame_stats.as_mut() {
            table.flush()?;
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use crate::types::{CrossingDirection, EventType};

    fn event(id: u64, zone: &str, event_type: EventType, frame: u64) -> Event {
        Event {
            confirmed_id: id,
            zone_id: zone.to_string(),
            zone_name: format!("{} name", zone),
            event_type,
            frame_number: frame,
            timestamp_ms: frame as f64 * 1000.0 / 30.0,
            timestamp: Utc::now(),
            position: Point::new(12.5, 40.0),
            class_label: "person".to_string(),
            confidence: 0.87,
        }
    }

    fn bucket(start_ms: u64) -> StatBucket {
        StatBucket {
            bucket_start_ms: start_ms,
            bucket_start: Utc::now(),
            frames: 10,
            total_detections: 30,
            confirmed_detections: 20,
            unique_confirmed_ids: 2,
            zone_enters: 1,
            zone_exits: 0,
            line_crossings: 1,
            partial: false,
        }
    }

    fn line_count(path: &Path) -> usize {
        fs::read_to_string(path).unwrap().lines().count()
    }

    #[test]
    fn test_events_split_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::open(dir.path(), "run-a").unwrap();

        sink.append(&event(1, "polygon_1", EventType::Enter, 14)).unwrap();
        sink.append(&event(
            1,
            "line_1",
            EventType::Crossing(CrossingDirection::LeftToRight),
            21,
        ))
        .unwrap();

        let zone_csv = fs::read_to_string(dir.path().join(ZONE_EVENTS_FILE)).unwrap();
        let mut lines = zone_csv.lines();
        assert!(lines.next().unwrap().starts_with("id,analysis_id,zone_id"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("1,run-a,polygon_1,polygon_1 name,1,enter,14,"));

        let line_csv = fs::read_to_string(dir.path().join(LINE_CROSSINGS_FILE)).unwrap();
        assert!(line_csv.contains(",left_to_right,21,"));
    }

    #[test]
    fn test_duplicate_key_is_not_written_twice() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::open(dir.path(), "run-a").unwrap();
        let e = event(3, "polygon_1", EventType::Exit, 40);

        assert_eq!(sink.append(&e).unwrap(), Ack::Written);
        assert_eq!(sink.append(&e).unwrap(), Ack::Duplicate);
        assert_eq!(line_count(&dir.path().join(ZONE_EVENTS_FILE)), 2);
    }

    #[test]
    fn test_reopen_recovers_keys_and_keeps_single_header() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut sink = CsvSink::open(dir.path(), "run-a").unwrap();
            sink.append(&event(1, "polygon_1", EventType::Enter, 14)).unwrap();
            sink.append(&event(1, "polygon_1", EventType::Exit, 20)).unwrap();
            sink.write_bucket(&bucket(0)).unwrap();
        }

        let mut sink = CsvSink::open(dir.path(), "run-a").unwrap();
        assert_eq!(sink.event_rows(), 2);
        assert_eq!(
            sink.append(&event(1, "polygon_1", EventType::Enter, 14)).unwrap(),
            Ack::Duplicate
        );
        assert_eq!(sink.write_bucket(&bucket(0)).unwrap(), Ack::Duplicate);
        assert_eq!(
            sink.append(&event(1, "polygon_1", EventType::Enter, 30)).unwrap(),
            Ack::Written
        );

        let zone_csv = fs::read_to_string(dir.path().join(ZONE_EVENTS_FILE)).unwrap();
        assert_eq!(zone_csv.lines().count(), 4);
        assert_eq!(zone_csv.matches("analysis_id").count(), 1);
        // row ids continue after the reloaded rows
        assert!(zone_csv.lines().last().unwrap().starts_with("3,run-a,"));
        assert_eq!(line_count(&dir.path().join(BUCKETS_FILE)), 2);
    }

    #[test]
    fn test_other_analysis_ids_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let e = event(1, "polygon_1", EventType::Enter, 14);
        {
            let mut sink = CsvSink::open(dir.path(), "run-a").unwrap();
            sink.append(&e).unwrap();
        }
        let mut sink = CsvSink::open(dir.path(), "run-b").unwrap();
        assert_eq!(sink.append(&e).unwrap(), Ack::Written);
    }

    #[test]
    fn test_truncated_trailing_row_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut sink = CsvSink::open(dir.path(), "run-a").unwrap();
            sink.append(&event(1, "polygon_1", EventType::Enter, 14)).unwrap();
        }
        let path = dir.path().join(ZONE_EVENTS_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"2,run-a,polygon_1").unwrap();
        drop(file);

        let mut sink = CsvSink::open(dir.path(), "run-a").unwrap();
        assert_eq!(sink.event_rows(), 1);
        sink.append(&event(1, "polygon_1", EventType::Exit, 20)).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.lines().any(|l| l.contains(",exit,20,")));
    }

    #[test]
    fn test_frame_stats_file_created_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::open(dir.path(), "run-a").unwrap();
        assert!(!dir.path().join(FRAME_STATS_FILE).exists());

        let stats = FrameStats {
            frame_number: 7,
            timestamp_ms: 233.3,
            raw_detections: 3,
            confirmed_detections: 1,
            unique_confirmed_ids: 1,
            inside_any_zone: 1,
            zone_enters: 0,
            zone_exits: 0,
            line_crossings: 0,
        };
        assert_eq!(sink.write_frame_stats(&stats).unwrap(), Ack::Written);
        assert_eq!(sink.write_frame_stats(&stats).unwrap(), Ack::Duplicate);
        assert_eq!(line_count(&dir.path().join(FRAME_STATS_FILE)), 2);
    }
}
