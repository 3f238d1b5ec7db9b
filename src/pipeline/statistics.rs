// src/pipeline/statistics.rs
//
// Per-frame counters rolled up into fixed-width buckets of video time.
//
// Only the current bucket is mutable. It closes when the first frame of a
// later window is committed; windows with no committed frames (frame
// skipping) never produce a bucket. On stop or failure the open bucket is
// flushed as partial.

use std::collections::HashSet;

use crate::types::{FrameStats, StatBucket, TimeBase};

/// Raw per-frame numbers handed over by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameCounts {
    pub raw_detections: u64,
    pub confirmed_ids: Vec<u64>,
    pub inside_any_zone: u64,
    pub zone_enters: u64,
    pub zone_exits: u64,
    pub line_crossings: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameCommit {
    pub frame_stats: FrameStats,
    /// Previous bucket, closed by this frame
    pub closed_bucket: Option<StatBucket>,
}

#[derive(Debug, Clone)]
struct BucketAccumulator {
    start_ms: u64,
    frames: u64,
    total_detections: u64,
    confirmed_detections: u64,
    ids: HashSet<u64>,
    zone_enters: u64,
    zone_exits: u64,
    line_crossings: u64,
}

impl BucketAccumulator {
    fn new(start_ms: u64) -> Self {
        Self {
            start_ms,
            frames: 0,
            total_detections: 0,
            confirmed_detections: 0,
            ids: HashSet::new(),
            zone_enters: 0,
            zone_exits: 0,
            line_crossings: 0,
        }
    }

    fn add(&mut self, counts: &FrameCounts) {
        self.frames += 1;
        self.total_detections += counts.raw_detections;
        self.confirmed_detections += counts.confirmed_ids.len() as u64;
        self.ids.extend(counts.confirmed_ids.iter().copied());
        self.zone_enters += counts.zone_enters;
        self.zone_exits += counts.zone_exits;
        self.line_crossings += counts.line_crossings;
    }

    fn snapshot(&self, time: &TimeBase, partial: bool) -> StatBucket {
        StatBucket {
            bucket_start_ms: self.start_ms,
            bucket_start: time.wall_clock(self.start_ms as f64),
            frames: self.frames,
            total_detections: self.total_detections,
            confirmed_detections: self.confirmed_detections,
            unique_confirmed_ids: self.ids.len() as u64,
            zone_enters: self.zone_enters,
            zone_exits: self.zone_exits,
            line_crossings: self.line_crossings,
            partial,
        }
    }
}

pub struct StatsAggregator {
    bucket_ms: u64,
    current: Option<BucketAccumulator>,
    run_ids: HashSet<u64>,
    last_frame: Option<u64>,
}

impl StatsAggregator {
    pub fn new(bucket_seconds: u64) -> Self {
        Self {
            bucket_ms: bucket_seconds.max(1) * 1000,
            current: None,
            run_ids: HashSet::new(),
            last_frame: None,
        }
    }

    pub fn bucket_start_ms(&self, timestamp_ms: f64) -> u64 {
        let t = timestamp_ms.max(0.0) as u64;
        (t / self.bucket_ms) * self.bucket_ms
    }

    /// What committing this frame would produce, without changing any
    /// state. A frame at or before the last committed one yields `None`.
    pub fn stage_frame(
        &self,
        frame_number: u64,
        counts: &FrameCounts,
        time: &TimeBase,
    ) -> Option<FrameCommit> {
        if let Some(last) = self.last_frame {
            if frame_number <= last {
                return None;
            }
        }

        let timestamp_ms = time.timestamp_ms(frame_number);
        let start_ms = self.bucket_start_ms(timestamp_ms);
        let closed_bucket = self
            .current
            .as_ref()
            .filter(|acc| acc.start_ms != start_ms)
            .map(|acc| acc.snapshot(time, false));

        let new_ids: HashSet<u64> = counts
            .confirmed_ids
            .iter()
            .copied()
            .filter(|id| !self.run_ids.contains(id))
            .collect();

        let frame_stats = FrameStats {
            frame_number,
            timestamp_ms,
            raw_detections: counts.raw_detections,
            confirmed_detections: counts.confirmed_ids.len() as u64,
            unique_confirmed_ids: (self.run_ids.len() + new_ids.len()) as u64,
            inside_any_zone: counts.inside_any_zone,
            zone_enters: counts.zone_enters,
            zone_exits: counts.zone_exits,
            line_crossings: counts.line_crossings,
        };

        Some(FrameCommit {
            frame_stats,
            closed_bucket,
        })
    }

    /// Commit one frame into the open bucket, closing it first when the
    /// frame belongs to a later window. Same output as `stage_frame`.
    pub fn commit_frame(
        &mut self,
        frame_number: u64,
        counts: &FrameCounts,
        time: &TimeBase,
    ) -> Option<FrameCommit> {
        let commit = self.stage_frame(frame_number, counts, time)?;
        self.last_frame = Some(frame_number);

        if commit.closed_bucket.is_some() {
            self.current = None;
        }
        let start_ms = self.bucket_start_ms(commit.frame_stats.timestamp_ms);
        self.current
            .get_or_insert_with(|| BucketAccumulator::new(start_ms))
            .add(counts);
        self.run_ids.extend(counts.confirmed_ids.iter().copied());

        Some(commit)
    }

    /// Close the open bucket. `partial` marks a window cut short by a
    /// stop or failure rather than by the end of the input.
    pub fn take_current(&mut self, time: &TimeBase, partial: bool) -> Option<StatBucket> {
        self.current.take().map(|acc| acc.snapshot(time, partial))
    }

    pub fn current_bucket(&self, time: &TimeBase) -> Option<StatBucket> {
        self.current.as_ref().map(|acc| acc.snapshot(time, true))
    }

    pub fn unique_ids_total(&self) -> u64 {
        self.run_ids.len() as u64
    }

    pub fn last_committed_frame(&self) -> Option<u64> {
        self.last_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn counts(raw: u64, ids: &[u64]) -> FrameCounts {
        FrameCounts {
            raw_detections: raw,
            confirmed_ids: ids.to_vec(),
            ..Default::default()
        }
    }

    fn tb() -> TimeBase {
        TimeBase::new(10.0, Utc::now())
    }

    #[test]
    fn test_bucket_closes_on_next_window() {
        let time = tb();
        let mut agg = StatsAggregator::new(1);

        for f in 1..=9 {
            let commit = agg.commit_frame(f, &counts(2, &[1]), &time).unwrap();
            assert!(commit.closed_bucket.is_none());
        }
        let commit = agg.commit_frame(10, &counts(3, &[1, 2]), &time).unwrap();
        let closed = commit.closed_bucket.unwrap();
        assert_eq!(closed.bucket_start_ms, 0);
        assert_eq!(closed.frames, 9);
        assert_eq!(closed.total_detections, 18);
        assert_eq!(closed.unique_confirmed_ids, 1);
        assert!(!closed.partial);

        let open = agg.current_bucket(&time).unwrap();
        assert_eq!(open.bucket_start_ms, 1000);
        assert_eq!(open.unique_confirmed_ids, 2);
    }

    #[test]
    fn test_skipped_windows_produce_no_bucket() {
        let time = tb();
        let mut agg = StatsAggregator::new(1);
        agg.commit_frame(5, &counts(1, &[]), &time);
        let commit = agg.commit_frame(35, &counts(1, &[]), &time).unwrap();
        assert_eq!(commit.closed_bucket.unwrap().bucket_start_ms, 0);
        assert_eq!(agg.current_bucket(&time).unwrap().bucket_start_ms, 3000);
    }

    #[test]
    fn test_replayed_frame_is_ignored() {
        let time = tb();
        let mut agg = StatsAggregator::new(60);
        assert!(agg.commit_frame(3, &counts(4, &[7]), &time).is_some());
        assert!(agg.commit_frame(3, &counts(4, &[7]), &time).is_none());
        assert_eq!(agg.current_bucket(&time).unwrap().total_detections, 4);
    }

    #[test]
    fn test_frame_stats_cumulative_unique_ids() {
        let time = tb();
        let mut agg = StatsAggregator::new(1);
        agg.commit_frame(1, &counts(1, &[1]), &time);
        let c = agg.commit_frame(20, &counts(2, &[1, 2]), &time).unwrap();
        assert_eq!(c.frame_stats.unique_confirmed_ids, 2);
        assert_eq!(c.frame_stats.confirmed_detections, 2);
        assert!((c.frame_stats.timestamp_ms - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_staging_leaves_state_untouched() {
        let time = tb();
        let mut agg = StatsAggregator::new(1);
        agg.commit_frame(1, &counts(1, &[1]), &time);

        let staged = agg.stage_frame(12, &counts(2, &[1, 2]), &time).unwrap();
        assert_eq!(staged.closed_bucket.as_ref().unwrap().frames, 1);
        assert_eq!(staged.frame_stats.unique_confirmed_ids, 2);

        assert_eq!(agg.last_committed_frame(), Some(1));
        assert_eq!(agg.unique_ids_total(), 1);
        let open = agg.current_bucket(&time).unwrap();
        assert_eq!(open.bucket_start_ms, 0);
        assert_eq!(open.frames, 1);

        let committed = agg.commit_frame(12, &counts(2, &[1, 2]), &time).unwrap();
        assert_eq!(committed, staged);
        assert_eq!(agg.current_bucket(&time).unwrap().bucket_start_ms, 1000);
    }

    #[test]
    fn test_take_current_marks_partial() {
        let time = tb();
        let mut agg = StatsAggregator::new(60);
        agg.commit_frame(1, &counts(1, &[]), &time);
        let bucket = agg.take_current(&time, true).unwrap();
        assert!(bucket.partial);
        assert!(agg.take_current(&time, true).is_none());
    }
}
