// src/pipeline/orchestrator.rs
//
// Drives one frame at a time through the fixed stage order:
//
//   validate → intake filter → confirmation → zones → dedup → sink
//            → statistics (committed only after the frame's events are acked)
//
// Run lifecycle:
//
//   Idle ──start──▶ Running ──stop/timeout──▶ Stopped
//                     │ ──input exhausted──▶ Completed
//                     └─ input violation / sink failure / feed error ─▶ Failed
//
// Every exit from Running flushes closed buckets and the open bucket
// (partial unless Completed), then flushes the sink. Nothing already
// acknowledged by the sink is ever rolled back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analysis::track_confirmation::TrackConfirmer;
use crate::analysis::zone_tracker::ZoneTracker;
use crate::error::{InputError, PipelineError, WriteError};
use crate::persistence::{Ack, EventSink};
use crate::pipeline::dedup::EventDeduplicator;
use crate::pipeline::event_bus::{EventBus, PipelineEvent};
use crate::pipeline::frame_context::FrameContext;
use crate::pipeline::metrics::{MetricsSummary, PipelineMetrics};
use crate::pipeline::statistics::{FrameCounts, StatsAggregator};
use crate::types::{Config, FrameBatch, RawDetection, StatBucket, TimeBase};
use crate::zones::Zone;

const NOTIFICATION_CAPACITY: usize = 1024;

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Stopped,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }
}

/// Final (or current) record of a run, written as `analysis.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub analysis_id: String,
    pub state: RunState,
    /// Why the run stopped or failed
    pub reason: Option<String>,
    pub frames_processed: u64,
    pub last_committed_frame: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub fps: f64,
    pub zones: usize,
    pub confirmed_identities: u64,
    pub events_written: u64,
    pub buckets_written: u64,
    pub metrics: MetricsSummary,
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct FrameOrchestrator<S: EventSink> {
    config: Config,
    analysis_id: String,
    state: RunState,
    reason: Option<String>,
    time: TimeBase,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,

    confirmer: TrackConfirmer,
    zones: ZoneTracker,
    dedup: EventDeduplicator,
    stats: StatsAggregator,
    pending_buckets: VecDeque<StatBucket>,
    sink: S,

    bus: EventBus,
    metrics: PipelineMetrics,

    last_frame: Option<u64>,
    frames_processed: u64,
    events_written: u64,
    buckets_written: u64,
}

impl<S: EventSink> FrameOrchestrator<S> {
    /// Zones must already be validated; they are fixed for the whole run.
    pub fn new(config: Config, zones: Vec<Zone>, sink: S) -> Self {
        let analysis_id = config
            .persistence
            .analysis_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            analysis_id,
            state: RunState::Idle,
            reason: None,
            time: TimeBase::new(config.video.fps, Utc::now()),
            started_at: None,
            finished_at: None,
            confirmer: TrackConfirmer::new(config.confirmation.clone()),
            zones: ZoneTracker::new(zones),
            dedup: EventDeduplicator::with_capacity(config.dedup.capacity),
            stats: StatsAggregator::new(config.statistics.bucket_seconds),
            pending_buckets: VecDeque::new(),
            sink,
            bus: EventBus::new(NOTIFICATION_CAPACITY),
            metrics: PipelineMetrics::new(),
            last_frame: None,
            frames_processed: 0,
            events_written: 0,
            buckets_written: 0,
            config,
        }
    }

    /// Share counters with another owner (e.g. a RunHandle).
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn analysis_id(&self) -> &str {
        &self.analysis_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn time_base(&self) -> &TimeBase {
        &self.time
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Current open bucket, for live inspection.
    pub fn current_bucket(&self) -> Option<StatBucket> {
        self.stats.current_bucket(&self.time)
    }

    pub fn drain_notifications(&mut self) -> Vec<PipelineEvent> {
        self.bus.drain()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn start(&mut self) -> Result<(), PipelineError> {
        self.start_at(Utc::now())
    }

    /// Start with an explicit wall-clock origin for absolute timestamps.
    pub fn start_at(&mut self, started_at: DateTime<Utc>) -> Result<(), PipelineError> {
        if self.state != RunState::Idle {
            return Err(PipelineError::InvalidTransition {
                state: self.state,
                action: "start",
            });
        }
        self.config
            .validate()
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        self.time = TimeBase::new(self.config.video.fps, started_at);
        self.started_at = Some(started_at);
        self.transition(RunState::Running);
        info!(
            "▶ Analysis {} started: {} zone(s), fps={}, confirm_hits={}",
            self.analysis_id,
            self.zones.zones().len(),
            self.config.video.fps,
            self.config.confirmation.confirm_hits
        );
        Ok(())
    }

    /// User-requested stop. Committed events stay; the open bucket is
    /// flushed as partial.
    pub fn stop(&mut self) -> Result<RunSummary, PipelineError> {
        self.stop_with_reason("stopped by request")
    }

    pub fn stop_with_reason(&mut self, reason: impl Into<String>) -> Result<RunSummary, PipelineError> {
        if self.state.is_terminal() {
            return Err(PipelineError::InvalidTransition {
                state: self.state,
                action: "stop",
            });
        }
        self.finish(RunState::Stopped, Some(reason.into()))
    }

    /// The input is exhausted. The open bucket is flushed as complete.
    pub fn complete(&mut self) -> Result<RunSummary, PipelineError> {
        if self.state != RunState::Running {
            return Err(PipelineError::InvalidTransition {
                state: self.state,
                action: "complete",
            });
        }
        self.finish(RunState::Completed, None)
    }

    /// Move to Failed, flushing whatever can still be written. Calling it
    /// on a run that already ended keeps the original outcome.
    pub fn fail(&mut self, reason: impl Into<String>) -> RunSummary {
        if self.state.is_terminal() {
            return self.summary();
        }
        let reason = reason.into();
        error!("✖ Analysis {} failed: {}", self.analysis_id, reason);
        if let Err(e) = self.flush_statistics(true) {
            error!("Flush during failure also failed: {}", e);
        }
        self.finished_at = Some(Utc::now());
        self.reason = Some(reason);
        self.transition(RunState::Failed);
        self.summary()
    }

    fn finish(&mut self, to: RunState, reason: Option<String>) -> Result<RunSummary, PipelineError> {
        let partial = to != RunState::Completed;
        if let Err(e) = self.flush_statistics(partial) {
            self.fail(format!("flush on {} failed: {}", to.as_str(), e));
            return Err(e.into());
        }
        self.finished_at = Some(Utc::now());
        self.reason = reason;
        self.transition(to);

        let summary = self.summary();
        info!(
            "■ Analysis {} {}: {} frame(s), {} event(s), {} bucket(s)",
            self.analysis_id,
            to.as_str(),
            summary.frames_processed,
            summary.events_written,
            summary.buckets_written
        );
        Ok(summary)
    }

    fn transition(&mut self, to: RunState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!("Run state {} → {}", from.as_str(), to.as_str());
        self.state = to;
        self.bus.publish(PipelineEvent::StateChanged { from, to });
    }

    fn flush_statistics(&mut self, partial: bool) -> Result<(), WriteError> {
        if let Some(bucket) = self.stats.take_current(&self.time, partial) {
            self.pending_buckets.push_back(bucket);
        }
        self.write_pending_buckets()?;
        self.sink.flush()
    }

    fn write_pending_buckets(&mut self) -> Result<(), WriteError> {
        while let Some(bucket) = self.pending_buckets.front() {
            if self.sink.write_bucket(bucket)? == Ack::Written {
                self.buckets_written += 1;
            }
            if let Some(bucket) = self.pending_buckets.pop_front() {
                self.bus.publish(PipelineEvent::BucketClosed(bucket));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Frame processing
    // ------------------------------------------------------------------------

    /// Process one frame to completion. An input violation or sink failure
    /// moves the run to Failed before the error is returned.
    pub fn process_frame(&mut self, batch: FrameBatch) -> Result<FrameContext, PipelineError> {
        if self.state != RunState::Running {
            return Err(PipelineError::InvalidTransition {
                state: self.state,
                action: "process a frame",
            });
        }

        let started = Instant::now();
        if let Err(e) = self.check_batch(&batch) {
            self.fail(e.to_string());
            return Err(e.into());
        }

        let ctx = match self.run_frame(batch) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.fail(e.to_string());
                return Err(e.into());
            }
        };

        let m = &self.metrics;
        if ctx.is_replay {
            m.inc(&m.replayed_frames);
            m.add(&m.duplicates_suppressed, ctx.duplicates_suppressed as u64);
            return Ok(ctx);
        }
        m.inc(&m.total_frames);
        m.add(&m.raw_detections, ctx.raw_detections as u64);
        m.add(&m.filtered_detections, ctx.filtered_detections as u64);
        m.add(&m.confirmations, ctx.newly_confirmed.len() as u64);
        m.add(&m.evictions, ctx.evicted.len() as u64);
        m.add(&m.zone_enters, ctx.zone_enters() as u64);
        m.add(&m.zone_exits, ctx.zone_exits() as u64);
        m.add(&m.line_crossings, ctx.line_crossings() as u64);
        m.add(&m.duplicates_suppressed, ctx.duplicates_suppressed as u64);
        m.set(&m.last_frame_number, ctx.frame_number);
        m.set(&m.frame_time_us, started.elapsed().as_micros() as u64);

        Ok(ctx)
    }

    fn check_batch(&self, batch: &FrameBatch) -> Result<(), InputError> {
        if let Some(last) = self.last_frame {
            if batch.frame_number < last {
                return Err(InputError::OutOfOrder {
                    frame_number: batch.frame_number,
                    last_frame: last,
                });
            }
        }
        for det in &batch.detections {
            if det.frame_number != batch.frame_number {
                return Err(InputError::MixedFrameNumbers {
                    expected: batch.frame_number,
                    found: det.frame_number,
                });
            }
            det.validate()?;
        }
        Ok(())
    }

    fn run_frame(&mut self, batch: FrameBatch) -> Result<FrameContext, WriteError> {
        let frame = batch.frame_number;
        let mut ctx = FrameContext::new(frame, self.time.timestamp_ms(frame));
        ctx.is_replay = self.last_frame == Some(frame);
        if ctx.is_replay {
            warn!("Frame {} received again, replaying idempotently", frame);
        }

        // Intake filter
        let total = batch.detections.len();
        let kept: Vec<RawDetection> = batch
            .detections
            .into_iter()
            .filter(|d| self.config.filter.accepts(d))
            .collect();
        ctx.raw_detections = kept.len();
        ctx.filtered_detections = total - kept.len();

        // Confirmation
        let update = self.confirmer.update(frame, &kept);
        if update.duplicate_raw_ids > 0 {
            debug!(
                "Frame {}: {} duplicate raw id(s), kept highest confidence",
                frame, update.duplicate_raw_ids
            );
        }
        for id in &update.newly_confirmed {
            if let Some(det) = update.confirmed.iter().find(|d| d.confirmed_id == *id) {
                self.bus.publish(PipelineEvent::IdentityConfirmed {
                    confirmed_id: *id,
                    raw_track_id: det.raw_track_id,
                    frame_number: frame,
                });
            }
        }
        for evicted in &update.evicted {
            if let Some(confirmed_id) = evicted.confirmed_id {
                self.zones.forget(confirmed_id);
            }
            self.bus.publish(PipelineEvent::IdentityEvicted {
                raw_track_id: evicted.raw_track_id,
                confirmed_id: evicted.confirmed_id,
                frame_number: frame,
            });
        }

        // Zones
        let zone_result = self.zones.update(frame, &update.confirmed, &self.time);
        ctx.inside_any_zone = zone_result.inside_any_zone;

        // Dedup + persist
        for event in zone_result.events {
            let key = event.key();
            if self.dedup.contains(&key) {
                warn!("Duplicate event {} suppressed", key);
                ctx.duplicates_suppressed += 1;
                self.bus.publish(PipelineEvent::DuplicateSuppressed { key });
                continue;
            }

            match self.sink.append(&event)? {
                Ack::Written => self.events_written += 1,
                Ack::Duplicate => warn!("Sink already holds event {}", key),
            }
            self.dedup.remember(key);
            self.bus.publish(PipelineEvent::EventPersisted(event.clone()));
            ctx.events.push(event);
        }

        // Statistics. Staged first, committed only once the frame's stats
        // rows are acknowledged too.
        let counts = FrameCounts {
            raw_detections: ctx.raw_detections as u64,
            confirmed_ids: update.confirmed.iter().map(|d| d.confirmed_id).collect(),
            inside_any_zone: ctx.inside_any_zone,
            zone_enters: ctx.zone_enters() as u64,
            zone_exits: ctx.zone_exits() as u64,
            line_crossings: ctx.line_crossings() as u64,
        };
        if let Some(staged) = self.stats.stage_frame(frame, &counts, &self.time) {
            self.write_pending_buckets()?;
            if let Some(bucket) = &staged.closed_bucket {
                if self.sink.write_bucket(bucket)? == Ack::Written {
                    self.buckets_written += 1;
                }
            }
            if self.config.statistics.write_frame_stats {
                self.sink.write_frame_stats(&staged.frame_stats)?;
            }

            self.stats.commit_frame(frame, &counts, &self.time);
            if let Some(bucket) = staged.closed_bucket {
                self.bus.publish(PipelineEvent::BucketClosed(bucket.clone()));
                ctx.closed_bucket = Some(bucket);
            }
            ctx.frame_stats = Some(staged.frame_stats);
        }

        ctx.newly_confirmed = update.newly_confirmed;
        ctx.evicted = update.evicted;
        ctx.confirmed = update.confirmed;

        if !ctx.is_replay {
            self.frames_processed += 1;
        }
        self.last_frame = Some(frame);
        Ok(ctx)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            analysis_id: self.analysis_id.clone(),
            state: self.state,
            reason: self.reason.clone(),
            frames_processed: self.frames_processed,
            last_committed_frame: self.last_frame,
            started_at: self.started_at,
            finished_at: self.finished_at,
            fps: self.config.video.fps,
            zones: self.zones.zones().len(),
            confirmed_identities: self.confirmer.total_confirmed(),
            events_written: self.events_written,
            buckets_written: self.buckets_written,
            metrics: self.metrics.summary(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
