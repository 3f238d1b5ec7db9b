// src/pipeline/runner.rs
//
// Two-thread run loop:
//
//   feed thread:        DetectionFeed ──bounded queue──▶
//   processing thread:  FrameOrchestrator (owns zones, tracks, sink)
//
// The queue is bounded and sends block, so a slow sink slows the feed
// instead of dropping frames. Stop requests and the run timeout are
// checked between frames only; a frame is never abandoned halfway.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{FeedError, PipelineError};
use crate::feed::DetectionFeed;
use crate::persistence::EventSink;
use crate::pipeline::event_bus::PipelineEvent;
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::orchestrator::{FrameOrchestrator, RunSummary};
use crate::types::{Config, FrameBatch};
use crate::zones::Zone;

pub type Observer = Box<dyn FnMut(&PipelineEvent) + Send>;

enum FeedMessage {
    Batch(FrameBatch),
    End,
    Failed(FeedError),
}

/// Control surface for a run in progress. Cheap to clone and safe to
/// use from any thread.
#[derive(Clone)]
pub struct RunHandle {
    stop: Arc<AtomicBool>,
    metrics: PipelineMetrics,
}

impl RunHandle {
    /// Ask the run to stop after the frame currently being processed.
    pub fn stop(&self) {
        info!("Stop requested");
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }
}

pub struct PipelineRunner {
    config: Config,
    zones: Vec<Zone>,
    timeout: Option<Duration>,
    handle: RunHandle,
    observer: Option<Observer>,
}

impl PipelineRunner {
    pub fn new(config: Config, zones: Vec<Zone>) -> Self {
        let timeout = config.runner.timeout_secs.map(Duration::from_secs);
        Self {
            config,
            zones,
            timeout,
            handle: RunHandle {
                stop: Arc::new(AtomicBool::new(false)),
                metrics: PipelineMetrics::new(),
            },
            observer: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_observer(mut self, observer: impl FnMut(&PipelineEvent) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.handle.metrics
    }

    /// Run on the calling thread until the feed ends, a stop or timeout
    /// is observed, or the run fails. The outcome is in `summary.state`.
    pub fn run<F, S>(mut self, feed: F, sink: S) -> RunSummary
    where
        F: DetectionFeed + 'static,
        S: EventSink,
    {
        let mut orch = FrameOrchestrator::new(self.config.clone(), std::mem::take(&mut self.zones), sink)
            .with_metrics(self.handle.metrics.clone());
        if let Err(e) = orch.start() {
            return orch.fail(e.to_string());
        }

        let (tx, rx) = bounded(self.config.runner.queue_capacity.max(1));
        let producer = match thread::Builder::new()
            .name("zonewatch-feed".to_string())
            .spawn(move || produce(feed, tx))
        {
            Ok(handle) => handle,
            Err(e) => return orch.fail(format!("failed to start feed thread: {}", e)),
        };

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let poll = Duration::from_millis(self.config.runner.poll_interval_ms.max(1));

        let summary = loop {
            if self.handle.is_stop_requested() {
                break finish_stop(&mut orch, "stopped by request");
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("Run timeout reached");
                break finish_stop(&mut orch, "timeout");
            }

            match rx.recv_timeout(poll) {
                Ok(FeedMessage::Batch(batch)) => {
                    let result = orch.process_frame(batch);
                    self.notify(&mut orch);
                    if result.is_err() {
                        // the orchestrator has already moved to Failed
                        break orch.summary();
                    }
                }
                Ok(FeedMessage::End) => {
                    break orch.complete().unwrap_or_else(|_| orch.summary());
                }
                Ok(FeedMessage::Failed(e)) => {
                    break orch.fail(PipelineError::from(e).to_string());
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    break orch.fail("detection feed disconnected");
                }
            }
        };
        self.notify(&mut orch);

        drop(rx);
        if producer.join().is_err() {
            warn!("Feed thread panicked");
        }
        summary
    }

    /// Run on a dedicated processing thread.
    pub fn spawn<F, S>(self, feed: F, sink: S) -> std::io::Result<(RunHandle, JoinHandle<RunSummary>)>
    where
        F: DetectionFeed + 'static,
        S: EventSink + 'static,
    {
        let handle = self.handle();
        let join = thread::Builder::new()
            .name("zonewatch-pipeline".to_string())
            .spawn(move || self.run(feed, sink))?;
        Ok((handle, join))
    }

    fn notify<S: EventSink>(&mut self, orch: &mut FrameOrchestrator<S>) {
        let notes = orch.drain_notifications();
        if let Some(observer) = self.observer.as_mut() {
            for note in &notes {
                observer(note);
            }
        }
    }
}

fn finish_stop<S: EventSink>(orch: &mut FrameOrchestrator<S>, reason: &str) -> RunSummary {
    orch.stop_with_reason(reason)
        .unwrap_or_else(|_| orch.summary())
}

fn produce<F: DetectionFeed>(mut feed: F, tx: Sender<FeedMessage>) {
    debug!("Feed thread started");
    loop {
        let msg = match feed.next_batch() {
            Ok(Some(batch)) => FeedMessage::Batch(batch),
            Ok(None) => FeedMessage::End,
            Err(e) => FeedMessage::Failed(e),
        };
        let last = !matches!(msg, FeedMessage::Batch(_));
        if tx.send(msg).is_err() {
            debug!("Processor gone, feed thread exiting");
            return;
        }
        if last {
            return;
        }
    }
}
