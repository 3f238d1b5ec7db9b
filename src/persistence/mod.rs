// src/persistence/mod.rs
//
// Sink interface for events and statistics, plus a retrying wrapper.
//
// Contract for implementations:
//   - `append` is idempotent on the event key: a second write of the same
//     key returns `Ack::Duplicate` and creates no record
//   - An `Ack` is only returned once the record is durable for that sink
//   - Buckets are idempotent on `bucket_start_ms`, frame rows on
//     `frame_number`; the first write wins
//   - Errors are classified Transient (worth retrying) or Permanent

pub mod csv_writer;
pub mod memory;

pub use csv_writer::CsvSink;
pub use memory::MemorySink;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::WriteError;
use crate::types::{Event, FrameStats, RetryConfig, StatBucket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Written,
    Duplicate,
}

pub trait EventSink: Send {
    fn append(&mut self, event: &Event) -> Result<Ack, WriteError>;

    /// Per-event idempotency still applies inside a batch.
    fn append_batch(&mut self, events: &[Event]) -> Result<Vec<Ack>, WriteError> {
        events.iter().map(|e| self.append(e)).collect()
    }

    fn write_bucket(&mut self, bucket: &StatBucket) -> Result<Ack, WriteError>;

    fn write_frame_stats(&mut self, stats: &FrameStats) -> Result<Ack, WriteError>;

    fn flush(&mut self) -> Result<(), WriteError>;
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn append(&mut self, event: &Event) -> Result<Ack, WriteError> {
        (**self).append(event)
    }

    fn append_batch(&mut self, events: &[Event]) -> Result<Vec<Ack>, WriteError> {
        (**self).append_batch(events)
    }

    fn write_bucket(&mut self, bucket: &StatBucket) -> Result<Ack, WriteError> {
        (**self).write_bucket(bucket)
    }

    fn write_frame_stats(&mut self, stats: &FrameStats) -> Result<Ack, WriteError> {
        (**self).write_frame_stats(stats)
    }

    fn flush(&mut self) -> Result<(), WriteError> {
        (**self).flush()
    }
}

// ============================================================================
// RETRY
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
            multiplier: cfg.backoff_multiplier,
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
        }
    }
}

/// Retries transient failures of the inner sink with exponential backoff.
/// Permanent errors pass through untouched.
pub struct RetryingSink<S> {
    inner: S,
    policy: RetryPolicy,
    retries: Arc<AtomicU64>,
}

impl<S: EventSink> RetryingSink<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            retries: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count retries into an externally owned counter (e.g. pipeline metrics).
    pub fn with_retry_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.retries = counter;
        self
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn with_retry<T>(
        &mut self,
        what: &str,
        mut op: impl FnMut(&mut S) -> Result<T, WriteError>,
    ) -> Result<T, WriteError> {
        let mut attempt = 0;
        loop {
            match op(&mut self.inner) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if attempt >= self.policy.max_retries {
                        error!("Sink {} failed after {} attempts: {}", what, attempt + 1, err);
                        return Err(WriteError::RetriesExhausted {
                            attempts: attempt + 1,
                            last: err.to_string(),
                        });
                    }
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "Sink {} failed ({}), retry {}/{} in {:?}",
                        what,
                        err,
                        attempt + 1,
                        self.policy.max_retries,
                        delay
                    );
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<S: EventSink> EventSink for RetryingSink<S> {
    fn append(&mut self, event: &Event) -> Result<Ack, WriteError> {
        self.with_retry("append", |s| s.append(event))
    }

    fn append_batch(&mut self, events: &[Event]) -> Result<Vec<Ack>, WriteError> {
        // Per event, so an acknowledged prefix is never retried as a whole
        events
            .iter()
            .map(|e| self.with_retry("append", |s| s.append(e)))
            .collect()
    }

    fn write_bucket(&mut self, bucket: &StatBucket) -> Result<Ack, WriteError> {
        self.with_retry("write_bucket", |s| s.write_bucket(bucket))
    }

    fn write_frame_stats(&mut self, stats: &FrameStats) -> Result<Ack, WriteError> {
        self.with_retry("write_frame_stats", |s| s.write_frame_stats(stats))
    }

    fn flush(&mut self) -> Result<(), WriteError> {
        self.with_retry("flush", |s| s.flush())
    }
}

// ============================================================================
// TESTS
// ============================================================================
