// src/lib.rs
//
// zonewatch: turns per-frame detector/tracker output into confirmed
// identities, zone enter/exit and line-crossing events, and rolled-up
// statistics, persisted through an idempotent sink.

pub mod analysis;
pub mod config;
pub mod error;
pub mod feed;
pub mod geometry;
pub mod persistence;
pub mod pipeline;
pub mod run_record;
pub mod types;
pub mod zones;

pub use error::{FeedError, InputError, PipelineError, WriteError, ZoneError};
pub use feed::{DetectionFeed, JsonlFeed, VecFeed};
pub use geometry::{Point, Side};
pub use persistence::{Ack, CsvSink, EventSink, MemorySink, RetryPolicy, RetryingSink};
pub use pipeline::{FrameOrchestrator, PipelineRunner, RunHandle, RunState, RunSummary};
pub use types::{Config, Event, EventType, FrameBatch, RawDetection, StatBucket};
pub use zones::{load_zones, Zone, ZoneKind, ZoneShape};
