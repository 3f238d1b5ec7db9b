// src/pipeline/mod.rs

pub mod dedup;
pub mod event_bus;
pub mod frame_context;
pub mod metrics;
pub mod orchestrator;
pub mod runner;
pub mod statistics;

pub use dedup::EventDeduplicator;
pub use event_bus::{EventBus, PipelineEvent};
pub use frame_context::FrameContext;
pub use metrics::{MetricsSummary, PipelineMetrics};
pub use orchestrator::{FrameOrchestrator, RunState, RunSummary};
pub use runner::{Observer, PipelineRunner, RunHandle};
pub use statistics::{FrameCommit, FrameCounts, StatsAggregator};
