// src/main.rs

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use zonewatch::run_record;
use zonewatch::{
    load_zones, Config, CsvSink, JsonlFeed, PipelineRunner, RetryPolicy, RetryingSink, RunState,
};

#[derive(Parser, Debug)]
#[command(name = "zonewatch", version, about = "Zone and line-crossing events from tracker output")]
struct Args {
    /// Pipeline configuration (YAML)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Zone definitions (JSON or YAML)
    #[arg(long)]
    zones: PathBuf,

    /// Detector output, one JSON object per frame
    #[arg(long)]
    detections: PathBuf,

    /// Overrides persistence.output_dir
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Overrides runner.timeout_secs
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Overrides persistence.analysis_id. Without either, an unfinished run
    /// in the output directory is resumed, otherwise a new id is generated.
    #[arg(long)]
    analysis_id: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("zonewatch={}", config.logging.level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🎯 Zone event pipeline starting");
    info!("✓ Configuration loaded from {}", args.config.display());

    if let Some(dir) = &args.output_dir {
        config.persistence.output_dir = dir.display().to_string();
    }
    if let Some(secs) = args.timeout_secs {
        config.runner.timeout_secs = Some(secs);
    }
    if let Some(id) = &args.analysis_id {
        config.persistence.analysis_id = Some(id.clone());
    }
    let output_dir = PathBuf::from(&config.persistence.output_dir);
    let analysis_id = match config.persistence.analysis_id.clone() {
        Some(id) => id,
        None => run_record::interrupted_analysis_id(&output_dir)?
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
    };
    config.persistence.analysis_id = Some(analysis_id.clone());

    info!(
        "Confirmation: {} hits, evict after {} missed frames; buckets of {}s at {} fps",
        config.confirmation.confirm_hits,
        config.confirmation.max_missed_frames,
        config.statistics.bucket_seconds,
        config.video.fps
    );

    let zones = load_zones(&args.zones)
        .with_context(|| format!("Failed to load zones from {}", args.zones.display()))?;

    let feed = JsonlFeed::open(&args.detections)
        .with_context(|| format!("Failed to open detections {}", args.detections.display()))?;

    let csv = CsvSink::open(&output_dir, analysis_id.as_str())
        .with_context(|| format!("Failed to open output directory {}", output_dir.display()))?;

    let runner = PipelineRunner::new(config.clone(), zones);
    let sink = RetryingSink::new(csv, RetryPolicy::from(&config.persistence.retry))
        .with_retry_counter(runner.metrics().sink_retries.clone());
    if let Some(secs) = config.runner.timeout_secs {
        info!("⏱️  Run timeout: {:?}", Duration::from_secs(secs));
    }

    run_record::mark_started(&output_dir, &analysis_id)?;
    let summary = runner.run(feed, sink);
    let record_path = run_record::write_summary(&output_dir, &summary)?;

    info!("\n========================================");
    info!("Analysis {} {}", summary.analysis_id, summary.state.as_str());
    info!("========================================");
    info!("  Frames processed: {}", summary.frames_processed);
    info!("  Confirmed identities: {}", summary.confirmed_identities);
    info!("  Zone enters: {}", summary.metrics.zone_enters);
    info!("  Zone exits: {}", summary.metrics.zone_exits);
    info!("  Line crossings: {}", summary.metrics.line_crossings);
    info!("  Events written: {}", summary.events_written);
    info!("  Buckets written: {}", summary.buckets_written);
    info!("  Sink retries: {}", summary.metrics.sink_retries);
    info!("  Processing rate: {:.1} fps", summary.metrics.fps);
    info!("  Run record: {}", record_path.display());

    if summary.state == RunState::Failed {
        let reason = summary.reason.unwrap_or_else(|| "unknown".to_string());
        error!("❌ Run failed: {}", reason);
        bail!("run failed: {}", reason);
    }
    Ok(())
}
