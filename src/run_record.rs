// src/run_record.rs
//
// `analysis.json`, kept next to the CSV output. A run marks it "running"
// before the first frame and replaces it with its RunSummary at the end.
// A record still in "running" means the previous run never finished; its
// analysis id is reused so the replayed rows match the keys already on
// disk and are not written twice.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::pipeline::{RunState, RunSummary};

pub const RUN_RECORD_FILE: &str = "analysis.json";

#[derive(Debug, Serialize, Deserialize)]
struct RunRecordHead {
    analysis_id: String,
    state: RunState,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
}

pub fn record_path(dir: &Path) -> PathBuf {
    dir.join(RUN_RECORD_FILE)
}

/// Analysis id of a run in `dir` that started but never reached a final
/// state, if any.
pub fn interrupted_analysis_id(dir: &Path) -> Result<Option<String>> {
    let path = record_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("reading run record {}", path.display()))?;
    let head: RunRecordHead = serde_json::from_str(&contents)
        .with_context(|| format!("parsing run record {}", path.display()))?;

    if head.state.is_terminal() {
        return Ok(None);
    }
    warn!(
        "Analysis {} in {} never finished (started {:?}), resuming it",
        head.analysis_id,
        dir.display(),
        head.started_at
    );
    Ok(Some(head.analysis_id))
}

pub fn mark_started(dir: &Path, analysis_id: &str) -> Result<PathBuf> {
    let head = RunRecordHead {
        analysis_id: analysis_id.to_string(),
        state: RunState::Running,
        started_at: Some(Utc::now()),
    };
    write_record(dir, &serde_json::to_string_pretty(&head)?)
}

pub fn write_summary(dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    write_record(dir, &serde_json::to_string_pretty(summary)?)
}

// Replace via rename so a crash never leaves half a record behind.
fn write_record(dir: &Path, contents: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = record_path(dir);
    let tmp = dir.join(format!("{}.tmp", RUN_RECORD_FILE));
    fs::write(&tmp, contents).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use crate::persistence::csv_writer::ZONE_EVENTS_FILE;
    use crate::persistence::CsvSink;
    use crate::pipeline::FrameOrchestrator;
    use crate::types::{Config, FrameBatch, RawDetection};
    use crate::zones::Zone;

    fn square() -> Zone {
        Zone::polygon(
            "polygon_1",
            "square",
            vec![
                Point::new(0.0, 0.0),
                Point::new(100.0, 0.0),
                Point::new(100.0, 100.0),
                Point::new(0.0, 100.0),
            ],
        )
        .unwrap()
    }

    fn inside(frame: u64) -> FrameBatch {
        FrameBatch::new(
            frame,
            vec![RawDetection {
                frame_number: frame,
                raw_track_id: 1,
                class_label: "person".to_string(),
                confidence: 0.9,
                bbox: [45.0, 45.0, 55.0, 55.0],
                centroid: Point::new(50.0, 50.0),
            }],
        )
    }

    fn orchestrator(dir: &Path, analysis_id: &str) -> FrameOrchestrator<CsvSink> {
        let mut config = Config::default();
        config.persistence.analysis_id = Some(analysis_id.to_string());
        let sink = CsvSink::open(dir, analysis_id).unwrap();
        let mut orch = FrameOrchestrator::new(config, vec![square()], sink);
        orch.start().unwrap();
        orch
    }

    #[test]
    fn test_no_record_means_nothing_to_resume() {
        let dir = tempfile::tempdir().unwrap();
        assert!(interrupted_analysis_id(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_running_record_is_resumed_until_summary_written() {
        let dir = tempfile::tempdir().unwrap();
        mark_started(dir.path(), "run-7").unwrap();
        assert_eq!(
            interrupted_analysis_id(dir.path()).unwrap().as_deref(),
            Some("run-7")
        );

        let mut orch = orchestrator(dir.path(), "run-7");
        let summary = orch.complete().unwrap();
        write_summary(dir.path(), &summary).unwrap();
        assert!(interrupted_analysis_id(dir.path()).unwrap().is_none());
        assert!(!dir.path().join("analysis.json.tmp").exists());
    }

    #[test]
    fn test_interrupted_run_replayed_without_duplicate_rows() {
        let dir = tempfile::tempdir().unwrap();

        mark_started(dir.path(), "run-1").unwrap();
        {
            let mut orch = orchestrator(dir.path(), "run-1");
            for f in 1..=6 {
                orch.process_frame(inside(f)).unwrap();
            }
            // dropped without stop or complete
        }

        let resumed = interrupted_analysis_id(dir.path()).unwrap().unwrap();
        assert_eq!(resumed, "run-1");

        let mut orch = orchestrator(dir.path(), &resumed);
        for f in 1..=6 {
            orch.process_frame(inside(f)).unwrap();
        }
        let summary = orch.complete().unwrap();
        assert_eq!(summary.events_written, 0);
        write_summary(dir.path(), &summary).unwrap();

        let rows = fs::read_to_string(dir.path().join(ZONE_EVENTS_FILE)).unwrap();
        assert_eq!(rows.lines().count(), 2);
        assert!(rows.contains("enter"));
    }
}
