// src/error.rs
//
// Error taxonomy for the library surface. Configuration problems are
// caught before a run starts, input contract violations are fatal for the
// frame that carries them, and sink failures are split into transient
// (retried) and permanent (run fails, acknowledged events stay).

use thiserror::Error;

use crate::pipeline::RunState;

/// Problems with the zone configuration. Raised at load time only.
#[derive(Error, Debug)]
pub enum ZoneError {
    #[error("failed to read zone file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse zone file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("polygon zone '{zone_id}' needs at least 3 distinct points, got {count}")]
    TooFewPolygonPoints { zone_id: String, count: usize },

    #[error("line zone '{zone_id}' needs exactly 2 points, got {count}")]
    WrongLinePointCount { zone_id: String, count: usize },

    #[error("line zone '{zone_id}' has identical endpoints")]
    DegenerateLine { zone_id: String },

    #[error("zone '{zone_id}' has a non-finite coordinate")]
    NonFiniteCoordinate { zone_id: String },

    #[error("zone id '{zone_id}' is defined more than once")]
    DuplicateZoneId { zone_id: String },
}

/// Violations of the detector input contract.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("frame {frame_number} arrived after frame {last_frame}")]
    OutOfOrder { frame_number: u64, last_frame: u64 },

    #[error("frame {frame_number}, raw track {raw_track_id}: {reason}")]
    MalformedDetection {
        frame_number: u64,
        raw_track_id: i64,
        reason: String,
    },

    #[error("detection tagged with frame {found} inside the batch for frame {expected}")]
    MixedFrameNumbers { expected: u64, found: u64 },
}

/// Failure reported by a persistence sink.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    #[error("transient sink failure: {0}")]
    Transient(String),

    #[error("permanent sink failure: {0}")]
    Permanent(String),

    #[error("sink still failing after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl WriteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteError::Transient(_))
    }
}

impl From<std::io::Error> for WriteError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                WriteError::Transient(err.to_string())
            }
            _ => WriteError::Permanent(err.to_string()),
        }
    }
}

impl From<csv::Error> for WriteError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            if let csv::ErrorKind::Io(io) = err.into_kind() {
                return WriteError::from(io);
            }
            return WriteError::Permanent("csv i/o error".to_string());
        }
        WriteError::Permanent(err.to_string())
    }
}

/// Failure of the external detector feed.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("detector feed i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed detector record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("detector reported failure: {0}")]
    Detector(String),
}

/// Everything the orchestrator can surface to its caller.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Sink(#[from] WriteError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot {action} while {state:?}")]
    InvalidTransition { state: RunState, action: &'static str },
}
