// src/analysis/track_confirmation.rs
//
// Promotes noisy raw tracker ids to stable confirmed identities.
//
// Design:
//   - One TrackState per raw id, created on first sighting
//   - consecutive_hits counts processed frames in a row; a miss resets it
//   - Confirmation happens the frame hits reach `confirm_hits`; the
//     confirmed_id is drawn from a run-wide counter and never reused
//   - Once confirmed a raw id stays confirmed through gaps until evicted
//   - Eviction after more than `max_missed_frames` consecutive misses; a
//     raw id seen again after eviction starts over as a new identity
//   - Skipped frame numbers are not misses; only processed frames count

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::geometry::Point;
use crate::types::{ConfirmationConfig, ConfirmedDetection, RawDetection};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TrackState {
    pub raw_track_id: i64,
    pub consecutive_hits: u32,
    pub missed_frames: u32,
    pub confirmed: bool,
    pub confirmed_id: Option<u64>,
    pub last_seen_frame: u64,
    pub class_label: String,
    pub last_centroid: Point,
}

impl TrackState {
    fn new(det: &RawDetection) -> Self {
        Self {
            raw_track_id: det.raw_track_id,
            consecutive_hits: 1,
            missed_frames: 0,
            confirmed: false,
            confirmed_id: None,
            last_seen_frame: det.frame_number,
            class_label: det.class_label.clone(),
            last_centroid: det.centroid,
        }
    }

    fn update_with_detection(&mut self, det: &RawDetection) {
        self.consecutive_hits += 1;
        self.missed_frames = 0;
        self.last_seen_frame = det.frame_number;
        self.class_label = det.class_label.clone();
        self.last_centroid = det.centroid;
    }

    fn mark_missed(&mut self) {
        self.consecutive_hits = 0;
        self.missed_frames += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictedTrack {
    pub raw_track_id: i64,
    pub confirmed_id: Option<u64>,
}

/// What one frame did to the confirmation state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfirmationUpdate {
    /// Confirmed detections of this frame, ordered by confirmed_id
    pub confirmed: Vec<ConfirmedDetection>,
    /// confirmed_ids assigned on this frame
    pub newly_confirmed: Vec<u64>,
    pub evicted: Vec<EvictedTrack>,
    /// Raw ids that appeared more than once in the batch
    pub duplicate_raw_ids: usize,
}

// ============================================================================
// CONFIRMER
// ============================================================================

pub struct TrackConfirmer {
    config: ConfirmationConfig,
    tracks: HashMap<i64, TrackState>,
    next_confirmed_id: u64,
    last_frame: Option<u64>,
}

impl TrackConfirmer {
    pub fn new(config: ConfirmationConfig) -> Self {
        Self {
            config,
            tracks: HashMap::with_capacity(64),
            next_confirmed_id: 1,
            last_frame: None,
        }
    }

    /// Process one frame's detections (already validated and in order).
    ///
    /// Re-processing the last frame number leaves the state untouched and
    /// only reports which detections of the batch are currently confirmed.
    pub fn update(&mut self, frame_number: u64, detections: &[RawDetection]) -> ConfirmationUpdate {
        let (best, duplicate_raw_ids) = best_per_raw_id(detections);

        if self.last_frame == Some(frame_number) {
            return ConfirmationUpdate {
                confirmed: self.collect_confirmed(&best),
                duplicate_raw_ids,
                ..Default::default()
            };
        }
        self.last_frame = Some(frame_number);

        let mut update = ConfirmationUpdate {
            duplicate_raw_ids,
            ..Default::default()
        };

        for det in best.values() {
            let track = self
                .tracks
                .entry(det.raw_track_id)
                .and_modify(|t| t.update_with_detection(det))
                .or_insert_with(|| TrackState::new(det));

            if !track.confirmed && track.consecutive_hits >= self.config.confirm_hits {
                let id = self.next_confirmed_id;
                self.next_confirmed_id += 1;
                track.confirmed = true;
                track.confirmed_id = Some(id);
                update.newly_confirmed.push(id);
                debug!(
                    "✅ Raw track {} confirmed as #{} at frame {} (class={})",
                    track.raw_track_id, id, frame_number, track.class_label
                );
            }
        }

        let max_missed = self.config.max_missed_frames;
        let mut evicted = Vec::new();
        self.tracks.retain(|raw_id, track| {
            if best.contains_key(raw_id) {
                return true;
            }
            track.mark_missed();
            if track.missed_frames > max_missed {
                debug!(
                    "🗑️  Raw track {} evicted after {} missed frames (confirmed_id={:?})",
                    raw_id, track.missed_frames, track.confirmed_id
                );
                evicted.push(EvictedTrack {
                    raw_track_id: *raw_id,
                    confirmed_id: track.confirmed_id,
                });
                return false;
            }
            true
        });
        evicted.sort_by_key(|e| e.raw_track_id);

        update.newly_confirmed.sort_unstable();
        update.confirmed = self.collect_confirmed(&best);
        update.evicted = evicted;
        update
    }

    fn collect_confirmed(&self, best: &BTreeMap<i64, &RawDetection>) -> Vec<ConfirmedDetection> {
        let mut confirmed: Vec<ConfirmedDetection> = best
            .values()
            .filter_map(|det| {
                let track = self.tracks.get(&det.raw_track_id)?;
                let confirmed_id = track.confirmed_id?;
                Some(ConfirmedDetection {
                    confirmed_id,
                    raw_track_id: det.raw_track_id,
                    class_label: det.class_label.clone(),
                    confidence: det.confidence,
                    bbox: det.bbox,
                    centroid: det.centroid,
                })
            })
            .collect();
        confirmed.sort_by_key(|c| c.confirmed_id);
        confirmed
    }

    pub fn track(&self, raw_track_id: i64) -> Option<&TrackState> {
        self.tracks.get(&raw_track_id)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn confirmed_count(&self) -> usize {
        self.tracks.values().filter(|t| t.confirmed).count()
    }

    /// Number of confirmed ids handed out so far.
    pub fn total_confirmed(&self) -> u64 {
        self.next_confirmed_id - 1
    }
}

/// Keeps the highest-confidence detection per raw id. Ties keep the first.
/// Ordered by raw id so simultaneous confirmations get ids deterministically.
fn best_per_raw_id(detections: &[RawDetection]) -> (BTreeMap<i64, &RawDetection>, usize) {
    let mut best: BTreeMap<i64, &RawDetection> = BTreeMap::new();
    let mut duplicates = 0;
    for det in detections {
        match best.get(&det.raw_track_id).map(|e| e.confidence) {
            Some(existing_confidence) => {
                duplicates += 1;
                debug!(
                    "Raw track {} appears twice in frame {}, keeping higher confidence",
                    det.raw_track_id, det.frame_number
                );
                if det.confidence > existing_confidence {
                    best.insert(det.raw_track_id, det);
                }
            }
            None => {
                best.insert(det.raw_track_id, det);
            }
        }
    }
    (best, duplicates)
}

// ============================================================================
// TESTS
// ============================================================================
