// src/analysis/mod.rs
//
// Per-frame identity and zone analysis.
//
// Signal flow:
//   RawDetection → track_confirmation → ConfirmedDetection
//                                     → zone_tracker → Event
//
// Both stages keep their state between frames and are driven by
// pipeline::orchestrator::FrameOrchestrator.

pub mod track_confirmation;
pub mod zone_tracker;

pub use track_confirmation::{ConfirmationUpdate, EvictedTrack, TrackConfirmer, TrackState};
pub use zone_tracker::{LineSide, MembershipRecord, ZoneFrameResult, ZoneTracker};
