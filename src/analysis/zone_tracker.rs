// src/analysis/zone_tracker.rs
//
// Per-identity zone membership and directed line crossings.
//
// Every confirmed identity carries one membership record per zone, created
// the first time it is evaluated:
//   - Polygon: `inside`, starting false, so the first evaluated frame can
//     only produce an Enter
//   - Line: last known side, starting Unknown; the first definite side is
//     recorded silently
//
// A centroid exactly on a line neither updates the stored side nor emits,
// so a straddle Left → OnLine → Left is not a crossing and
// Left → OnLine → Right is exactly one.
//
// Identities that are not visible on a frame keep their records untouched;
// transitions on reappearance are computed against the last known state.

use std::collections::HashMap;
use tracing::info;

use crate::geometry::{line_side, point_in_polygon, Point, Side};
use crate::types::{ConfirmedDetection, CrossingDirection, Event, EventType, TimeBase};
use crate::zones::{Zone, ZoneShape};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSide {
    Unknown,
    Left,
    Right,
}

impl LineSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipRecord {
    Polygon { inside: bool },
    Line { side: LineSide },
}

impl MembershipRecord {
    fn initial(zone: &Zone) -> Self {
        match zone.shape {
            ZoneShape::Polygon(_) => Self::Polygon { inside: false },
            ZoneShape::Line { .. } => Self::Line {
                side: LineSide::Unknown,
            },
        }
    }
}

/// Result of evaluating one frame's confirmed detections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneFrameResult {
    pub events: Vec<Event>,
    /// Confirmed identities on this frame inside at least one polygon
    pub inside_any_zone: u64,
}

// ============================================================================
// TRACKER
// ============================================================================

pub struct ZoneTracker {
    zones: Vec<Zone>,
    /// confirmed_id → one record per zone, indexed like `zones`
    memberships: HashMap<u64, Vec<MembershipRecord>>,
    last_frame: Option<u64>,
}

impl ZoneTracker {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self {
            zones,
            memberships: HashMap::new(),
            last_frame: None,
        }
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Evaluate every confirmed detection against every zone, in zone order.
    ///
    /// A repeated frame number is evaluated read-only: `inside_any_zone` is
    /// reported but no record changes and no event is emitted.
    pub fn update(
        &mut self,
        frame_number: u64,
        detections: &[ConfirmedDetection],
        time: &TimeBase,
    ) -> ZoneFrameResult {
        let mut result = ZoneFrameResult::default();

        if self.last_frame == Some(frame_number) {
            result.inside_any_zone = detections
                .iter()
                .filter(|d| self.is_inside_any(d.centroid))
                .count() as u64;
            return result;
        }
        self.last_frame = Some(frame_number);

        let timestamp_ms = time.timestamp_ms(frame_number);
        let timestamp = time.wall_clock(timestamp_ms);

        for det in detections {
            let zones = &self.zones;
            let records = self
                .memberships
                .entry(det.confirmed_id)
                .or_insert_with(|| zones.iter().map(MembershipRecord::initial).collect());

            let mut inside_any = false;
            for (zone, record) in zones.iter().zip(records.iter_mut()) {
                let transition = match (&zone.shape, record) {
                    (ZoneShape::Polygon(points), MembershipRecord::Polygon { inside }) => {
                        let now_inside = point_in_polygon(det.centroid, points);
                        inside_any |= now_inside;
                        let event = match (*inside, now_inside) {
                            (false, true) => Some(EventType::Enter),
                            (true, false) => Some(EventType::Exit),
                            _ => None,
                        };
                        *inside = now_inside;
                        event
                    }
                    (ZoneShape::Line { start, end }, MembershipRecord::Line { side }) => {
                        let current = line_side(det.centroid, *start, *end);
                        let event = match (*side, current) {
                            (_, Side::OnLine) => None,
                            (LineSide::Left, Side::Right) => {
                                Some(EventType::Crossing(CrossingDirection::LeftToRight))
                            }
                            (LineSide::Right, Side::Left) => {
                                Some(EventType::Crossing(CrossingDirection::RightToLeft))
                            }
                            _ => None,
                        };
                        match current {
                            Side::Left => *side = LineSide::Left,
                            Side::Right => *side = LineSide::Right,
                            Side::OnLine => {}
                        }
                        event
                    }
                    // Records are built from the same zone list
                    _ => None,
                };

                if let Some(event_type) = transition {
                    info!(
                        "📍 #{} {} {} ({}) at frame {} [{:.1}, {:.1}]",
                        det.confirmed_id,
                        event_type.as_str(),
                        zone.id,
                        zone.name,
                        frame_number,
                        det.centroid.x,
                        det.centroid.y
                    );
                    result.events.push(Event {
                        confirmed_id: det.confirmed_id,
                        zone_id: zone.id.clone(),
                        zone_name: zone.name.clone(),
                        event_type,
                        frame_number,
                        timestamp_ms,
                        timestamp,
                        position: det.centroid,
                        class_label: det.class_label.clone(),
                        confidence: det.confidence,
                    });
                }
            }

            if inside_any {
                result.inside_any_zone += 1;
            }
        }

        result
    }

    fn is_inside_any(&self, point: Point) -> bool {
        self.zones.iter().any(|zone| match &zone.shape {
            ZoneShape::Polygon(points) => point_in_polygon(point, points),
            ZoneShape::Line { .. } => false,
        })
    }

    /// Drop every record of an evicted identity. No exit is synthesized.
    pub fn forget(&mut self, confirmed_id: u64) -> bool {
        self.memberships.remove(&confirmed_id).is_some()
    }

    pub fn membership(&self, confirmed_id: u64, zone_id: &str) -> Option<MembershipRecord> {
        let index = self.zones.iter().position(|z| z.id == zone_id)?;
        self.memberships
            .get(&confirmed_id)
            .and_then(|records| records.get(index).copied())
    }

    pub fn tracked_identities(&self) -> usize {
        self.memberships.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn square_zone() -> Zone {
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

    fn horizontal_line() -> Zone {
        Zone::line(
            "line_1",
            "gate",
            Point::new(0.0, 50.0),
            Point::new(100.0, 50.0),
        )
        .unwrap()
    }

    fn vertical_line() -> Zone {
        Zone::line("line_v", "door", Point::new(0.0, 0.0), Point::new(0.0, 100.0)).unwrap()
    }

    fn confirmed(id: u64, x: f64, y: f64) -> ConfirmedDetection {
        ConfirmedDetection {
            confirmed_id: id,
            raw_track_id: id as i64 + 1000,
            class_label: "person".to_string(),
            confidence: 0.9,
            bbox: [x - 5.0, y - 5.0, x + 5.0, y + 5.0],
            centroid: Point::new(x, y),
        }
    }

    fn time() -> TimeBase {
        TimeBase::new(30.0, Utc::now())
    }

    #[test]
    fn test_first_inside_frame_is_enter() {
        let mut tracker = ZoneTracker::new(vec![square_zone()]);
        let tb = time();

        let r = tracker.update(14, &[confirmed(1, 50.0, 50.0)], &tb);
        assert_eq!(r.events.len(), 1);
        assert_eq!(r.events[0].event_type, EventType::Enter);
        assert_eq!(r.events[0].frame_number, 14);
        assert_eq!(r.inside_any_zone, 1);

        for f in 15..=30 {
            let r = tracker.update(f, &[confirmed(1, 50.0, 50.0)], &tb);
            assert!(r.events.is_empty());
        }
    }

    #[test]
    fn test_first_outside_frame_emits_nothing() {
        let mut tracker = ZoneTracker::new(vec![square_zone()]);
        let r = tracker.update(1, &[confirmed(1, 500.0, 500.0)], &time());
        assert!(r.events.is_empty());
        assert_eq!(
            tracker.membership(1, "polygon_1"),
            Some(MembershipRecord::Polygon { inside: false })
        );
    }

    #[test]
    fn test_enter_then_exit() {
        let mut tracker = ZoneTracker::new(vec![square_zone()]);
        let tb = time();
        tracker.update(1, &[confirmed(1, 150.0, 50.0)], &tb);
        let enter = tracker.update(2, &[confirmed(1, 50.0, 50.0)], &tb);
        let exit = tracker.update(3, &[confirmed(1, 150.0, 50.0)], &tb);
        assert_eq!(enter.events[0].event_type, EventType::Enter);
        assert_eq!(exit.events[0].event_type, EventType::Exit);
        assert_eq!(exit.events[0].position, Point::new(150.0, 50.0));
    }

    #[test]
    fn test_line_crossing_left_to_right() {
        let mut tracker = ZoneTracker::new(vec![horizontal_line()]);
        let tb = time();
        assert!(tracker
            .update(20, &[confirmed(1, 50.0, 40.0)], &tb)
            .events
            .is_empty());
        let r = tracker.update(21, &[confirmed(1, 50.0, 60.0)], &tb);
        assert_eq!(r.events.len(), 1);
        assert_eq!(r.events[0].frame_number, 21);
        assert_eq!(
            r.events[0].direction(),
            Some(CrossingDirection::LeftToRight)
        );
    }

    #[test]
    fn test_vertical_line_both_directions() {
        let mut tracker = ZoneTracker::new(vec![vertical_line()]);
        let tb = time();
        tracker.update(1, &[confirmed(1, 10.0, 50.0)], &tb);
        let r = tracker.update(2, &[confirmed(1, -10.0, 50.0)], &tb);
        assert_eq!(
            r.events[0].event_type,
            EventType::Crossing(CrossingDirection::LeftToRight)
        );
        let r = tracker.update(3, &[confirmed(1, 10.0, 50.0)], &tb);
        assert_eq!(
            r.events[0].event_type,
            EventType::Crossing(CrossingDirection::RightToLeft)
        );
    }

    #[test]
    fn test_on_line_straddle_is_not_a_crossing() {
        let mut tracker = ZoneTracker::new(vec![horizontal_line()]);
        let tb = time();
        let mut total = 0;
        for (f, y) in [(1, 40.0), (2, 50.0), (3, 40.0)] {
            total += tracker.update(f, &[confirmed(1, 50.0, y)], &tb).events.len();
        }
        assert_eq!(total, 0);
    }

    #[test]
    fn test_crossing_through_line_counts_once() {
        let mut tracker = ZoneTracker::new(vec![horizontal_line()]);
        let tb = time();
        let mut events = Vec::new();
        for (f, y) in [(1, 40.0), (2, 50.0), (3, 50.0), (4, 60.0), (5, 61.0)] {
            events.extend(tracker.update(f, &[confirmed(1, 50.0, y)], &tb).events);
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].frame_number, 4);
    }

    #[test]
    fn test_first_observation_on_line_stays_unknown() {
        let mut tracker = ZoneTracker::new(vec![horizontal_line()]);
        let tb = time();
        tracker.update(1, &[confirmed(1, 50.0, 50.0)], &tb);
        assert_eq!(
            tracker.membership(1, "line_1"),
            Some(MembershipRecord::Line {
                side: LineSide::Unknown
            })
        );
        assert!(tracker
            .update(2, &[confirmed(1, 50.0, 60.0)], &tb)
            .events
            .is_empty());
    }

    #[test]
    fn test_gap_compares_against_last_known_state() {
        let mut tracker = ZoneTracker::new(vec![square_zone(), horizontal_line()]);
        let tb = time();
        tracker.update(1, &[confirmed(1, 50.0, 40.0)], &tb);
        for f in 2..=10 {
            tracker.update(f, &[], &tb);
        }
        let r = tracker.update(11, &[confirmed(1, 150.0, 60.0)], &tb);
        let types: Vec<EventType> = r.events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::Exit,
                EventType::Crossing(CrossingDirection::LeftToRight)
            ]
        );
    }

    #[test]
    fn test_zones_are_independent() {
        let right = Zone::polygon(
            "polygon_2",
            "right",
            vec![
                Point::new(100.0, 0.0),
                Point::new(200.0, 0.0),
                Point::new(200.0, 100.0),
                Point::new(100.0, 100.0),
            ],
        )
        .unwrap();
        let mut tracker = ZoneTracker::new(vec![square_zone(), right]);
        let tb = time();
        tracker.update(1, &[confirmed(1, 50.0, 50.0)], &tb);
        let r = tracker.update(2, &[confirmed(1, 150.0, 50.0)], &tb);
        assert_eq!(r.events.len(), 2);
        assert_eq!(r.events[0].zone_id, "polygon_1");
        assert_eq!(r.events[0].event_type, EventType::Exit);
        assert_eq!(r.events[1].zone_id, "polygon_2");
        assert_eq!(r.events[1].event_type, EventType::Enter);
    }

    #[test]
    fn test_forget_restarts_from_scratch() {
        let mut tracker = ZoneTracker::new(vec![square_zone()]);
        let tb = time();
        tracker.update(1, &[confirmed(1, 50.0, 50.0)], &tb);
        assert!(tracker.forget(1));
        assert_eq!(tracker.tracked_identities(), 0);
        let r = tracker.update(2, &[confirmed(1, 50.0, 50.0)], &tb);
        assert_eq!(r.events[0].event_type, EventType::Enter);
    }

    #[test]
    fn test_replayed_frame_emits_nothing() {
        let mut tracker = ZoneTracker::new(vec![square_zone()]);
        let tb = time();
        tracker.update(1, &[confirmed(1, 150.0, 50.0)], &tb);
        let first = tracker.update(2, &[confirmed(1, 50.0, 50.0)], &tb);
        let replay = tracker.update(2, &[confirmed(1, 50.0, 50.0)], &tb);
        assert_eq!(first.events.len(), 1);
        assert!(replay.events.is_empty());
        assert_eq!(replay.inside_any_zone, 1);
    }

    // ------------------------------------------------------------------------
    // Sequence properties
    // ------------------------------------------------------------------------

    fn position_strategy() -> impl Strategy<Value = Option<(f64, f64)>> {
        prop_oneof![
            1 => Just(None),
            3 => (-50.0f64..150.0, -50.0f64..150.0).prop_map(Some),
        ]
    }

    proptest! {
        #[test]
        fn prop_enter_exit_strictly_alternate(
            positions in prop::collection::vec(position_strategy(), 1..80)
        ) {
            let mut tracker = ZoneTracker::new(vec![square_zone()]);
            let tb = time();
            let mut kinds = Vec::new();
            for (i, pos) in positions.iter().enumerate() {
                let dets: Vec<ConfirmedDetection> =
                    pos.iter().map(|(x, y)| confirmed(1, *x, *y)).collect();
                for e in tracker.update(i as u64 + 1, &dets, &tb).events {
                    kinds.push(e.event_type);
                }
            }
            for (i, kind) in kinds.iter().enumerate() {
                let expected = if i % 2 == 0 { EventType::Enter } else { EventType::Exit };
                prop_assert_eq!(*kind, expected);
            }
        }

        #[test]
        fn prop_crossings_follow_definite_side_changes(
            sides in prop::collection::vec(0u8..3, 1..80)
        ) {
            // 0 = left (y=40), 1 = on line (y=50), 2 = right (y=60)
            let mut tracker = ZoneTracker::new(vec![horizontal_line()]);
            let tb = time();
            let mut crossings = 0usize;
            for (i, s) in sides.iter().enumerate() {
                let y = 40.0 + 10.0 * *s as f64;
                let events = tracker.update(i as u64 + 1, &[confirmed(1, 50.0, y)], &tb).events;
                if *s == 1 {
                    prop_assert!(events.is_empty());
                }
                crossings += events.len();
            }

            let definite: Vec<u8> = sides.iter().copied().filter(|s| *s != 1).collect();
            let expected = definite.windows(2).filter(|w| w[0] != w[1]).count();
            prop_assert_eq!(crossings, expected);
        }
    }
}
