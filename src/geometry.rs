// src/geometry.rs
//
// Pure 2D predicates used by the zone tracker. Everything here is
// stateless and deterministic for a given set of floating-point inputs.
//
// Coordinates are image coordinates: x grows to the right, y grows
// downward. The side convention for directed lines follows from that
// (see `line_side`).

use serde::{Deserialize, Serialize};

/// Tolerance applied to the cross product, scaled by the line length, so
/// that `OnLine` means "within ~1e-9 px of the infinite line".
const ON_LINE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Which side of a directed line `p1 → p2` a point lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
    OnLine,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::OnLine => "ON_LINE",
        }
    }
}

// ============================================================================
// POLYGON MEMBERSHIP
// ============================================================================

/// Drops a trailing point that repeats the first one. Polygons are always
/// closed implicitly, so an explicit closing vertex would add a zero-length
/// edge.
pub fn open_ring(polygon: &[Point]) -> &[Point] {
    match (polygon.first(), polygon.last()) {
        (Some(first), Some(last)) if polygon.len() > 1 && first == last => {
            &polygon[..polygon.len() - 1]
        }
        _ => polygon,
    }
}

/// Crossing-number test with a half-open rule on each edge: an edge counts
/// when exactly one endpoint lies strictly below the horizontal through
/// `point`, and the crossing is strictly to the right of `point`.
///
/// Points on the boundary get a fixed answer for a fixed input (left/top
/// edges tend to classify as inside, right/bottom edges as outside), which
/// is all the membership tracker needs for stable transitions.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    let ring = open_ring(polygon);
    if ring.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let a = ring[j];
        let b = ring[i];
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = a.x + (point.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

// ============================================================================
// DIRECTED LINE SIDE
// ============================================================================

/// Sign of `(p2 - p1) × (point - p1)`.
///
/// With y pointing down, a negative cross product puts the point on the
/// left of the direction of travel `p1 → p2` and a positive one on the
/// right. For the line `(0,50) → (100,50)` that makes `(50,40)` Left and
/// `(50,60)` Right.
pub fn line_side(point: Point, p1: Point, p2: Point) -> Side {
    let dx = p2.x - p1.x;
    let dy = p2.y - p1.y;
    let cross = dx * (point.y - p1.y) - dy * (point.x - p1.x);
    let tolerance = ON_LINE_EPSILON * dx.hypot(dy).max(1.0);

    if cross.abs() <= tolerance {
        Side::OnLine
    } else if cross < 0.0 {
        Side::Left
    } else {
        Side::Right
    }
}

// ============================================================================
// TESTS
// ============================================================================
