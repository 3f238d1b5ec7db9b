// src/zones.rs
//
// Zone definitions and the zone file loader.
//
// A zone file has two arrays, `polygons` and `lines`. Each entry is either
// a bare coordinate list or a named object:
//
//   {
//     "polygons": [ [[0,0],[100,0],[100,100],[0,100]] ],
//     "lines": [
//       { "id": "line_entrance", "name": "entrance", "coordinates": [[0,50],[100,50]] }
//     ]
//   }
//
// Bare entries are named `polygon_<n>` / `line_<n>` (1-based, file order).
// Zones are validated once here; the runtime never sees a degenerate shape.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::error::ZoneError;
use crate::geometry::{open_ring, Point};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneKind {
    Polygon,
    Line,
}

impl ZoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Polygon => "polygon",
            Self::Line => "line",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ZoneShape {
    /// Vertices in order, implicitly closed, without a repeated closing vertex.
    Polygon(Vec<Point>),
    /// Directed line `start → end`; sides are relative to this direction.
    Line { start: Point, end: Point },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub shape: ZoneShape,
}

impl Zone {
    pub fn polygon(
        id: impl Into<String>,
        name: impl Into<String>,
        points: Vec<Point>,
    ) -> Result<Self, ZoneError> {
        let id = id.into();
        if points.iter().any(|p| !p.is_finite()) {
            return Err(ZoneError::NonFiniteCoordinate { zone_id: id });
        }

        let ring = open_ring(&points).to_vec();
        let distinct = count_distinct(&ring);
        if distinct < 3 {
            return Err(ZoneError::TooFewPolygonPoints {
                zone_id: id,
                count: distinct,
            });
        }

        Ok(Self {
            id,
            name: name.into(),
            shape: ZoneShape::Polygon(ring),
        })
    }

    pub fn line(
        id: impl Into<String>,
        name: impl Into<String>,
        start: Point,
        end: Point,
    ) -> Result<Self, ZoneError> {
        let id = id.into();
        if !start.is_finite() || !end.is_finite() {
            return Err(ZoneError::NonFiniteCoordinate { zone_id: id });
        }
        if start == end {
            return Err(ZoneError::DegenerateLine { zone_id: id });
        }
        Ok(Self {
            id,
            name: name.into(),
            shape: ZoneShape::Line { start, end },
        })
    }

    pub fn kind(&self) -> ZoneKind {
        match self.shape {
            ZoneShape::Polygon(_) => ZoneKind::Polygon,
            ZoneShape::Line { .. } => ZoneKind::Line,
        }
    }
}

fn count_distinct(points: &[Point]) -> usize {
    let mut seen: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        if !seen.contains(p) {
            seen.push(*p);
        }
    }
    seen.len()
}

// ============================================================================
// ZONE FILE
// ============================================================================

#[derive(Debug, Deserialize)]
struct ZoneFile {
    #[serde(default)]
    polygons: Vec<ZoneEntry>,
    #[serde(default)]
    lines: Vec<ZoneEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ZoneEntry {
    Named {
        id: Option<String>,
        name: Option<String>,
        coordinates: Vec<[f64; 2]>,
    },
    Bare(Vec<[f64; 2]>),
}

impl ZoneEntry {
    fn into_parts(self, default_id: String) -> (String, String, Vec<Point>) {
        match self {
            ZoneEntry::Named {
                id,
                name,
                coordinates,
            } => {
                let id = id.unwrap_or(default_id);
                let name = name.unwrap_or_else(|| id.clone());
                (id, name, to_points(&coordinates))
            }
            ZoneEntry::Bare(coordinates) => {
                (default_id.clone(), default_id, to_points(&coordinates))
            }
        }
    }
}

fn to_points(coordinates: &[[f64; 2]]) -> Vec<Point> {
    coordinates.iter().map(|[x, y]| Point::new(*x, *y)).collect()
}

/// Load and validate zones from a `.json`, `.yaml` or `.yml` file.
///
/// Polygons come first in the returned order, then lines; the zone
/// tracker evaluates zones in this order.
pub fn load_zones(path: &Path) -> Result<Vec<Zone>, ZoneError> {
    let shown = path.display().to_string();
    let contents = std::fs::read_to_string(path).map_err(|source| ZoneError::Io {
        path: shown.clone(),
        source,
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let file: ZoneFile = if is_yaml {
        serde_yaml::from_str(&contents).map_err(|e| ZoneError::Parse {
            path: shown.clone(),
            reason: e.to_string(),
        })?
    } else {
        serde_json::from_str(&contents).map_err(|e| ZoneError::Parse {
            path: shown.clone(),
            reason: e.to_string(),
        })?
    };

    let zones = build_zones(file)?;
    info!("✓ Loaded {} zone(s) from {}", zones.len(), shown);
    Ok(zones)
}

/// Parse a zone file held in memory (JSON).
pub fn parse_zones_json(contents: &str) -> Result<Vec<Zone>, ZoneError> {
    let file: ZoneFile = serde_json::from_str(contents).map_err(|e| ZoneError::Parse {
        path: "<inline>".to_string(),
        reason: e.to_string(),
    })?;
    build_zones(file)
}

fn build_zones(file: ZoneFile) -> Result<Vec<Zone>, ZoneError> {
    let mut zones = Vec::with_capacity(file.polygons.len() + file.lines.len());

    for (i, entry) in file.polygons.into_iter().enumerate() {
        let (id, name, points) = entry.into_parts(format!("polygon_{}", i + 1));
        zones.push(Zone::polygon(id, name, points)?);
    }

    for (i, entry) in file.lines.into_iter().enumerate() {
        let (id, name, points) = entry.into_parts(format!("line_{}", i + 1));
        if points.len() != 2 {
            return Err(ZoneError::WrongLinePointCount {
                zone_id: id,
                count: points.len(),
            });
        }
        zones.push(Zone::line(id, name, points[0], points[1])?);
    }

    let mut ids = HashSet::new();
    for zone in &zones {
        if !ids.insert(zone.id.as_str()) {
            return Err(ZoneError::DuplicateZoneId {
                zone_id: zone.id.clone(),
            });
        }
    }

    Ok(zones)
}

// ============================================================================
// TESTS
// ============================================================================
