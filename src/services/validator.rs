//! Polygon validation for closed claim paths
//!
//! Area is the shoelace area after projecting onto a local plane centered on
//! the path centroid. The sign only feeds the winding check; callers always
//! see the unsigned magnitude.

use crate::domain::types::GeoPoint;
use crate::geo::planar::{
    haversine_m, path_length_m, ring_self_intersects, signed_area, LocalProjection,
};
use crate::infra::config::ValidationConfig;
use serde::Serialize;
use std::f64::consts::PI;
use tracing::debug;

/// Ring orientation in the local east/north plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winding {
    CounterClockwise,
    Clockwise,
}

impl Winding {
    fn of(signed_area: f64) -> Self {
        if signed_area >= 0.0 {
            Winding::CounterClockwise
        } else {
            Winding::Clockwise
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Winding::CounterClockwise => "ccw",
            Winding::Clockwise => "cw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidReason {
    TooFewPoints { distinct: usize },
    AreaTooSmall { area_m2: f64, min_m2: f64 },
    ImplausibleArea { area_m2: f64, bound_m2: f64 },
    SelfIntersecting,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::TooFewPoints { .. } => "too_few_points",
            InvalidReason::AreaTooSmall { .. } => "area_too_small",
            InvalidReason::ImplausibleArea { .. } => "implausible_area",
            InvalidReason::SelfIntersecting => "self_intersecting",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationResult {
    Valid { area_m2: f64 },
    Invalid { reason: InvalidReason },
}

impl ValidationResult {
    #[inline]
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid { .. })
    }

    pub fn area_m2(&self) -> Option<f64> {
        match self {
            ValidationResult::Valid { area_m2 } => Some(*area_m2),
            ValidationResult::Invalid { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolygonValidator {
    min_area_m2: f64,
    max_area_m2: f64,
    isoperimetric_slack: f64,
}

impl PolygonValidator {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            min_area_m2: config.min_area_m2,
            max_area_m2: config.max_area_m2,
            isoperimetric_slack: config.isoperimetric_slack,
        }
    }

    /// Validate a ring, using its own perimeter as the traversal length
    pub fn validate(&self, path: &[GeoPoint]) -> ValidationResult {
        let ring = canonical_ring(path);
        let perimeter = match (ring.first(), ring.last()) {
            (Some(first), Some(last)) => path_length_m(&ring) + haversine_m(last, first),
            _ => 0.0,
        };
        self.validate_ring(&ring, perimeter)
    }

    /// Validate a ring against the distance actually walked to produce it
    pub fn validate_with_traversal(&self, path: &[GeoPoint], traversed_m: f64) -> ValidationResult {
        let ring = canonical_ring(path);
        self.validate_ring(&ring, traversed_m)
    }

    fn validate_ring(&self, ring: &[GeoPoint], traversed_m: f64) -> ValidationResult {
        let distinct = distinct_points(ring);
        if distinct < 3 {
            return invalid(InvalidReason::TooFewPoints { distinct });
        }

        let Some(projection) = LocalProjection::centered_on(ring) else {
            return invalid(InvalidReason::TooFewPoints { distinct });
        };
        let xy = projection.project_all(ring);

        if ring_self_intersects(&xy) {
            return invalid(InvalidReason::SelfIntersecting);
        }

        let signed = signed_area(&xy);
        let area_m2 = signed.abs();
        debug!(
            points = %distinct,
            area_m2 = %format!("{:.1}", area_m2),
            winding = %Winding::of(signed).as_str(),
            traversed_m = %format!("{:.1}", traversed_m),
            "polygon_measured"
        );

        if area_m2 < self.min_area_m2 {
            return invalid(InvalidReason::AreaTooSmall { area_m2, min_m2: self.min_area_m2 });
        }

        // A ring of length L encloses at most L²/4π
        let isoperimetric = self.isoperimetric_slack * traversed_m * traversed_m / (4.0 * PI);
        let bound_m2 = self.max_area_m2.min(isoperimetric);
        if area_m2 > bound_m2 {
            return invalid(InvalidReason::ImplausibleArea { area_m2, bound_m2 });
        }

        ValidationResult::Valid { area_m2 }
    }
}

fn invalid(reason: InvalidReason) -> ValidationResult {
    ValidationResult::Invalid { reason }
}

/// Drop consecutive duplicates and a trailing copy of the first point
fn canonical_ring(path: &[GeoPoint]) -> Vec<GeoPoint> {
    let mut ring: Vec<GeoPoint> = Vec::with_capacity(path.len());
    for p in path {
        if ring.last().map_or(true, |last| (last.lat, last.lon) != (p.lat, p.lon)) {
            ring.push(*p);
        }
    }
    while ring.len() > 1 && ring.first().map(|f| (f.lat, f.lon)) == ring.last().map(|l| (l.lat, l.lon)) {
        ring.pop();
    }
    ring
}

/// Number of distinct coordinates, wherever they repeat along the ring
fn distinct_points(ring: &[GeoPoint]) -> usize {
    let mut keys: Vec<(u64, u64)> = ring.iter().map(|p| (p.lat.to_bits(), p.lon.to_bits())).collect();
    keys.sort_unstable();
    keys.dedup();
    keys.len()
}
