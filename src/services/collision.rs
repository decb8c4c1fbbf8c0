//! Collision detection against existing territories
//!
//! All checks are pure functions over a subject (start point, partial path
//! or finished ring), the territory set and the claimant to exclude. Only
//! foreign territories are considered.
//!
//! Severity, ascending:
//! - Safe: nearest foreign boundary beyond `far_m`
//! - Caution: within `far_m`
//! - Warning: within `near_m`
//! - Danger: within `danger_m`, still outside
//! - Violation: inside a foreign boundary, or crossing one

use crate::domain::types::{GeoPoint, OwnerId, Territory, TerritoryId};
use crate::geo::planar::{
    point_in_ring, point_ring_distance, polyline_crosses_ring, Bounds, LocalProjection, Xy,
};
use crate::infra::config::CollisionConfig;
use serde::Serialize;
use tracing::{debug, warn};

/// Points closer than this to a boundary are treated as on it
const ON_BOUNDARY_M: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionLevel {
    Safe,
    Caution,
    Warning,
    Danger,
    Violation,
}

impl CollisionLevel {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            CollisionLevel::Safe => "safe",
            CollisionLevel::Caution => "caution",
            CollisionLevel::Warning => "warning",
            CollisionLevel::Danger => "danger",
            CollisionLevel::Violation => "violation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollisionResult {
    pub level: CollisionLevel,
    /// Distance to the nearest foreign boundary; None when nothing is nearby to measure
    pub distance_m: Option<f64>,
    pub territory_id: Option<TerritoryId>,
    pub message: String,
}

impl CollisionResult {
    fn clear(message: &str) -> Self {
        Self {
            level: CollisionLevel::Safe,
            distance_m: None,
            territory_id: None,
            message: message.to_string(),
        }
    }

    fn violation(territory: &Territory, what: &str) -> Self {
        Self {
            level: CollisionLevel::Violation,
            distance_m: Some(0.0),
            territory_id: Some(territory.id.clone()),
            message: format!("{} territory {} owned by {}", what, territory.id, territory.owner_id),
        }
    }

    #[inline]
    pub fn is_violation(&self) -> bool {
        self.level == CollisionLevel::Violation
    }
}

/// Hard accept/reject for the starting point
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "territory_id", rename_all = "snake_case")]
pub enum StartCheck {
    Clear,
    Blocked(TerritoryId),
}

/// Foreign territory projected into the subject's local plane
struct Projected<'a> {
    territory: &'a Territory,
    ring: Vec<Xy>,
    bounds: Bounds,
}

#[derive(Debug, Clone)]
pub struct CollisionDetector {
    far_m: f64,
    near_m: f64,
    danger_m: f64,
}

impl CollisionDetector {
    pub fn new(config: &CollisionConfig) -> Self {
        Self { far_m: config.far_m, near_m: config.near_m, danger_m: config.danger_m }
    }

    /// Map a distance to an advisory level (never Violation)
    pub fn classify(&self, distance_m: f64) -> CollisionLevel {
        if distance_m > self.far_m {
            CollisionLevel::Safe
        } else if distance_m > self.near_m {
            CollisionLevel::Caution
        } else if distance_m > self.danger_m {
            CollisionLevel::Warning
        } else {
            CollisionLevel::Danger
        }
    }

    /// Block a start inside (or on the edge of) any foreign territory
    pub fn check_start(
        &self,
        point: &GeoPoint,
        territories: &[Territory],
        exclude_owner: Option<&OwnerId>,
    ) -> StartCheck {
        let projection = LocalProjection::new(point);
        let p = projection.project(point);

        for foreign in project_foreign(&projection, territories, exclude_owner) {
            if contains(&foreign.ring, p) {
                debug!(territory_id = %foreign.territory.id, "start_inside_foreign_territory");
                return StartCheck::Blocked(foreign.territory.id.clone());
            }
        }
        StartCheck::Clear
    }

    /// Continuous proximity check for an in-progress path
    pub fn check_path(
        &self,
        path: &[GeoPoint],
        territories: &[Territory],
        exclude_owner: Option<&OwnerId>,
    ) -> CollisionResult {
        let Some(current) = path.last() else {
            return CollisionResult::clear("no path yet");
        };
        let projection = LocalProjection::new(current);
        let line = projection.project_all(path);
        let Some(line_bounds) = Bounds::of(&line) else {
            return CollisionResult::clear("no path yet");
        };
        let here = projection.project(current);

        let mut nearest: Option<(f64, &Territory)> = None;
        for foreign in project_foreign(&projection, territories, exclude_owner) {
            if contains(&foreign.ring, here) {
                return CollisionResult::violation(foreign.territory, "current position is inside");
            }
            if polyline_crosses_ring(&line, &foreign.ring) {
                return CollisionResult::violation(foreign.territory, "path crosses the boundary of");
            }

            // bounding boxes give a cheap lower bound
            let best = nearest.map_or(f64::INFINITY, |(d, _)| d);
            if line_bounds.gap(&foreign.bounds) >= best {
                continue;
            }
            let d = line
                .iter()
                .map(|p| point_ring_distance(*p, &foreign.ring))
                .fold(f64::INFINITY, f64::min);
            if d < best {
                nearest = Some((d, foreign.territory));
            }
        }

        self.proximity(nearest)
    }

    /// Check a finished ring before it is saved as a claim
    pub fn check_claim(
        &self,
        ring: &[GeoPoint],
        territories: &[Territory],
        exclude_owner: Option<&OwnerId>,
    ) -> CollisionResult {
        let Some(projection) = LocalProjection::centered_on(ring) else {
            return CollisionResult::clear("empty claim");
        };
        let claim = projection.project_all(ring);
        let mut closed = claim.clone();
        closed.extend(claim.first().copied());

        let mut nearest: Option<(f64, &Territory)> = None;
        for foreign in project_foreign(&projection, territories, exclude_owner) {
            if foreign.ring.iter().any(|p| point_in_ring(*p, &claim)) {
                return CollisionResult::violation(foreign.territory, "claim encloses");
            }
            if claim.iter().any(|p| contains(&foreign.ring, *p)) {
                return CollisionResult::violation(foreign.territory, "claim reaches inside");
            }
            if polyline_crosses_ring(&closed, &foreign.ring) {
                return CollisionResult::violation(foreign.territory, "claim overlaps");
            }

            // boundary-to-boundary distance is attained at a vertex of one ring
            let d = claim
                .iter()
                .map(|p| point_ring_distance(*p, &foreign.ring))
                .chain(foreign.ring.iter().map(|p| point_ring_distance(*p, &claim)))
                .fold(f64::INFINITY, f64::min);
            if nearest.map_or(true, |(best, _)| d < best) {
                nearest = Some((d, foreign.territory));
            }
        }

        self.proximity(nearest)
    }

    fn proximity(&self, nearest: Option<(f64, &Territory)>) -> CollisionResult {
        let Some((distance_m, territory)) = nearest else {
            return CollisionResult::clear("no foreign territory nearby");
        };
        let level = self.classify(distance_m);
        let message = match level {
            CollisionLevel::Safe => "clear of other territories".to_string(),
            _ => format!(
                "{:.0} m from territory {} owned by {}",
                distance_m, territory.id, territory.owner_id
            ),
        };
        CollisionResult {
            level,
            distance_m: Some(distance_m),
            territory_id: Some(territory.id.clone()),
            message,
        }
    }
}

/// Inside or on the boundary
fn contains(ring: &[Xy], p: Xy) -> bool {
    point_ring_distance(p, ring) < ON_BOUNDARY_M || point_in_ring(p, ring)
}

fn project_foreign<'a>(
    projection: &LocalProjection,
    territories: &'a [Territory],
    exclude_owner: Option<&OwnerId>,
) -> Vec<Projected<'a>> {
    territories
        .iter()
        .filter(|t| t.is_foreign_to(exclude_owner))
        .filter_map(|territory| {
            if territory.boundary.len() < 3 {
                warn!(
                    territory_id = %territory.id,
                    points = %territory.boundary.len(),
                    "territory_boundary_degenerate"
                );
                return None;
            }
            let ring = projection.project_all(&territory.boundary);
            let bounds = Bounds::of(&ring)?;
            Some(Projected { territory, ring, bounds })
        })
        .collect()
}
