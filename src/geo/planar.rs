//! Local planar geometry over geodetic points
//!
//! Walked parcels are sub-kilometer, so an equirectangular projection around
//! a local origin is accurate to well under a percent. All planar values are
//! meters. The projection is ours; distances, areas and predicates on the
//! projected plane come from `geo`.

use crate::domain::types::GeoPoint;
use geo::{
    Area, BoundingRect, Contains, EuclideanDistance, HaversineDistance, Intersects, Line,
    LineString, Point, Polygon,
};

/// Mean Earth radius (IUGG), the radius `geo` uses for haversine
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Planar point in meters (x east, y north)
pub type Xy = (f64, f64);

/// Great-circle distance between two points in meters
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    Point::new(a.lon, a.lat).haversine_distance(&Point::new(b.lon, b.lat))
}

/// Total length of an open polyline in meters
pub fn path_length_m(path: &[GeoPoint]) -> f64 {
    path.windows(2).map(|w| haversine_m(&w[0], &w[1])).sum()
}

/// Equirectangular projection centered on a local origin
#[derive(Debug, Clone, Copy)]
pub struct LocalProjection {
    origin_lat: f64,
    origin_lon: f64,
    cos_lat: f64,
}

impl LocalProjection {
    pub fn new(origin: &GeoPoint) -> Self {
        Self { origin_lat: origin.lat, origin_lon: origin.lon, cos_lat: origin.lat.to_radians().cos() }
    }

    /// Projection centered on the arithmetic centroid of the points
    pub fn centered_on(points: &[GeoPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let lat = points.iter().map(|p| p.lat).sum::<f64>() / n;
        let lon = points.iter().map(|p| p.lon).sum::<f64>() / n;
        Some(Self::new(&GeoPoint { lat, lon, frame: points[0].frame }))
    }

    #[inline]
    pub fn project(&self, p: &GeoPoint) -> Xy {
        let x = (p.lon - self.origin_lon).to_radians() * self.cos_lat * EARTH_RADIUS_M;
        let y = (p.lat - self.origin_lat).to_radians() * EARTH_RADIUS_M;
        (x, y)
    }

    pub fn project_all(&self, points: &[GeoPoint]) -> Vec<Xy> {
        points.iter().map(|p| self.project(p)).collect()
    }
}

/// Polygon over an implicitly closed ring
fn polygon(ring: &[Xy]) -> Polygon<f64> {
    Polygon::new(LineString::from(ring.to_vec()), vec![])
}

/// Ring edges, including the closing edge
fn edges(ring: &[Xy]) -> impl Iterator<Item = Line<f64>> + '_ {
    let n = ring.len();
    (0..n).map(move |i| Line::new(ring[i], ring[(i + 1) % n]))
}

/// Signed shoelace area of a ring (positive = counter-clockwise)
///
/// The ring is implicitly closed; a repeated closing vertex contributes zero.
pub fn signed_area(ring: &[Xy]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    polygon(ring).signed_area()
}

/// Distance from `p` to the segment `a`–`b`
pub fn point_segment_distance(p: Xy, a: Xy, b: Xy) -> f64 {
    Point::from(p).euclidean_distance(&Line::new(a, b))
}

/// Minimum distance from `p` to any edge of an implicitly closed ring
pub fn point_ring_distance(p: Xy, ring: &[Xy]) -> f64 {
    let point = Point::from(p);
    match ring.len() {
        0 => f64::INFINITY,
        1 => point.euclidean_distance(&Point::from(ring[0])),
        _ => edges(ring).map(|edge| point.euclidean_distance(&edge)).fold(f64::INFINITY, f64::min),
    }
}

/// True if segments `a1`–`a2` and `b1`–`b2` touch or cross
pub fn segments_intersect(a1: Xy, a2: Xy, b1: Xy, b2: Xy) -> bool {
    Line::new(a1, a2).intersects(&Line::new(b1, b2))
}

/// Strict interior test; points on an edge are outside
pub fn point_in_ring(p: Xy, ring: &[Xy]) -> bool {
    if ring.len() < 3 {
        return false;
    }
    polygon(ring).contains(&Point::from(p))
}

/// True if any edge of the open polyline crosses any edge of the closed ring
pub fn polyline_crosses_ring(line: &[Xy], ring: &[Xy]) -> bool {
    if line.len() < 2 || ring.len() < 2 {
        return false;
    }
    let mut boundary = LineString::from(ring.to_vec());
    boundary.close();
    LineString::from(line.to_vec()).intersects(&boundary)
}

/// True if two non-adjacent edges of the closed ring intersect
pub fn ring_self_intersects(ring: &[Xy]) -> bool {
    let n = ring.len();
    if n < 4 {
        return false;
    }
    let sides: Vec<Line<f64>> = edges(ring).collect();
    for i in 0..n {
        for j in (i + 2)..n {
            // first and last edges share vertex 0
            if i == 0 && j == n - 1 {
                continue;
            }
            if sides[i].intersects(&sides[j]) {
                return true;
            }
        }
    }
    false
}

/// Axis-aligned bounding box in projected meters
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub min: Xy,
    pub max: Xy,
}

impl Bounds {
    pub fn of(points: &[Xy]) -> Option<Self> {
        let rect = LineString::from(points.to_vec()).bounding_rect()?;
        Some(Self { min: rect.min().x_y(), max: rect.max().x_y() })
    }

    /// Lower bound on the distance between anything inside the two boxes
    pub fn gap(&self, other: &Bounds) -> f64 {
        let dx = (other.min.0 - self.max.0).max(self.min.0 - other.max.0).max(0.0);
        let dy = (other.min.1 - self.max.1).max(self.min.1 - other.max.1).max(0.0);
        dx.hypot(dy)
    }
}
