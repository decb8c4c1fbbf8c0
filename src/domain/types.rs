//! Shared value types for the territory engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Newtype wrapper for territory IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerritoryId(pub String);

impl std::fmt::Display for TerritoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generate a new time-sortable territory ID (UUIDv7)
pub fn new_territory_id() -> TerritoryId {
    TerritoryId(Uuid::now_v7().to_string())
}

/// Newtype wrapper for player (owner) IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coordinate frame a point is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frame {
    /// Geodetic frame used for persistence (WGS-84)
    Storage,
    /// Regionally offset frame used for on-screen placement
    Display,
}

impl Frame {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frame::Storage => "storage",
            Frame::Display => "display",
        }
    }
}

/// Latitude/longitude pair tagged with its frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    pub frame: Frame,
}

impl GeoPoint {
    #[inline]
    pub fn storage(lat: f64, lon: f64) -> Self {
        Self { lat, lon, frame: Frame::Storage }
    }

    #[inline]
    pub fn display(lat: f64, lon: f64) -> Self {
        Self { lat, lon, frame: Frame::Display }
    }

    /// True if both coordinates are finite and inside the geodetic range
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.7}, {:.7})@{}", self.lat, self.lon, self.frame.as_str())
    }
}

/// Raw sample from the device location provider (storage frame)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFix {
    pub lat: f64,
    pub lon: f64,
    /// Horizontal accuracy radius in meters; negative means the fix is invalid
    pub accuracy_m: f64,
    /// Device-reported ground speed, if any
    #[serde(default)]
    pub speed_mps: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl RawFix {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::storage(self.lat, self.lon)
    }
}

/// A fix that passed the filter, kept as the reference for the next decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptedFix {
    pub point: GeoPoint,
    pub timestamp: DateTime<Utc>,
}

/// Persisted territory, owned by the external store and read-only here
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Territory {
    pub id: TerritoryId,
    pub owner_id: OwnerId,
    /// Storage-frame ring, first point implicitly closes it
    pub boundary: Vec<GeoPoint>,
    pub area_m2: f64,
    pub created_at: DateTime<Utc>,
}

impl Territory {
    pub fn is_foreign_to(&self, owner: Option<&OwnerId>) -> bool {
        owner.map_or(true, |o| &self.owner_id != o)
    }
}

/// A validated claim ready to be handed to the repository
#[derive(Debug, Clone, Serialize)]
pub struct NewClaim {
    pub owner_id: OwnerId,
    pub boundary: Vec<GeoPoint>,
    pub area_m2: f64,
}
