//! Storage ⇄ display frame conversion
//!
//! The display frame is the GCJ-02 regional datum: maps in the affected
//! region expect coordinates shifted by a nonlinear offset from WGS-84.
//! Outside the applicability box the transform is the identity.
//!
//! - storage → display: closed-form offset
//! - display → storage: fixed-point iteration on the forward transform

use crate::domain::types::{Frame, GeoPoint};
use serde::Deserialize;
use std::f64::consts::PI;

/// Krasovsky 1940 semi-major axis
const KRASOVSKY_A: f64 = 6_378_245.0;
/// Krasovsky 1940 first eccentricity squared
const KRASOVSKY_EE: f64 = 0.006_693_421_622_965_943_23;

/// Applicability box of the offset
const MIN_LON: f64 = 72.004;
const MAX_LON: f64 = 137.8347;
const MIN_LAT: f64 = 0.8293;
const MAX_LAT: f64 = 55.8271;

/// Inverse iteration stops once the residual is below this (degrees, ~0.1 mm)
const INVERSE_TOLERANCE_DEG: f64 = 1e-9;
const INVERSE_MAX_ITERATIONS: usize = 30;

/// Display datum selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayDatum {
    #[default]
    Gcj02,
    Identity,
}

impl DisplayDatum {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayDatum::Gcj02 => "gcj02",
            DisplayDatum::Identity => "identity",
        }
    }

    /// Convert a storage-frame point for display. Display points pass through.
    pub fn to_display_frame(&self, p: GeoPoint) -> GeoPoint {
        if p.frame == Frame::Display {
            return p;
        }
        match self {
            DisplayDatum::Gcj02 => to_display_frame(p),
            DisplayDatum::Identity => GeoPoint::display(p.lat, p.lon),
        }
    }

    /// Convert a display-frame point back to storage. Storage points pass through.
    pub fn to_storage_frame(&self, p: GeoPoint) -> GeoPoint {
        if p.frame == Frame::Storage {
            return p;
        }
        match self {
            DisplayDatum::Gcj02 => to_storage_frame(p),
            DisplayDatum::Identity => GeoPoint::storage(p.lat, p.lon),
        }
    }

    pub fn path_to_display(&self, path: &[GeoPoint]) -> Vec<GeoPoint> {
        path.iter().map(|p| self.to_display_frame(*p)).collect()
    }

    pub fn path_to_storage(&self, path: &[GeoPoint]) -> Vec<GeoPoint> {
        path.iter().map(|p| self.to_storage_frame(*p)).collect()
    }
}

/// True if the regional offset applies at this position
#[inline]
pub fn offset_applies(lat: f64, lon: f64) -> bool {
    (MIN_LON..=MAX_LON).contains(&lon) && (MIN_LAT..=MAX_LAT).contains(&lat)
}

/// Storage (WGS-84) → display (GCJ-02)
pub fn to_display_frame(p: GeoPoint) -> GeoPoint {
    if p.frame == Frame::Display {
        return p;
    }
    let (lat, lon) = forward(p.lat, p.lon);
    GeoPoint::display(lat, lon)
}

/// Display (GCJ-02) → storage (WGS-84)
pub fn to_storage_frame(p: GeoPoint) -> GeoPoint {
    if p.frame == Frame::Storage {
        return p;
    }
    // Forward offset varies slowly, so first-order guess then refine.
    // Applicability is decided on the candidate storage point: near the
    // north and east edges the shift carries in-box points outside the box.
    let (dlat, dlon) = offset(p.lat, p.lon);
    let (mut lat, mut lon) = (p.lat - dlat, p.lon - dlon);
    if !offset_applies(p.lat, p.lon) && !offset_applies(lat, lon) {
        return GeoPoint::storage(p.lat, p.lon);
    }
    for _ in 0..INVERSE_MAX_ITERATIONS {
        let (fwd_lat, fwd_lon) = forward(lat, lon);
        let err_lat = fwd_lat - p.lat;
        let err_lon = fwd_lon - p.lon;
        if err_lat.abs() < INVERSE_TOLERANCE_DEG && err_lon.abs() < INVERSE_TOLERANCE_DEG {
            break;
        }
        lat -= err_lat;
        lon -= err_lon;
    }
    GeoPoint::storage(lat, lon)
}

fn forward(lat: f64, lon: f64) -> (f64, f64) {
    if !offset_applies(lat, lon) {
        return (lat, lon);
    }
    let (dlat, dlon) = offset(lat, lon);
    (lat + dlat, lon + dlon)
}

fn offset(lat: f64, lon: f64) -> (f64, f64) {
    let x = lon - 105.0;
    let y = lat - 35.0;
    let mut dlat = offset_lat(x, y);
    let mut dlon = offset_lon(x, y);

    let rad_lat = lat.to_radians();
    let magic = 1.0 - KRASOVSKY_EE * rad_lat.sin() * rad_lat.sin();
    let sqrt_magic = magic.sqrt();
    dlat = (dlat * 180.0) / ((KRASOVSKY_A * (1.0 - KRASOVSKY_EE)) / (magic * sqrt_magic) * PI);
    dlon = (dlon * 180.0) / (KRASOVSKY_A / sqrt_magic * rad_lat.cos() * PI);
    (dlat, dlon)
}

fn offset_lat(x: f64, y: f64) -> f64 {
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

fn offset_lon(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}
