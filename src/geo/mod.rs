//! Geometry - coordinate frames and local planar math
//!
//! - `coords` - storage ⇄ display frame conversion
//! - `planar` - local projection, plus distances, area and predicates on `geo` types

pub mod coords;
pub mod planar;

pub use coords::DisplayDatum;
pub use planar::{haversine_m, LocalProjection};
