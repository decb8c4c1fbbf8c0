//! Domain models - core claim types and session events
//!
//! This module contains the canonical data types used throughout the engine:
//! - `GeoPoint` - latitude/longitude tagged with its coordinate frame
//! - `RawFix` - unfiltered sample from the location provider
//! - `Territory` - persisted claim owned by a player
//! - `SessionEvent` - discrete outcome of a session transition

pub mod events;
pub mod types;

pub use events::{AbortReason, Events, SessionEvent, SessionStatus};
pub use types::{Frame, GeoPoint, OwnerId, RawFix, Territory, TerritoryId};
