//! Services - claim logic and state management
//!
//! This module contains the core claim services:
//! - `filter` - Rejects noisy or implausible location fixes
//! - `session` - Tracking session state machine, single writer of the path
//! - `validator` - Shoelace area and shape plausibility of a closed loop
//! - `collision` - Start check and graduated proximity to foreign territories
//! - `monitor` - Cancellable periodic collision check task
//! - `engine` - Hosts the session for the application and the UI

pub mod collision;
pub mod engine;
pub mod filter;
pub mod monitor;
pub mod session;
pub mod validator;

// Re-export commonly used types
pub use collision::{CollisionDetector, CollisionLevel, CollisionResult, StartCheck};
pub use engine::{ClaimEngine, EngineError};
pub use filter::{FilterDecision, LocationFilter, RejectReason};
pub use session::{SessionError, TrackingSession};
pub use validator::{PolygonValidator, ValidationResult};
