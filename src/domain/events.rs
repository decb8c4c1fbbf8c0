//! Session lifecycle and the discrete events emitted on every transition

use crate::domain::types::{GeoPoint, TerritoryId};
use crate::services::collision::CollisionResult;
use crate::services::filter::RejectReason;
use crate::services::validator::ValidationResult;
use serde::Serialize;
use smallvec::SmallVec;
use uuid::Uuid;

/// Tracking session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Tracking,
    Closed,
    Aborted,
}

impl SessionStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Tracking => "tracking",
            SessionStatus::Closed => "closed",
            SessionStatus::Aborted => "aborted",
        }
    }
}

/// Why a session ended up in `Aborted`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    UserCancel,
    StartBlocked { territory_id: TerritoryId },
    CollisionViolation { territory_id: Option<TerritoryId>, message: String },
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::UserCancel => "user_cancel",
            AbortReason::StartBlocked { .. } => "start_blocked",
            AbortReason::CollisionViolation { .. } => "collision_violation",
        }
    }

    /// Territory that caused the abort, if any
    pub fn territory_id(&self) -> Option<&TerritoryId> {
        match self {
            AbortReason::UserCancel => None,
            AbortReason::StartBlocked { territory_id } => Some(territory_id),
            AbortReason::CollisionViolation { territory_id, .. } => territory_id.as_ref(),
        }
    }
}

/// Event emitted by a session transition
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum SessionEvent {
    StatusChanged { session: Uuid, from: SessionStatus, to: SessionStatus },
    PointAccepted { session: Uuid, index: usize, point: GeoPoint, traversed_m: f64 },
    FixRejected { session: Uuid, reason: RejectReason },
    SpeedWarning { session: Uuid, speed_mps: f64 },
    LoopClosed { session: Uuid, points: usize, traversed_m: f64 },
    Validated { session: Uuid, result: ValidationResult },
    CollisionAssessed { session: Uuid, result: CollisionResult },
    Aborted { session: Uuid, reason: AbortReason },
}

impl SessionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEvent::StatusChanged { .. } => "status_changed",
            SessionEvent::PointAccepted { .. } => "point_accepted",
            SessionEvent::FixRejected { .. } => "fix_rejected",
            SessionEvent::SpeedWarning { .. } => "speed_warning",
            SessionEvent::LoopClosed { .. } => "loop_closed",
            SessionEvent::Validated { .. } => "validated",
            SessionEvent::CollisionAssessed { .. } => "collision_assessed",
            SessionEvent::Aborted { .. } => "aborted",
        }
    }
}

/// Events produced by a single transition; most transitions emit one or two
pub type Events = SmallVec<[SessionEvent; 4]>;
