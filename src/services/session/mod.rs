//! Tracking session - the claim state machine
//!
//! ```text
//! Idle --start--> Tracking --closure--> Closed
//!   |                 |
//!   | start blocked   | violation / cancel
//!   v                 v
//! Aborted <-----------+
//!
//! Closed | Aborted --reset--> Idle
//! ```
//!
//! The session owns the path and is the only writer. Every transition returns
//! the discrete events it produced; nothing is observed ambiently. The path is
//! copy-on-write so a snapshot taken by a reader never changes underneath it.


use crate::domain::events::{AbortReason, Events, SessionEvent, SessionStatus};
use crate::domain::types::{AcceptedFix, GeoPoint, RawFix, TerritoryId};
use crate::geo::planar::haversine_m;
use crate::infra::config::{ClosureConfig, Config};
use crate::services::collision::CollisionResult;
use crate::services::filter::{FilterDecision, LocationFilter, RejectReason};
use crate::services::validator::{InvalidReason, PolygonValidator, ValidationResult};
use chrono::{DateTime, Utc};
use smallvec::smallvec;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("a claim is already being tracked")]
    AlreadyTracking,
    #[error("session is {}, reset it before starting a new claim", .0.as_str())]
    NotIdle(SessionStatus),
    #[error("cannot reset while tracking, cancel first")]
    StillTracking,
    #[error("session is {}, expected {}", .actual.as_str(), .expected.as_str())]
    InvalidState { expected: SessionStatus, actual: SessionStatus },
    #[error("closed path did not validate: {}", .0.as_str())]
    NotValid(InvalidReason),
}

/// Consistent read-only view of the path at one instant
#[derive(Debug, Clone)]
pub struct PathSnapshot {
    pub session: Uuid,
    pub status: SessionStatus,
    pub path: Arc<Vec<GeoPoint>>,
}

/// Geometry and area of a closed, valid session, ready to persist
#[derive(Debug, Clone)]
pub struct ClosedClaim {
    pub session: Uuid,
    /// Canonical unclosed ring (storage frame)
    pub boundary: Vec<GeoPoint>,
    pub area_m2: f64,
}

pub struct TrackingSession {
    id: Uuid,
    status: SessionStatus,
    path: Arc<Vec<GeoPoint>>,
    started_at: Option<DateTime<Utc>>,
    last_fix: Option<AcceptedFix>,
    traversed_m: f64,
    validation: Option<ValidationResult>,
    last_collision: Option<CollisionResult>,
    /// Path length of the snapshot behind `last_collision`
    last_collision_len: usize,
    abort_reason: Option<AbortReason>,
    filter: LocationFilter,
    validator: PolygonValidator,
    closure: ClosureConfig,
}

impl TrackingSession {
    pub fn new(config: &Config) -> Self {
        Self {
            id: Uuid::nil(),
            status: SessionStatus::Idle,
            path: Arc::new(Vec::new()),
            started_at: None,
            last_fix: None,
            traversed_m: 0.0,
            validation: None,
            last_collision: None,
            last_collision_len: 0,
            abort_reason: None,
            filter: LocationFilter::new(config.filter()),
            validator: PolygonValidator::new(config.validation()),
            closure: config.closure().clone(),
        }
    }

    /// Idle → Tracking
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<Events, SessionError> {
        self.ensure_idle()?;
        self.id = Uuid::now_v7();
        self.started_at = Some(now);

        let mut events = Events::new();
        self.transition(SessionStatus::Tracking, &mut events);
        Ok(events)
    }

    /// Idle → Aborted, when the start point lies inside a foreign territory
    pub fn block_start(
        &mut self,
        territory_id: TerritoryId,
        now: DateTime<Utc>,
    ) -> Result<Events, SessionError> {
        self.ensure_idle()?;
        self.id = Uuid::now_v7();
        self.started_at = Some(now);

        let mut events = Events::new();
        self.abort_with(AbortReason::StartBlocked { territory_id }, &mut events);
        Ok(events)
    }

    /// Run a raw fix through the filter and append it if accepted
    ///
    /// Fixes arriving outside `Tracking` are ignored, so nothing is appended
    /// after closure or an abort.
    pub fn ingest(&mut self, fix: &RawFix) -> Events {
        if self.status != SessionStatus::Tracking {
            debug!(session = %self.id, status = %self.status.as_str(), "fix_ignored");
            return Events::new();
        }

        let point = match self.filter.accept(fix, self.last_fix.as_ref()) {
            FilterDecision::Accepted(point) => point,
            FilterDecision::Rejected(reason) => {
                let mut events = Events::new();
                if let RejectReason::SpeedAnomaly { speed_mps } = &reason {
                    warn!(
                        session = %self.id,
                        speed_mps = %format!("{:.1}", speed_mps),
                        "speed_anomaly"
                    );
                    events.push(SessionEvent::SpeedWarning { session: self.id, speed_mps: *speed_mps });
                } else {
                    debug!(session = %self.id, reason = %reason.as_str(), "fix_rejected");
                }
                events.push(SessionEvent::FixRejected { session: self.id, reason });
                return events;
            }
        };

        if let Some(prev) = self.path.last() {
            self.traversed_m += haversine_m(prev, &point);
        }
        Arc::make_mut(&mut self.path).push(point);
        self.last_fix = Some(AcceptedFix { point, timestamp: fix.timestamp });

        let mut events: Events = smallvec![SessionEvent::PointAccepted {
            session: self.id,
            index: self.path.len() - 1,
            point,
            traversed_m: self.traversed_m,
        }];

        if self.closure_reached() {
            self.close(&mut events);
        }
        events
    }

    /// Tracking → Aborted on explicit user cancel
    pub fn cancel(&mut self) -> Result<Events, SessionError> {
        self.ensure_status(SessionStatus::Tracking)?;
        let mut events = Events::new();
        self.abort_with(AbortReason::UserCancel, &mut events);
        Ok(events)
    }

    /// Record a periodic collision result computed from `checked`
    ///
    /// Results for another session, or arriving after tracking ended, are
    /// discarded, as are advisory results for a shorter path than the one
    /// already assessed. A violation aborts the session.
    pub fn apply_collision(&mut self, checked: &PathSnapshot, result: CollisionResult) -> Events {
        if checked.session != self.id || self.status != SessionStatus::Tracking {
            debug!(
                result_session = %checked.session,
                session = %self.id,
                status = %self.status.as_str(),
                level = %result.level.as_str(),
                "collision_result_discarded"
            );
            return Events::new();
        }

        // a violation on a prefix still holds for the whole path
        let checked_len = checked.path.len();
        if checked_len < self.last_collision_len && !result.is_violation() {
            debug!(
                session = %self.id,
                checked_points = %checked_len,
                assessed_points = %self.last_collision_len,
                level = %result.level.as_str(),
                "collision_result_superseded"
            );
            return Events::new();
        }
        self.last_collision_len = checked_len;

        let mut events: Events =
            smallvec![SessionEvent::CollisionAssessed { session: self.id, result: result.clone() }];

        if result.is_violation() {
            warn!(
                session = %self.id,
                territory_id = ?result.territory_id,
                message = %result.message,
                "collision_violation"
            );
            let reason = AbortReason::CollisionViolation {
                territory_id: result.territory_id.clone(),
                message: result.message.clone(),
            };
            self.last_collision = Some(result);
            self.abort_with(reason, &mut events);
        } else {
            self.last_collision = Some(result);
        }
        events
    }

    /// Closed | Aborted → Idle, dropping the path
    pub fn reset(&mut self) -> Result<Events, SessionError> {
        match self.status {
            SessionStatus::Tracking => Err(SessionError::StillTracking),
            SessionStatus::Idle => Ok(Events::new()),
            SessionStatus::Closed | SessionStatus::Aborted => {
                let mut events = Events::new();
                self.transition(SessionStatus::Idle, &mut events);
                self.path = Arc::new(Vec::new());
                self.started_at = None;
                self.last_fix = None;
                self.traversed_m = 0.0;
                self.validation = None;
                self.last_collision = None;
                self.last_collision_len = 0;
                self.abort_reason = None;
                Ok(events)
            }
        }
    }

    /// Boundary and area of a closed session that passed validation
    pub fn closed_claim(&self) -> Result<ClosedClaim, SessionError> {
        self.ensure_status(SessionStatus::Closed)?;
        match &self.validation {
            Some(ValidationResult::Valid { area_m2 }) => Ok(ClosedClaim {
                session: self.id,
                boundary: self.path.to_vec(),
                area_m2: *area_m2,
            }),
            Some(ValidationResult::Invalid { reason }) => Err(SessionError::NotValid(reason.clone())),
            None => Err(SessionError::InvalidState {
                expected: SessionStatus::Closed,
                actual: self.status,
            }),
        }
    }

    pub fn snapshot(&self) -> PathSnapshot {
        PathSnapshot { session: self.id, status: self.status, path: Arc::clone(&self.path) }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Canonical path, first point implicitly closes the ring
    pub fn path(&self) -> &[GeoPoint] {
        &self.path
    }

    /// Path plus a synthetic closing point, for area and rendering
    pub fn closed_ring(&self) -> Vec<GeoPoint> {
        let mut ring = self.path.to_vec();
        if self.status == SessionStatus::Closed {
            ring.extend(self.path.first().copied());
        }
        ring
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn traversed_m(&self) -> f64 {
        self.traversed_m
    }

    pub fn last_validation(&self) -> Option<&ValidationResult> {
        self.validation.as_ref()
    }

    pub fn last_collision(&self) -> Option<&CollisionResult> {
        self.last_collision.as_ref()
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        self.abort_reason.as_ref()
    }

    fn closure_reached(&self) -> bool {
        if self.path.len() < self.closure.min_points
            || self.traversed_m < self.closure.min_traversed_m
        {
            return false;
        }
        match (self.path.first(), self.path.last()) {
            (Some(first), Some(last)) => haversine_m(first, last) <= self.closure.radius_m,
            _ => false,
        }
    }

    fn close(&mut self, events: &mut Events) {
        let gap_m = match (self.path.first(), self.path.last()) {
            (Some(first), Some(last)) => haversine_m(first, last),
            _ => 0.0,
        };
        info!(
            session = %self.id,
            points = %self.path.len(),
            traversed_m = %format!("{:.1}", self.traversed_m),
            gap_m = %format!("{:.1}", gap_m),
            "loop_closed"
        );
        events.push(SessionEvent::LoopClosed {
            session: self.id,
            points: self.path.len(),
            traversed_m: self.traversed_m,
        });
        self.transition(SessionStatus::Closed, events);

        let result = self.validator.validate_with_traversal(&self.path, self.traversed_m + gap_m);
        match &result {
            ValidationResult::Valid { area_m2 } => {
                info!(session = %self.id, area_m2 = %format!("{:.1}", area_m2), "claim_valid");
            }
            ValidationResult::Invalid { reason } => {
                warn!(session = %self.id, reason = %reason.as_str(), "claim_invalid");
            }
        }
        events.push(SessionEvent::Validated { session: self.id, result: result.clone() });
        self.validation = Some(result);
    }

    fn abort_with(&mut self, reason: AbortReason, events: &mut Events) {
        info!(
            session = %self.id,
            reason = %reason.as_str(),
            territory_id = ?reason.territory_id(),
            points = %self.path.len(),
            "session_aborted"
        );
        events.push(SessionEvent::Aborted { session: self.id, reason: reason.clone() });
        self.abort_reason = Some(reason);
        self.transition(SessionStatus::Aborted, events);
    }

    fn transition(&mut self, to: SessionStatus, events: &mut Events) {
        let from = self.status;
        self.status = to;
        info!(session = %self.id, from = %from.as_str(), to = %to.as_str(), "session_status_changed");
        events.push(SessionEvent::StatusChanged { session: self.id, from, to });
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Idle => Ok(()),
            SessionStatus::Tracking => Err(SessionError::AlreadyTracking),
            other => Err(SessionError::NotIdle(other)),
        }
    }

    fn ensure_status(&self, expected: SessionStatus) -> Result<(), SessionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState { expected, actual: self.status })
        }
    }
}
