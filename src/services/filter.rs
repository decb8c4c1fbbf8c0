//! Location sample filter
//!
//! Pure decision over a raw fix and the previous accepted fix. The caller
//! (the tracking session) owns all state; nothing here mutates.
//!
//! Rules, first match wins:
//! 1. Non-finite or out-of-range coordinates
//! 2. Invalid or too coarse horizontal accuracy
//! 3. Relative to the previous accepted fix: timestamp not moving forward,
//!    implied or reported speed above the ceiling, step below the jitter floor
//! 4. Otherwise accept

use crate::domain::types::{AcceptedFix, GeoPoint, RawFix};
use crate::geo::planar::haversine_m;
use crate::infra::config::FilterConfig;
use serde::Serialize;
use tracing::debug;

/// Why a fix was dropped
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    InvalidCoordinate,
    LowAccuracy { accuracy_m: f64 },
    OutOfOrder { elapsed_ms: i64 },
    SpeedAnomaly { speed_mps: f64 },
    Jitter { step_m: f64 },
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidCoordinate => "invalid_coordinate",
            RejectReason::LowAccuracy { .. } => "low_accuracy",
            RejectReason::OutOfOrder { .. } => "out_of_order",
            RejectReason::SpeedAnomaly { .. } => "speed_anomaly",
            RejectReason::Jitter { .. } => "jitter",
        }
    }

    /// Speed anomalies are surfaced to the player as a warning
    #[inline]
    pub fn is_speed_warning(&self) -> bool {
        matches!(self, RejectReason::SpeedAnomaly { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    Accepted(GeoPoint),
    Rejected(RejectReason),
}

impl FilterDecision {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, FilterDecision::Accepted(_))
    }
}

#[derive(Debug, Clone)]
pub struct LocationFilter {
    max_accuracy_m: f64,
    max_speed_mps: f64,
    min_step_m: f64,
}

impl LocationFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            max_accuracy_m: config.max_accuracy_m,
            max_speed_mps: config.max_speed_mps,
            min_step_m: config.min_step_m,
        }
    }

    pub fn accept(&self, fix: &RawFix, previous: Option<&AcceptedFix>) -> FilterDecision {
        let point = fix.point();
        if !point.is_valid() {
            return FilterDecision::Rejected(RejectReason::InvalidCoordinate);
        }

        // NaN compares false, so test the valid range rather than the invalid one
        if !(fix.accuracy_m >= 0.0 && fix.accuracy_m <= self.max_accuracy_m) {
            return FilterDecision::Rejected(RejectReason::LowAccuracy { accuracy_m: fix.accuracy_m });
        }

        if let Some(reported) = fix.speed_mps.filter(|s| s.is_finite() && *s >= 0.0) {
            if reported > self.max_speed_mps {
                return FilterDecision::Rejected(RejectReason::SpeedAnomaly { speed_mps: reported });
            }
        }

        let Some(prev) = previous else {
            return FilterDecision::Accepted(point);
        };

        let elapsed_ms = (fix.timestamp - prev.timestamp).num_milliseconds();
        if elapsed_ms <= 0 {
            return FilterDecision::Rejected(RejectReason::OutOfOrder { elapsed_ms });
        }

        let step_m = haversine_m(&prev.point, &point);
        let speed_mps = step_m / (elapsed_ms as f64 / 1000.0);
        if speed_mps > self.max_speed_mps {
            debug!(
                step_m = %format!("{:.1}", step_m),
                elapsed_ms = %elapsed_ms,
                speed_mps = %format!("{:.1}", speed_mps),
                "implied_speed_exceeded"
            );
            return FilterDecision::Rejected(RejectReason::SpeedAnomaly { speed_mps });
        }

        if step_m < self.min_step_m {
            return FilterDecision::Rejected(RejectReason::Jitter { step_m });
        }

        FilterDecision::Accepted(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn filter() -> LocationFilter {
        LocationFilter::new(&FilterConfig::default())
    }

    fn fix_at(lat: f64, lon: f64, accuracy_m: f64, secs: i64) -> RawFix {
        RawFix {
            lat,
            lon,
            accuracy_m,
            speed_mps: None,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap() + Duration::seconds(secs),
        }
    }

    fn accepted(fix: &RawFix) -> AcceptedFix {
        AcceptedFix { point: fix.point(), timestamp: fix.timestamp }
    }

    #[test]
    fn test_first_fix_accepted() {
        let decision = filter().accept(&fix_at(31.0, 121.0, 5.0, 0), None);
        assert_eq!(decision, FilterDecision::Accepted(GeoPoint::storage(31.0, 121.0)));
    }

    #[test]
    fn test_low_accuracy_rejected() {
        let decision = filter().accept(&fix_at(31.0, 121.0, 80.0, 0), None);
        assert!(matches!(decision, FilterDecision::Rejected(RejectReason::LowAccuracy { .. })));

        // negative accuracy marks an invalid fix
        let decision = filter().accept(&fix_at(31.0, 121.0, -1.0, 0), None);
        assert!(matches!(decision, FilterDecision::Rejected(RejectReason::LowAccuracy { .. })));

        let decision = filter().accept(&fix_at(31.0, 121.0, f64::NAN, 0), None);
        assert!(matches!(decision, FilterDecision::Rejected(RejectReason::LowAccuracy { .. })));
    }

    #[test]
    fn test_invalid_coordinate_rejected() {
        let decision = filter().accept(&fix_at(95.0, 121.0, 5.0, 0), None);
        assert_eq!(decision, FilterDecision::Rejected(RejectReason::InvalidCoordinate));
    }

    #[test]
    fn test_teleport_rejected_as_speed_warning() {
        let first = fix_at(31.0, 121.0, 5.0, 0);
        // ~1.1 km in 5 seconds
        let jump = fix_at(31.01, 121.0, 5.0, 5);
        let decision = filter().accept(&jump, Some(&accepted(&first)));
        match decision {
            FilterDecision::Rejected(reason) => {
                assert!(reason.is_speed_warning());
                assert_eq!(reason.as_str(), "speed_anomaly");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_reported_speed_rejected() {
        let mut fix = fix_at(31.0, 121.0, 5.0, 0);
        fix.speed_mps = Some(40.0);
        let decision = filter().accept(&fix, None);
        assert!(matches!(decision, FilterDecision::Rejected(RejectReason::SpeedAnomaly { .. })));

        // negative reported speed means unknown and is ignored
        fix.speed_mps = Some(-1.0);
        assert!(filter().accept(&fix, None).is_accepted());
    }

    #[test]
    fn test_walking_pace_accepted() {
        let first = fix_at(31.0, 121.0, 5.0, 0);
        // ~11 m in 10 seconds
        let next = fix_at(31.0001, 121.0, 5.0, 10);
        assert!(filter().accept(&next, Some(&accepted(&first))).is_accepted());
    }

    #[test]
    fn test_out_of_order_rejected() {
        let first = fix_at(31.0, 121.0, 5.0, 10);
        let stale = fix_at(31.0001, 121.0, 5.0, 10);
        let decision = filter().accept(&stale, Some(&accepted(&first)));
        assert_eq!(decision, FilterDecision::Rejected(RejectReason::OutOfOrder { elapsed_ms: 0 }));
    }

    #[test]
    fn test_jitter_rejected() {
        let first = fix_at(31.0, 121.0, 5.0, 0);
        // ~0.1 m step
        let wobble = fix_at(31.000001, 121.0, 5.0, 3);
        let decision = filter().accept(&wobble, Some(&accepted(&first)));
        assert!(matches!(decision, FilterDecision::Rejected(RejectReason::Jitter { .. })));
    }
}
