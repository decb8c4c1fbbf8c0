//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations so the fix ingestion path and the
//! periodic collision task never contend on a lock for bookkeeping.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only; never use them for coordination.

use crate::domain::events::SessionEvent;
use crate::services::filter::RejectReason;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

pub struct Metrics {
    /// Fixes appended to a path (monotonic)
    fixes_accepted: AtomicU64,
    /// Fixes rejected for coarse or invalid accuracy (monotonic)
    fixes_low_accuracy: AtomicU64,
    /// Fixes rejected as teleports (monotonic)
    fixes_speed_anomaly: AtomicU64,
    /// Fixes rejected as jitter, out of order or invalid (monotonic)
    fixes_other_rejected: AtomicU64,
    /// Sessions that closed a loop (monotonic)
    loops_closed: AtomicU64,
    /// Closed loops that failed validation (monotonic)
    loops_invalid: AtomicU64,
    /// Sessions aborted by a collision violation or blocked start (monotonic)
    violations: AtomicU64,
    /// Total collision checks run (monotonic)
    collision_checks: AtomicU64,
    /// Collision checks since last report (reset on report)
    checks_since_report: AtomicU64,
    /// Sum of collision check latencies (reset on report)
    check_latency_sum_us: AtomicU64,
    /// Max collision check latency (reset on report)
    check_latency_max_us: AtomicU64,
    /// Claims persisted (monotonic)
    claims_saved: AtomicU64,
    /// Repository save failures (monotonic)
    claim_save_failures: AtomicU64,
    /// Events dropped because the consumer channel was full (monotonic)
    events_dropped: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            fixes_accepted: AtomicU64::new(0),
            fixes_low_accuracy: AtomicU64::new(0),
            fixes_speed_anomaly: AtomicU64::new(0),
            fixes_other_rejected: AtomicU64::new(0),
            loops_closed: AtomicU64::new(0),
            loops_invalid: AtomicU64::new(0),
            violations: AtomicU64::new(0),
            collision_checks: AtomicU64::new(0),
            checks_since_report: AtomicU64::new(0),
            check_latency_sum_us: AtomicU64::new(0),
            check_latency_max_us: AtomicU64::new(0),
            claims_saved: AtomicU64::new(0),
            claim_save_failures: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Count what a batch of session events says happened
    pub fn record_events<'a>(&self, events: impl IntoIterator<Item = &'a SessionEvent>) {
        for event in events {
            match event {
                SessionEvent::PointAccepted { .. } => {
                    self.fixes_accepted.fetch_add(1, Ordering::Relaxed);
                }
                SessionEvent::FixRejected { reason, .. } => {
                    let counter = match reason {
                        RejectReason::LowAccuracy { .. } => &self.fixes_low_accuracy,
                        RejectReason::SpeedAnomaly { .. } => &self.fixes_speed_anomaly,
                        _ => &self.fixes_other_rejected,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                SessionEvent::LoopClosed { .. } => {
                    self.loops_closed.fetch_add(1, Ordering::Relaxed);
                }
                SessionEvent::Validated { result, .. } if !result.is_valid() => {
                    self.loops_invalid.fetch_add(1, Ordering::Relaxed);
                }
                SessionEvent::Aborted { reason, .. } if reason.territory_id().is_some() => {
                    self.violations.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
        }
    }

    pub fn record_collision_check(&self, latency_us: u64) {
        self.collision_checks.fetch_add(1, Ordering::Relaxed);
        self.checks_since_report.fetch_add(1, Ordering::Relaxed);
        self.check_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.check_latency_max_us, latency_us);
    }

    pub fn record_claim_saved(&self) {
        self.claims_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claim_save_failure(&self) {
        self.claim_save_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fixes_accepted(&self) -> u64 {
        self.fixes_accepted.load(Ordering::Relaxed)
    }

    pub fn collision_checks(&self) -> u64 {
        self.collision_checks.load(Ordering::Relaxed)
    }

    pub fn claims_saved(&self) -> u64 {
        self.claims_saved.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    /// Snapshot counters, resetting the per-interval ones
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let checks = self.checks_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.check_latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.check_latency_max_us.swap(0, Ordering::Relaxed);

        MetricsSummary {
            interval_secs: elapsed_secs,
            fixes_accepted: self.fixes_accepted.load(Ordering::Relaxed),
            fixes_low_accuracy: self.fixes_low_accuracy.load(Ordering::Relaxed),
            fixes_speed_anomaly: self.fixes_speed_anomaly.load(Ordering::Relaxed),
            fixes_other_rejected: self.fixes_other_rejected.load(Ordering::Relaxed),
            loops_closed: self.loops_closed.load(Ordering::Relaxed),
            loops_invalid: self.loops_invalid.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
            collision_checks: self.collision_checks.load(Ordering::Relaxed),
            checks_in_interval: checks,
            avg_check_latency_us: if checks > 0 { latency_sum / checks } else { 0 },
            max_check_latency_us: latency_max,
            claims_saved: self.claims_saved.load(Ordering::Relaxed),
            claim_save_failures: self.claim_save_failures.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub interval_secs: f64,
    pub fixes_accepted: u64,
    pub fixes_low_accuracy: u64,
    pub fixes_speed_anomaly: u64,
    pub fixes_other_rejected: u64,
    pub loops_closed: u64,
    pub loops_invalid: u64,
    pub violations: u64,
    pub collision_checks: u64,
    pub checks_in_interval: u64,
    pub avg_check_latency_us: u64,
    pub max_check_latency_us: u64,
    pub claims_saved: u64,
    pub claim_save_failures: u64,
    pub events_dropped: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            interval_secs = format!("{:.1}", self.interval_secs),
            fixes_accepted = %self.fixes_accepted,
            fixes_low_accuracy = %self.fixes_low_accuracy,
            fixes_speed_anomaly = %self.fixes_speed_anomaly,
            fixes_other_rejected = %self.fixes_other_rejected,
            loops_closed = %self.loops_closed,
            loops_invalid = %self.loops_invalid,
            violations = %self.violations,
            checks = %self.checks_in_interval,
            avg_check_us = %self.avg_check_latency_us,
            max_check_us = %self.max_check_latency_us,
            claims_saved = %self.claims_saved,
            save_failures = %self.claim_save_failures,
            events_dropped = %self.events_dropped,
            "metrics"
        );
    }
}
