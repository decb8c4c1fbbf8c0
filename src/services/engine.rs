//! Claim engine - hosts the tracking session for the surrounding application
//!
//! Single-writer discipline: every session mutation (fix ingestion, status
//! changes, applying a collision result) happens under one mutex. The
//! periodic collision check only holds that lock long enough to take an
//! `Arc` snapshot of the path, computes outside it, and applies the result
//! tagged with the session it was computed for, so results that arrive after
//! tracking ended are dropped. Events are forwarded before the lock is
//! released; `try_send` never blocks.
//!
//! Frames: geometry handed to the UI is converted to the display frame here,
//! geometry handed to the repository stays in the storage frame.

use crate::domain::events::{Events, SessionEvent, SessionStatus};
use crate::domain::types::{GeoPoint, NewClaim, OwnerId, RawFix, Territory};
use crate::geo::DisplayDatum;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::repository::TerritoryRepository;
use crate::services::collision::{CollisionDetector, CollisionResult, StartCheck};
use crate::services::monitor::{spawn_monitor, MonitorHandle};
use crate::services::session::{PathSnapshot, SessionError, TrackingSession};
use crate::services::validator::ValidationResult;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("claim rejected: {}", .0.message)]
    ClaimRejected(CollisionResult),
    #[error("territory store failed: {0:#}")]
    Repository(anyhow::Error),
}

impl EngineError {
    /// Store failures leave the session untouched and can be retried as is
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Repository(_))
    }
}

struct Shared<R> {
    session: Mutex<TrackingSession>,
    territories: RwLock<Arc<Vec<Territory>>>,
    monitor: Mutex<Option<MonitorHandle>>,
    monitor_enabled: AtomicBool,
    repo: R,
    owner_id: OwnerId,
    datum: DisplayDatum,
    detector: CollisionDetector,
    check_interval: Duration,
    metrics: Arc<Metrics>,
    events_tx: Option<mpsc::Sender<SessionEvent>>,
}

/// Cheaply cloneable handle; clones share one session
pub struct ClaimEngine<R: TerritoryRepository> {
    shared: Arc<Shared<R>>,
}

impl<R: TerritoryRepository> Clone for ClaimEngine<R> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<R: TerritoryRepository> ClaimEngine<R> {
    pub fn new(config: &Config, repo: R, metrics: Arc<Metrics>) -> Self {
        Self::build(config, repo, metrics, None)
    }

    /// Engine plus the receiving end of its event stream
    ///
    /// Events are sent with `try_send`; when the consumer falls behind they
    /// are dropped and counted rather than blocking ingestion.
    pub fn with_event_channel(
        config: &Config,
        repo: R,
        metrics: Arc<Metrics>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::build(config, repo, metrics, Some(tx)), rx)
    }

    fn build(
        config: &Config,
        repo: R,
        metrics: Arc<Metrics>,
        events_tx: Option<mpsc::Sender<SessionEvent>>,
    ) -> Self {
        let shared = Shared {
            session: Mutex::new(TrackingSession::new(config)),
            territories: RwLock::new(Arc::new(Vec::new())),
            monitor: Mutex::new(None),
            monitor_enabled: AtomicBool::new(true),
            repo,
            owner_id: config.owner_id().clone(),
            datum: config.display_datum(),
            detector: CollisionDetector::new(config.collision()),
            check_interval: Duration::from_secs(config.collision().check_interval_secs.max(1)),
            metrics,
            events_tx,
        };
        Self { shared: Arc::new(shared) }
    }

    /// Whether `start_tracking` spawns the periodic collision monitor
    ///
    /// Hosts that drive `run_collision_check` themselves (e.g. replaying a
    /// recorded walk on its own clock) turn this off.
    pub fn set_monitor_enabled(&self, enabled: bool) {
        self.shared.monitor_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.shared.owner_id
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.shared.metrics
    }

    pub fn repository(&self) -> &R {
        &self.shared.repo
    }

    /// Reload the territory set from the repository
    pub fn refresh_territories(&self) -> Result<Arc<Vec<Territory>>, EngineError> {
        let loaded = self.shared.repo.load_all().map_err(|e| {
            warn!(error = %format!("{:#}", e), "territory_refresh_failed");
            EngineError::Repository(e)
        })?;
        let loaded = Arc::new(loaded);
        *self.shared.territories.write() = Arc::clone(&loaded);
        debug!(territories = %loaded.len(), "territories_refreshed");
        Ok(loaded)
    }

    /// Cached territory set as of the last refresh
    pub fn territories(&self) -> Arc<Vec<Territory>> {
        self.shared.territories.read().clone()
    }

    /// Begin a claim at `start` (either frame)
    ///
    /// Refreshes territories first. A start inside a foreign territory moves
    /// the session straight to `Aborted`; that is reported through the
    /// returned events, not as an error.
    pub fn start_tracking(&self, start: GeoPoint) -> Result<Events, EngineError> {
        let start = self.shared.datum.to_storage_frame(start);
        let mut session = self.shared.session.lock();
        match session.status() {
            SessionStatus::Idle => {}
            SessionStatus::Tracking => return Err(SessionError::AlreadyTracking.into()),
            other => return Err(SessionError::NotIdle(other).into()),
        }

        let territories = self.refresh_territories()?;
        let events = match self.shared.detector.check_start(
            &start,
            &territories,
            Some(&self.shared.owner_id),
        ) {
            StartCheck::Clear => session.start(Utc::now())?,
            StartCheck::Blocked(territory_id) => {
                warn!(start = %start, territory_id = %territory_id, "start_blocked");
                session.block_start(territory_id, Utc::now())?
            }
        };

        if session.status() == SessionStatus::Tracking {
            self.spawn_monitor_for(session.id());
        }
        self.dispatch(&events);
        Ok(events)
    }

    /// Feed one raw fix from the location provider
    pub fn ingest_fix(&self, fix: &RawFix) -> Events {
        let mut session = self.shared.session.lock();
        let events = session.ingest(fix);
        self.sync_monitor(session.status());
        self.dispatch(&events);
        events
    }

    /// User cancel: Tracking → Aborted, path kept until `discard`
    pub fn stop_tracking(&self) -> Result<Events, EngineError> {
        let mut session = self.shared.session.lock();
        let events = session.cancel()?;
        self.sync_monitor(session.status());
        self.dispatch(&events);
        Ok(events)
    }

    /// Drop a closed or aborted attempt and return to Idle
    pub fn discard(&self) -> Result<Events, EngineError> {
        let mut session = self.shared.session.lock();
        let events = session.reset()?;
        self.dispatch(&events);
        Ok(events)
    }

    /// Persist the current closed, valid claim
    ///
    /// The ring is re-checked against freshly loaded territories before
    /// saving. The session returns to Idle only once the repository accepted
    /// the claim; on any failure the path is left intact.
    pub fn confirm_claim(&self) -> Result<Territory, EngineError> {
        let mut session = self.shared.session.lock();
        let claim = session.closed_claim()?;

        let territories = self.refresh_territories()?;
        let check =
            self.shared.detector.check_claim(&claim.boundary, &territories, Some(&self.shared.owner_id));
        if check.is_violation() {
            warn!(
                session = %claim.session,
                territory_id = ?check.territory_id,
                message = %check.message,
                "claim_rejected"
            );
            return Err(EngineError::ClaimRejected(check));
        }

        let new_claim = NewClaim {
            owner_id: self.shared.owner_id.clone(),
            boundary: claim.boundary,
            area_m2: claim.area_m2,
        };
        let saved = match self.shared.repo.save(new_claim) {
            Ok(territory) => territory,
            Err(e) => {
                self.shared.metrics.record_claim_save_failure();
                warn!(session = %claim.session, error = %format!("{:#}", e), "claim_save_failed");
                return Err(EngineError::Repository(e));
            }
        };
        self.shared.metrics.record_claim_saved();
        info!(
            session = %claim.session,
            territory_id = %saved.id,
            area_m2 = %format!("{:.1}", saved.area_m2),
            points = %saved.boundary.len(),
            "claim_confirmed"
        );

        {
            let mut cached = self.shared.territories.write();
            Arc::make_mut(&mut *cached).push(saved.clone());
        }

        let events = session.reset()?;
        self.dispatch(&events);
        Ok(saved)
    }

    /// One proximity check over a snapshot of the current path
    ///
    /// Returns None when there is nothing to check. A Violation aborts the
    /// session if it is still the one the snapshot was taken from.
    pub fn run_collision_check(&self) -> Option<CollisionResult> {
        let snapshot = self.shared.session.lock().snapshot();
        if snapshot.status != SessionStatus::Tracking || snapshot.path.is_empty() {
            return None;
        }

        let territories = self.territories();
        let started = Instant::now();
        let result =
            self.shared.detector.check_path(&snapshot.path, &territories, Some(&self.shared.owner_id));
        self.shared.metrics.record_collision_check(started.elapsed().as_micros() as u64);
        debug!(
            session = %snapshot.session,
            points = %snapshot.path.len(),
            level = %result.level.as_str(),
            distance_m = ?result.distance_m,
            "collision_checked"
        );

        let mut session = self.shared.session.lock();
        let events = session.apply_collision(&snapshot, result.clone());
        self.sync_monitor(session.status());
        self.dispatch(&events);
        Some(result)
    }

    /// Current path in the display frame, closed for rendering once the loop closed
    pub fn current_path(&self) -> Vec<GeoPoint> {
        let ring = self.shared.session.lock().closed_ring();
        self.shared.datum.path_to_display(&ring)
    }

    /// Canonical unclosed path in the storage frame
    pub fn current_path_storage(&self) -> Vec<GeoPoint> {
        self.shared.session.lock().path().to_vec()
    }

    pub fn current_status(&self) -> SessionStatus {
        self.shared.session.lock().status()
    }

    pub fn last_collision_result(&self) -> Option<CollisionResult> {
        self.shared.session.lock().last_collision().cloned()
    }

    pub fn last_validation(&self) -> Option<ValidationResult> {
        self.shared.session.lock().last_validation().cloned()
    }

    pub fn snapshot(&self) -> PathSnapshot {
        self.shared.session.lock().snapshot()
    }

    pub fn monitor_running(&self) -> bool {
        self.shared.monitor.lock().as_ref().is_some_and(|m| !m.is_finished())
    }

    /// Caller holds the session lock
    fn spawn_monitor_for(&self, session: uuid::Uuid) {
        if !self.shared.monitor_enabled.load(Ordering::Relaxed) {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            debug!(session = %session, "collision_monitor_no_runtime");
            return;
        }

        // the task holds a weak reference so a dropped engine ends it
        let weak = Arc::downgrade(&self.shared);
        let handle = spawn_monitor(session, self.shared.check_interval, move || {
            let Some(shared) = weak.upgrade() else {
                return false;
            };
            let engine = ClaimEngine { shared };
            engine.run_collision_check();
            engine.current_status() == SessionStatus::Tracking && engine.snapshot().session == session
        });

        if let Some(previous) = self.shared.monitor.lock().replace(handle) {
            previous.stop();
        }
    }

    /// Caller holds the session lock; any status but Tracking stops the monitor
    fn sync_monitor(&self, status: SessionStatus) {
        if status == SessionStatus::Tracking {
            return;
        }
        if let Some(handle) = self.shared.monitor.lock().take() {
            handle.stop();
        }
    }

    /// Caller holds the session lock, so events leave in transition order
    fn dispatch(&self, events: &Events) {
        if events.is_empty() {
            return;
        }
        self.shared.metrics.record_events(events.iter());

        let Some(tx) = &self.shared.events_tx else {
            return;
        };
        for event in events {
            if let Err(e) = tx.try_send(event.clone()) {
                self.shared.metrics.record_event_dropped();
                debug!(event = %event.as_str(), error = %e, "event_dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TerritoryId;
    use crate::geo::planar::EARTH_RADIUS_M;
    use crate::io::repository::InMemoryRepository;
    use crate::services::collision::CollisionLevel;
    use chrono::{DateTime, TimeZone};

    const LAT0: f64 = 31.2304;
    const LON0: f64 = 121.4737;

    fn at(north_m: f64, east_m: f64) -> GeoPoint {
        let dlat = (north_m / EARTH_RADIUS_M).to_degrees();
        let dlon = (east_m / (EARTH_RADIUS_M * LAT0.to_radians().cos())).to_degrees();
        GeoPoint::storage(LAT0 + dlat, LON0 + dlon)
    }

    struct Walk {
        t0: DateTime<Utc>,
        step: i64,
    }

    impl Walk {
        fn new() -> Self {
            Self { t0: Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap(), step: 0 }
        }

        fn fix(&mut self, north_m: f64, east_m: f64) -> RawFix {
            self.step += 1;
            let p = at(north_m, east_m);
            RawFix {
                lat: p.lat,
                lon: p.lon,
                accuracy_m: 5.0,
                speed_mps: None,
                timestamp: self.t0 + chrono::Duration::seconds(30 * self.step),
            }
        }
    }

    const SQUARE: [(f64, f64); 9] = [
        (0.0, 0.0),
        (0.0, 50.0),
        (0.0, 100.0),
        (50.0, 100.0),
        (100.0, 100.0),
        (100.0, 50.0),
        (100.0, 0.0),
        (50.0, 0.0),
        (3.0, 0.0),
    ];

    /// 100 m square owned by someone else, `north_m` north of the origin
    fn rival_territory(north_m: f64) -> Territory {
        Territory {
            id: TerritoryId("rival-1".to_string()),
            owner_id: OwnerId("rival".to_string()),
            boundary: vec![
                at(north_m, 0.0),
                at(north_m, 100.0),
                at(north_m + 100.0, 100.0),
                at(north_m + 100.0, 0.0),
            ],
            area_m2: 10_000.0,
            created_at: Utc::now(),
        }
    }

    fn engine(repo: InMemoryRepository) -> ClaimEngine<InMemoryRepository> {
        ClaimEngine::new(&Config::default().with_owner_id("me"), repo, Arc::new(Metrics::new()))
    }

    fn walk_square(engine: &ClaimEngine<impl TerritoryRepository>) {
        let mut walk = Walk::new();
        for (n, e) in SQUARE {
            engine.ingest_fix(&walk.fix(n, e));
        }
    }

    /// Fails every save until `healthy` is set, and every load while `readable` is clear
    struct FlakyRepository {
        inner: InMemoryRepository,
        healthy: AtomicBool,
        readable: AtomicBool,
    }

    impl FlakyRepository {
        fn new(healthy: bool, readable: bool) -> Self {
            Self {
                inner: InMemoryRepository::new(),
                healthy: AtomicBool::new(healthy),
                readable: AtomicBool::new(readable),
            }
        }
    }

    impl TerritoryRepository for FlakyRepository {
        fn load_all(&self) -> anyhow::Result<Vec<Territory>> {
            if !self.readable.load(Ordering::SeqCst) {
                anyhow::bail!("store unreadable");
            }
            self.inner.load_all()
        }

        fn save(&self, claim: NewClaim) -> anyhow::Result<Territory> {
            if !self.healthy.load(Ordering::SeqCst) {
                anyhow::bail!("store offline");
            }
            self.inner.save(claim)
        }
    }

    #[test]
    fn test_full_claim_is_saved() {
        let engine = engine(InMemoryRepository::new());
        engine.start_tracking(at(0.0, 0.0)).unwrap();
        assert_eq!(engine.current_status(), SessionStatus::Tracking);

        walk_square(&engine);
        assert_eq!(engine.current_status(), SessionStatus::Closed);
        let area = engine.last_validation().and_then(|v| v.area_m2()).unwrap();
        assert!((area - 10_000.0).abs() < 300.0, "area {}", area);

        let saved = engine.confirm_claim().unwrap();
        assert_eq!(saved.owner_id, OwnerId("me".to_string()));
        assert_eq!(saved.boundary.len(), SQUARE.len());
        assert_eq!(engine.current_status(), SessionStatus::Idle);
        assert!(engine.current_path_storage().is_empty());
        assert_eq!(engine.repository().len(), 1);
        assert_eq!(engine.territories().len(), 1);
        assert_eq!(engine.metrics().claims_saved(), 1);
    }

    #[test]
    fn test_start_inside_foreign_territory_is_blocked() {
        let repo = InMemoryRepository::with_territories(vec![rival_territory(0.0)]);
        let engine = engine(repo);

        let events = engine.start_tracking(at(50.0, 50.0)).unwrap();
        assert_eq!(engine.current_status(), SessionStatus::Aborted);
        assert!(events.iter().any(|e| e.as_str() == "aborted"));

        // nothing is appended while aborted
        assert!(engine.ingest_fix(&Walk::new().fix(50.0, 50.0)).is_empty());
        assert!(engine.confirm_claim().is_err());
        assert_eq!(engine.repository().len(), 1);
    }

    #[test]
    fn test_start_while_tracking_rejected() {
        let engine = engine(InMemoryRepository::new());
        engine.start_tracking(at(0.0, 0.0)).unwrap();
        let err = engine.start_tracking(at(0.0, 0.0)).unwrap_err();
        assert!(matches!(err, EngineError::Session(SessionError::AlreadyTracking)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_save_failure_is_retryable_and_keeps_path() {
        let repo = FlakyRepository::new(false, true);
        let engine = ClaimEngine::new(&Config::default(), repo, Arc::new(Metrics::new()));
        engine.start_tracking(at(0.0, 0.0)).unwrap();
        walk_square(&engine);

        let err = engine.confirm_claim().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(engine.current_status(), SessionStatus::Closed);
        assert_eq!(engine.current_path_storage().len(), SQUARE.len());

        engine.repository().healthy.store(true, Ordering::SeqCst);
        engine.confirm_claim().unwrap();
        assert_eq!(engine.current_status(), SessionStatus::Idle);
        assert_eq!(engine.metrics().report().claim_save_failures, 1);
    }

    #[test]
    fn test_load_failure_on_start_is_retryable() {
        let engine =
            ClaimEngine::new(&Config::default(), FlakyRepository::new(true, false), Arc::new(Metrics::new()));

        let err = engine.start_tracking(at(0.0, 0.0)).unwrap_err();
        assert!(matches!(err, EngineError::Repository(_)));
        assert!(err.is_retryable());
        assert_eq!(engine.current_status(), SessionStatus::Idle);
        assert!(engine.current_path_storage().is_empty());

        engine.repository().readable.store(true, Ordering::SeqCst);
        engine.start_tracking(at(0.0, 0.0)).unwrap();
        assert_eq!(engine.current_status(), SessionStatus::Tracking);
    }

    #[test]
    fn test_load_failure_on_confirm_is_retryable_and_keeps_path() {
        let engine =
            ClaimEngine::new(&Config::default(), FlakyRepository::new(true, true), Arc::new(Metrics::new()));
        engine.start_tracking(at(0.0, 0.0)).unwrap();
        walk_square(&engine);
        assert_eq!(engine.current_status(), SessionStatus::Closed);
        let walked = engine.current_path_storage();

        engine.repository().readable.store(false, Ordering::SeqCst);
        let err = engine.confirm_claim().unwrap_err();
        assert!(matches!(err, EngineError::Repository(_)));
        assert!(err.is_retryable());
        assert_eq!(engine.current_status(), SessionStatus::Closed);
        assert_eq!(engine.current_path_storage(), walked);
        assert!(engine.last_validation().is_some_and(|v| v.is_valid()));
        assert_eq!(engine.repository().inner.len(), 0);

        engine.repository().readable.store(true, Ordering::SeqCst);
        let saved = engine.confirm_claim().unwrap();
        assert_eq!(saved.boundary, walked);
        assert_eq!(engine.current_status(), SessionStatus::Idle);
    }

    #[test]
    fn test_collision_violation_aborts_and_freezes_path() {
        let repo = InMemoryRepository::with_territories(vec![rival_territory(150.0)]);
        let engine = engine(repo);
        engine.start_tracking(at(0.0, 50.0)).unwrap();

        let mut walk = Walk::new();
        engine.ingest_fix(&walk.fix(0.0, 50.0));
        engine.ingest_fix(&walk.fix(60.0, 50.0));
        let result = engine.run_collision_check().unwrap();
        assert_eq!(result.level, CollisionLevel::Caution);
        assert_eq!(engine.current_status(), SessionStatus::Tracking);

        engine.ingest_fix(&walk.fix(130.0, 50.0));
        assert_eq!(engine.run_collision_check().unwrap().level, CollisionLevel::Danger);

        engine.ingest_fix(&walk.fix(180.0, 50.0));
        let result = engine.run_collision_check().unwrap();
        assert!(result.is_violation());
        assert_eq!(result.territory_id, Some(TerritoryId("rival-1".to_string())));
        assert_eq!(engine.current_status(), SessionStatus::Aborted);

        let frozen = engine.current_path_storage().len();
        assert!(engine.ingest_fix(&walk.fix(190.0, 50.0)).is_empty());
        assert_eq!(engine.current_path_storage().len(), frozen);
        assert!(engine.run_collision_check().is_none());
    }

    #[test]
    fn test_claim_overlapping_territory_saved_meanwhile_is_rejected() {
        let repo = InMemoryRepository::new();
        let engine = engine(repo);
        engine.start_tracking(at(0.0, 0.0)).unwrap();
        walk_square(&engine);
        assert_eq!(engine.current_status(), SessionStatus::Closed);

        // someone else claims an overlapping parcel before we confirm
        let mut rival = rival_territory(50.0);
        rival.boundary = vec![at(50.0, 50.0), at(50.0, 150.0), at(150.0, 150.0), at(150.0, 50.0)];
        engine
            .repository()
            .save(NewClaim { owner_id: rival.owner_id, boundary: rival.boundary, area_m2: 10_000.0 })
            .unwrap();

        let err = engine.confirm_claim().unwrap_err();
        assert!(matches!(err, EngineError::ClaimRejected(_)));
        assert_eq!(engine.current_status(), SessionStatus::Closed);
        assert_eq!(engine.repository().len(), 1);
    }

    #[test]
    fn test_stop_keeps_path_until_discard() {
        let engine = engine(InMemoryRepository::new());
        engine.start_tracking(at(0.0, 0.0)).unwrap();
        let mut walk = Walk::new();
        engine.ingest_fix(&walk.fix(0.0, 0.0));
        engine.ingest_fix(&walk.fix(0.0, 40.0));

        engine.stop_tracking().unwrap();
        assert_eq!(engine.current_status(), SessionStatus::Aborted);
        assert_eq!(engine.current_path_storage().len(), 2);

        engine.discard().unwrap();
        assert_eq!(engine.current_status(), SessionStatus::Idle);
        assert!(engine.current_path().is_empty());
    }

    #[test]
    fn test_current_path_is_display_frame() {
        let engine = engine(InMemoryRepository::new());
        engine.start_tracking(at(0.0, 0.0)).unwrap();
        engine.ingest_fix(&Walk::new().fix(0.0, 0.0));

        let display = engine.current_path();
        let storage = engine.current_path_storage();
        assert_eq!(display.len(), 1);
        assert_eq!(display[0].frame, crate::domain::types::Frame::Display);
        // Shanghai is inside the offset region
        assert!(crate::geo::haversine_m(&display[0], &storage[0]) > 100.0);
    }

    #[test]
    fn test_concurrent_readers_never_see_rollback() {
        let engine = engine(InMemoryRepository::with_territories(vec![rival_territory(5_000.0)]));
        engine.start_tracking(at(0.0, 0.0)).unwrap();

        std::thread::scope(|scope| {
            let writer = engine.clone();
            scope.spawn(move || {
                let mut walk = Walk::new();
                // a straight walk east so the loop never closes
                for i in 0..400 {
                    writer.ingest_fix(&walk.fix(0.0, i as f64 * 5.0));
                }
            });

            for _ in 0..3 {
                let reader = engine.clone();
                scope.spawn(move || {
                    let mut seen = 0;
                    for _ in 0..400 {
                        reader.run_collision_check();
                        let len = reader.snapshot().path.len();
                        assert!(len >= seen, "path shrank from {} to {}", seen, len);
                        seen = len;
                    }
                });
            }
        });

        assert_eq!(engine.current_path_storage().len(), 400);
        assert_eq!(engine.current_status(), SessionStatus::Tracking);
    }

    #[test]
    fn test_no_point_forwarded_after_abort() {
        for _ in 0..20 {
            let (engine, mut rx) = ClaimEngine::with_event_channel(
                &Config::default().with_owner_id("me"),
                InMemoryRepository::with_territories(vec![rival_territory(150.0)]),
                Arc::new(Metrics::new()),
                4096,
            );
            engine.start_tracking(at(0.0, 50.0)).unwrap();

            std::thread::scope(|scope| {
                let writer = engine.clone();
                scope.spawn(move || {
                    let mut walk = Walk::new();
                    // walks north straight through the rival parcel
                    for i in 0..80 {
                        writer.ingest_fix(&walk.fix(i as f64 * 5.0, 50.0));
                    }
                });

                let checker = engine.clone();
                scope.spawn(move || {
                    while checker.current_status() == SessionStatus::Tracking {
                        checker.run_collision_check();
                    }
                });
            });
            assert_eq!(engine.current_status(), SessionStatus::Aborted);

            let mut aborted = false;
            while let Ok(event) = rx.try_recv() {
                match event {
                    SessionEvent::Aborted { .. } => aborted = true,
                    SessionEvent::PointAccepted { index, .. } => {
                        assert!(!aborted, "point {} forwarded after the abort", index)
                    }
                    _ => {}
                }
            }
            assert!(aborted);
            assert_eq!(engine.metrics().events_dropped(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_runs_while_tracking_and_stops_on_cancel() {
        let engine = engine(InMemoryRepository::with_territories(vec![rival_territory(150.0)]));
        engine.start_tracking(at(0.0, 50.0)).unwrap();
        assert!(engine.monitor_running());

        engine.ingest_fix(&Walk::new().fix(60.0, 50.0));
        tokio::time::sleep(Duration::from_secs(11)).await;
        let result = engine.last_collision_result().unwrap();
        assert_eq!(result.level, CollisionLevel::Caution);

        engine.stop_tracking().unwrap();
        assert!(!engine.monitor_running());
        let checks = engine.metrics().collision_checks();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(engine.metrics().collision_checks(), checks);
    }

    #[tokio::test]
    async fn test_events_are_forwarded() {
        let (engine, mut rx) = ClaimEngine::with_event_channel(
            &Config::default(),
            InMemoryRepository::new(),
            Arc::new(Metrics::new()),
            16,
        );
        engine.set_monitor_enabled(false);
        engine.start_tracking(at(0.0, 0.0)).unwrap();
        engine.ingest_fix(&Walk::new().fix(0.0, 0.0));

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            SessionEvent::StatusChanged { to: SessionStatus::Tracking, .. }
        ));
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::PointAccepted { index: 0, .. }));
        assert!(!engine.monitor_running());
    }

    #[tokio::test]
    async fn test_full_channel_counts_drops() {
        let (engine, _rx) = ClaimEngine::with_event_channel(
            &Config::default(),
            InMemoryRepository::new(),
            Arc::new(Metrics::new()),
            1,
        );
        engine.set_monitor_enabled(false);
        engine.start_tracking(at(0.0, 0.0)).unwrap();
        engine.ingest_fix(&Walk::new().fix(0.0, 0.0));
        assert_eq!(engine.metrics().events_dropped(), 1);
    }
}
