//! End-to-end claim flow against the JSONL territory store

use std::path::{Path, PathBuf};
use std::sync::Arc;
use territory_engine::domain::{GeoPoint, RawFix, SessionStatus};
use territory_engine::infra::{Config, Metrics};
use territory_engine::io::{read_fix_log, JsonlRepository, TerritoryRepository};
use territory_engine::services::ClaimEngine;
use tempfile::tempdir;

fn square_walk() -> Vec<RawFix> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos").join("square_walk.jsonl");
    read_fix_log(path).unwrap()
}

fn engine_for(owner: &str, store: &Path) -> ClaimEngine<JsonlRepository> {
    let config = Config::default()
        .with_owner_id(owner)
        .with_territories_file(store.to_str().unwrap());
    let repo = JsonlRepository::new(config.territories_file());
    ClaimEngine::new(&config, repo, Arc::new(Metrics::new()))
}

fn replay(engine: &ClaimEngine<JsonlRepository>, fixes: &[RawFix]) {
    engine.start_tracking(fixes[0].point()).unwrap();
    for fix in fixes {
        engine.ingest_fix(fix);
        engine.run_collision_check();
    }
}

#[test]
fn test_recorded_walk_is_claimed_and_persisted() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("territories.jsonl");
    let fixes = square_walk();

    let engine = engine_for("alice", &store);
    replay(&engine, &fixes);
    assert_eq!(engine.current_status(), SessionStatus::Closed);

    // the coarse fix and the teleport are dropped
    let summary = engine.metrics().report();
    assert_eq!(summary.fixes_low_accuracy, 1);
    assert_eq!(summary.fixes_speed_anomaly, 1);

    let saved = engine.confirm_claim().unwrap();
    assert!((saved.area_m2 - 10_000.0).abs() < 500.0, "area {}", saved.area_m2);
    assert_eq!(engine.current_status(), SessionStatus::Idle);

    let reloaded = JsonlRepository::new(&store).load_all().unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].id, saved.id);
    assert!(reloaded[0].boundary.iter().all(|p| p.frame == territory_engine::domain::Frame::Storage));
}

#[test]
fn test_rival_cannot_start_inside_saved_claim() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("territories.jsonl");
    let fixes = square_walk();

    let alice = engine_for("alice", &store);
    replay(&alice, &fixes);
    alice.confirm_claim().unwrap();

    // centre of the square, expressed the way the UI would hand it over
    let centre = GeoPoint::storage(31.2308497, 121.4742258);
    let display = territory_engine::geo::DisplayDatum::Gcj02.to_display_frame(centre);

    let bob = engine_for("bob", &store);
    bob.start_tracking(display).unwrap();
    assert_eq!(bob.current_status(), SessionStatus::Aborted);

    // the owner may walk inside their own territory
    let alice_again = engine_for("alice", &store);
    alice_again.start_tracking(display).unwrap();
    assert_eq!(alice_again.current_status(), SessionStatus::Tracking);
}

#[test]
fn test_rival_walk_into_claim_is_aborted() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("territories.jsonl");
    let fixes = square_walk();

    let alice = engine_for("alice", &store);
    replay(&alice, &fixes);
    alice.confirm_claim().unwrap();

    // bob walks the same loop starting 200 m south and heads north into it
    let bob = engine_for("bob", &store);
    let mut shifted: Vec<RawFix> = fixes.clone();
    for fix in shifted.iter_mut() {
        fix.lat -= 0.0018;
    }
    bob.start_tracking(shifted[0].point()).unwrap();
    assert_eq!(bob.current_status(), SessionStatus::Tracking);

    let mut aborted_at = None;
    for (i, fix) in shifted.iter().enumerate() {
        let mut north = fix.clone();
        north.lat += 0.0018 * (i as f64 / shifted.len() as f64);
        bob.ingest_fix(&north);
        bob.run_collision_check();
        if bob.current_status() == SessionStatus::Aborted {
            aborted_at = Some(i);
            break;
        }
    }
    assert!(aborted_at.is_some());
    let result = bob.last_collision_result().unwrap();
    assert!(result.is_violation());
    assert_eq!(bob.repository().load_all().unwrap().len(), 1);
}
