//! territory-sim - replays a recorded walk through the claim engine
//!
//! Reads a JSONL fix log, starts tracking at the first fix, feeds every fix
//! through the engine and runs the collision check on the configured cadence
//! of fix time. A closed, valid loop is confirmed and saved to the JSONL
//! territory store.
//!
//! Module structure:
//! - `domain/` - Core claim types (GeoPoint, Territory, SessionEvent)
//! - `geo/` - Coordinate frames and planar geometry
//! - `services/` - Filter, session, validator, collision, engine
//! - `io/` - Territory repository, fix logs
//! - `infra/` - Config, metrics

use clap::Parser;
use std::sync::Arc;
use territory_engine::domain::{SessionEvent, SessionStatus};
use territory_engine::infra::{Config, Metrics};
use territory_engine::io::{read_fix_log, JsonlRepository};
use territory_engine::services::ClaimEngine;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Replay a recorded walk and claim the loop it traces
#[derive(Parser, Debug)]
#[command(name = "territory-sim", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,

    /// JSONL fix log to replay
    #[arg(short, long)]
    fixes: String,

    /// Territory store, overrides [store] territories_file
    #[arg(short, long)]
    territories: Option<String>,

    /// Claimant, overrides [player] owner_id
    #[arg(short, long)]
    owner: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Default: INFO, use RUST_LOG=debug for per-fix decisions
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("territory-sim starting");

    let mut config = Config::load_from_path(&args.config);
    if let Some(owner) = &args.owner {
        config = config.with_owner_id(owner);
    }
    if let Some(path) = &args.territories {
        config = config.with_territories_file(path);
    }
    config.validate()?;

    let collision = config.collision();
    info!(
        config_file = %config.config_file(),
        owner_id = %config.owner_id(),
        territories_file = %config.territories_file(),
        datum = %config.display_datum().as_str(),
        far_m = %collision.far_m,
        near_m = %collision.near_m,
        danger_m = %collision.danger_m,
        check_interval_secs = %collision.check_interval_secs,
        "config_loaded"
    );

    let fixes = read_fix_log(&args.fixes)?;
    let Some(first) = fixes.first() else {
        warn!(fixes_file = %args.fixes, "fix_log_empty");
        return Ok(());
    };
    info!(fixes_file = %args.fixes, fixes = %fixes.len(), "fix_log_loaded");

    let metrics = Arc::new(Metrics::new());
    let repo = JsonlRepository::new(config.territories_file());
    let (engine, mut event_rx) =
        ClaimEngine::with_event_channel(&config, repo, Arc::clone(&metrics), 1024);
    // replay drives collision checks on fix time instead of wall time
    engine.set_monitor_enabled(false);

    let consumer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(&event);
        }
    });

    let reporter_metrics = Arc::clone(&metrics);
    let metrics_interval = config.metrics_interval_secs();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            reporter_metrics.report().log();
        }
    });

    engine.start_tracking(first.point())?;

    let cadence = chrono::Duration::seconds(collision.check_interval_secs as i64);
    let mut next_check = first.timestamp + cadence;
    for fix in &fixes {
        if engine.current_status() != SessionStatus::Tracking {
            break;
        }
        while fix.timestamp >= next_check {
            engine.run_collision_check();
            next_check += cadence;
        }
        engine.ingest_fix(fix);
    }

    match engine.current_status() {
        SessionStatus::Closed if engine.last_validation().is_some_and(|v| v.is_valid()) => {
            match engine.confirm_claim() {
                Ok(territory) => info!(
                    territory_id = %territory.id,
                    area_m2 = %format!("{:.1}", territory.area_m2),
                    "claim_saved"
                ),
                Err(e) => warn!(error = %e, retryable = %e.is_retryable(), "claim_not_saved"),
            }
        }
        SessionStatus::Closed => {
            warn!(validation = ?engine.last_validation(), "claim_discarded");
            engine.discard()?;
        }
        SessionStatus::Tracking => {
            info!(points = %engine.current_path_storage().len(), "fix_log_ended_before_closure");
            engine.stop_tracking()?;
        }
        SessionStatus::Aborted | SessionStatus::Idle => {
            info!(status = %engine.current_status().as_str(), "replay_finished");
        }
    }

    reporter.abort();
    metrics.report().log();

    // last engine handle closes the event channel
    drop(engine);
    let _ = consumer.await;

    info!("territory-sim finished");
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::PointAccepted { .. } | SessionEvent::FixRejected { .. } => {
            tracing::debug!(event = %event.as_str(), detail = ?event, "session_event");
        }
        SessionEvent::SpeedWarning { speed_mps, .. } => {
            warn!(speed_mps = %format!("{:.1}", speed_mps), "speed_warning");
        }
        SessionEvent::CollisionAssessed { result, .. } => {
            info!(
                level = %result.level.as_str(),
                distance_m = ?result.distance_m,
                message = %result.message,
                "proximity"
            );
        }
        _ => match serde_json::to_string(event) {
            Ok(json) => info!(event = %event.as_str(), payload = %json, "session_event"),
            Err(e) => warn!(event = %event.as_str(), error = %e, "session_event_encode_failed"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_config_path_falls_back_to_environment() {
        let command = Args::command();
        let config = command
            .get_arguments()
            .find(|arg| arg.get_id() == "config")
            .expect("config argument");
        assert_eq!(config.get_env(), Some(std::ffi::OsStr::new("CONFIG_FILE")));
    }

    #[test]
    fn test_config_flag_wins() {
        let args = Args::try_parse_from([
            "territory-sim",
            "--config",
            "config/park.toml",
            "--fixes",
            "walk.jsonl",
        ])
        .unwrap();
        assert_eq!(args.config, "config/park.toml");
        assert_eq!(args.fixes, "walk.jsonl");
    }
}
