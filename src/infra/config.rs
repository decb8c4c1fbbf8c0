//! Configuration loading from TOML files
//!
//! Config file is selected by the `territory-sim` arguments:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and key is optional; missing values take the defaults below.
//! The thresholds are empirical tuning constants, only their ordering is
//! enforced by `validate()`.

use crate::domain::types::OwnerId;
use crate::geo::coords::DisplayDatum;
use anyhow::{ensure, Context};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Reject fixes whose horizontal accuracy radius exceeds this (meters)
    pub max_accuracy_m: f64,
    /// Teleport / spoofing ceiling (m/s)
    pub max_speed_mps: f64,
    /// Steps shorter than this are GPS jitter (meters)
    pub min_step_m: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { max_accuracy_m: 30.0, max_speed_mps: 12.0, min_step_m: 1.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClosureConfig {
    pub min_points: usize,
    pub min_traversed_m: f64,
    pub radius_m: f64,
}

impl Default for ClosureConfig {
    fn default() -> Self {
        Self { min_points: 4, min_traversed_m: 40.0, radius_m: 10.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_area_m2: f64,
    pub max_area_m2: f64,
    /// Multiplier on the L²/4π bound for a traversal of length L
    pub isoperimetric_slack: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { min_area_m2: 100.0, max_area_m2: 1_000_000.0, isoperimetric_slack: 1.05 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    pub far_m: f64,
    pub near_m: f64,
    pub danger_m: f64,
    pub check_interval_secs: u64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self { far_m: 100.0, near_m: 50.0, danger_m: 25.0, check_interval_secs: 10 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DisplayConfig {
    pub datum: DisplayDatum,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSONL file for the file-backed territory repository
    pub territories_file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { territories_file: "territories.jsonl".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub owner_id: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self { owner_id: "local-player".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub player: PlayerConfig,
    pub filter: FilterConfig,
    pub closure: ClosureConfig,
    pub validation: ValidationConfig,
    pub collision: CollisionConfig,
    pub display: DisplayConfig,
    pub store: StoreConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the engine
#[derive(Debug, Clone)]
pub struct Config {
    owner_id: OwnerId,
    filter: FilterConfig,
    closure: ClosureConfig,
    validation: ValidationConfig,
    collision: CollisionConfig,
    display_datum: DisplayDatum,
    territories_file: String,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            owner_id: OwnerId(toml_config.player.owner_id),
            filter: toml_config.filter,
            closure: toml_config.closure,
            validation: toml_config.validation,
            collision: toml_config.collision,
            display_datum: toml_config.display.datum,
            territories_file: toml_config.store.territories_file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, &path.display().to_string());
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    /// Check the relationships the engine depends on
    pub fn validate(&self) -> anyhow::Result<()> {
        let c = &self.collision;
        ensure!(
            c.far_m > c.near_m && c.near_m > c.danger_m && c.danger_m > 0.0,
            "collision thresholds must satisfy far_m > near_m > danger_m > 0 (got {} / {} / {})",
            c.far_m,
            c.near_m,
            c.danger_m
        );
        ensure!(c.check_interval_secs > 0, "collision.check_interval_secs must be positive");
        ensure!(self.closure.min_points >= 3, "closure.min_points must be at least 3");
        ensure!(self.closure.radius_m > 0.0, "closure.radius_m must be positive");
        ensure!(
            self.closure.min_traversed_m > 2.0 * self.closure.radius_m,
            "closure.min_traversed_m must exceed twice closure.radius_m"
        );
        ensure!(
            self.validation.max_area_m2 > self.validation.min_area_m2,
            "validation.max_area_m2 must exceed validation.min_area_m2"
        );
        ensure!(self.filter.max_speed_mps > 0.0, "filter.max_speed_mps must be positive");
        Ok(())
    }

    // Getters
    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    pub fn filter(&self) -> &FilterConfig {
        &self.filter
    }

    pub fn closure(&self) -> &ClosureConfig {
        &self.closure
    }

    pub fn validation(&self) -> &ValidationConfig {
        &self.validation
    }

    pub fn collision(&self) -> &CollisionConfig {
        &self.collision
    }

    pub fn display_datum(&self) -> DisplayDatum {
        self.display_datum
    }

    pub fn territories_file(&self) -> &str {
        &self.territories_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn with_owner_id(mut self, owner_id: &str) -> Self {
        self.owner_id = OwnerId(owner_id.to_string());
        self
    }

    pub fn with_territories_file(mut self, path: &str) -> Self {
        self.territories_file = path.to_string();
        self
    }
}
