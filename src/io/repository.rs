//! Territory repository - the external store the engine reads and writes
//!
//! The engine treats the store as a synchronous, fallible collaborator.
//! Two implementations ship with the crate:
//! - `InMemoryRepository` for embedding and tests
//! - `JsonlRepository`, one territory JSON object per line

use crate::domain::types::{new_territory_id, NewClaim, Territory};
use anyhow::Context;
use chrono::Utc;
use parking_lot::RwLock;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub trait TerritoryRepository: Send + Sync + 'static {
    /// All persisted territories (storage frame)
    fn load_all(&self) -> anyhow::Result<Vec<Territory>>;

    /// Persist a confirmed claim, returning the stored territory
    fn save(&self, claim: NewClaim) -> anyhow::Result<Territory>;
}

fn territory_from_claim(claim: NewClaim) -> Territory {
    Territory {
        id: new_territory_id(),
        owner_id: claim.owner_id,
        boundary: claim.boundary,
        area_m2: claim.area_m2,
        created_at: Utc::now(),
    }
}

/// Territories held in memory
#[derive(Default)]
pub struct InMemoryRepository {
    territories: RwLock<Vec<Territory>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_territories(territories: Vec<Territory>) -> Self {
        Self { territories: RwLock::new(territories) }
    }

    pub fn len(&self) -> usize {
        self.territories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.territories.read().is_empty()
    }
}

impl TerritoryRepository for InMemoryRepository {
    fn load_all(&self) -> anyhow::Result<Vec<Territory>> {
        Ok(self.territories.read().clone())
    }

    fn save(&self, claim: NewClaim) -> anyhow::Result<Territory> {
        let territory = territory_from_claim(claim);
        self.territories.write().push(territory.clone());
        Ok(territory)
    }
}

/// JSONL file store
pub struct JsonlRepository {
    file_path: PathBuf,
}

impl JsonlRepository {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        info!(file_path = %file_path.display(), "territory_store_initialized");
        Self { file_path }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path.display(), bytes = %line.len(), "territory_written");
        Ok(())
    }
}

impl TerritoryRepository for JsonlRepository {
    fn load_all(&self) -> anyhow::Result<Vec<Territory>> {
        if !self.file_path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.file_path)
            .with_context(|| format!("Failed to read territory store {}", self.file_path.display()))?;

        let mut territories = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Territory>(line) {
                Ok(territory) => territories.push(territory),
                Err(e) => {
                    warn!(
                        file = %self.file_path.display(),
                        line = %(line_no + 1),
                        error = %e,
                        "territory_line_skipped"
                    );
                }
            }
        }
        Ok(territories)
    }

    fn save(&self, claim: NewClaim) -> anyhow::Result<Territory> {
        let territory = territory_from_claim(claim);
        let json = serde_json::to_string(&territory).context("Failed to encode territory")?;
        self.append_line(&json).with_context(|| {
            format!("Failed to append to territory store {}", self.file_path.display())
        })?;
        info!(
            territory_id = %territory.id,
            owner_id = %territory.owner_id,
            area_m2 = %format!("{:.1}", territory.area_m2),
            "territory_saved"
        );
        Ok(territory)
    }
}
