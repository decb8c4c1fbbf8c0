//! IO modules - external system interfaces
//!
//! - `repository` - Territory store (in-memory and JSONL file)
//! - `fixes` - Recorded location fix logs (JSONL)

pub mod fixes;
pub mod repository;

pub use fixes::read_fix_log;
pub use repository::{InMemoryRepository, JsonlRepository, TerritoryRepository};
