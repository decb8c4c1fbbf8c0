//! Location fix log reader
//!
//! Fix logs are JSONL, one `RawFix` per line, as recorded from a device
//! location provider. Used by the simulator to replay a walk.

use crate::domain::types::RawFix;
use anyhow::Context;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Read every parseable fix from a JSONL log, in file order
pub fn read_fix_log<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<RawFix>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read fix log {}", path.display()))?;
    Ok(parse_fix_lines(&content, &path.display().to_string()))
}

fn parse_fix_lines(content: &str, source: &str) -> Vec<RawFix> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        .filter_map(|(i, line)| match serde_json::from_str::<RawFix>(line) {
            Ok(fix) => Some(fix),
            Err(e) => {
                warn!(source = %source, line = %(i + 1), error = %e, "fix_line_skipped");
                None
            }
        })
        .collect()
}
