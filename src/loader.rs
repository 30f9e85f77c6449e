//! URL list loading.
//!
//! Reads a newline-delimited list of MRF URLs. Surrounding whitespace is
//! stripped, and blank lines and `#` comment lines are dropped. Input order
//! is preserved; it decides round-robin shard membership.

use std::path::Path;

use crate::error::{FanoutError, Result};
use crate::models::WorkItem;

/// Read and normalize the work items in `path`.
pub fn load_urls(path: &Path) -> Result<Vec<WorkItem>> {
    let content = std::fs::read_to_string(path).map_err(|source| FanoutError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_urls(&content))
}

/// Normalize newline-delimited text into work items.
pub fn parse_urls(content: &str) -> Vec<WorkItem> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
