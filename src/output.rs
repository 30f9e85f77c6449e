//! Persisting the merged artifact.
//!
//! The artifact is written as pretty-printed JSON. A destination of `-`
//! writes to stdout for piping; anything else is treated as a file path
//! whose parent directories are created on demand.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::SearchOutput;

/// Whether `path` means "write to stdout".
pub fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Timestamped default artifact path inside `dir`, e.g.
/// `./results_20260118_140211.json`.
pub fn default_output_path(dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("results_{}.json", stamp))
}

/// Serialize `output` and write it to `path`.
pub fn write_output(path: &Path, output: &SearchOutput) -> Result<()> {
    let json = serde_json::to_string_pretty(output)?;

    if is_stdout(path) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(json.as_bytes())?;
        handle.write_all(b"\n")?;
        handle.flush()?;
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write results to {}", path.display()))?;
    Ok(())
}
