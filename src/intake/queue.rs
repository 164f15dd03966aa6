//! Filesystem directories as durable queues.
//!
//! The commit protocol is rename-only: producers write to a temp name and
//! rename into the queue; consumers rename out of the queue on success. No
//! file is ever mutated in place, so a crash at any point leaves every
//! record either fully in one directory or fully in another.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// List queue files oldest-first (lexicographic, which the transcript
/// filename format makes chronological). Temp and hidden files are skipped.
pub fn list_queue(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().and_then(|e| e.to_str()) == Some("json")
                && !path
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with('.'))
                    .unwrap_or(true)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Write a JSON value into a queue directory atomically.
pub fn write_json(dir: &Path, name: &str, value: &serde_json::Value) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let dest = dir.join(name);
    let tmp = dir.join(format!(".{name}.tmp"));
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp, &dest)?;
    Ok(dest)
}

/// Move a queue file into another directory. The rename is the commit point.
pub fn move_to(file: &Path, dest_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dest_dir)?;
    let name = file
        .file_name()
        .ok_or_else(|| Error::BadInput(format!("queue file has no name: {}", file.display())))?;
    let dest = dest_dir.join(name);
    std::fs::rename(file, &dest)?;
    Ok(dest)
}

/// Quarantine a permanently failing record: move it to `failed/` and write
/// an error sidecar next to it.
pub fn quarantine(file: &Path, failed_dir: &Path, error: &str) -> Result<PathBuf> {
    let dest = move_to(file, failed_dir)?;
    let sidecar = dest.with_extension("json.error");
    std::fs::write(&sidecar, error)?;
    Ok(dest)
}
