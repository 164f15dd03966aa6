//! Durable per-session position tracking.
//!
//! The only durable stenographer state: how many parsed records have been
//! consumed and how many exchanges have been emitted for one session file.
//! Stored as a single flat text line `path:records:exchanges`, rewritten
//! atomically. Rebuildable from nothing — losing it just means re-emission,
//! which the persist stage's idempotency key absorbs.

use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug)]
pub struct PositionFile {
    path: PathBuf,
}

impl PositionFile {
    /// Position file for a session, named after the session file stem.
    pub fn for_session(positions_dir: &Path, session: &Path) -> Self {
        let stem = session
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session".into());
        Self {
            path: positions_dir.join(format!("{stem}.pos")),
        }
    }

    /// Load `(records_consumed, exchanges_emitted)`. Missing or unparseable
    /// files start from zero.
    pub fn load(&self) -> (usize, u64) {
        let Ok(contents) = std::fs::read_to_string(&self.path) else {
            return (0, 0);
        };
        let line = contents.trim();
        // Rightmost two fields; the session path itself may contain colons.
        let mut fields = line.rsplitn(3, ':');
        let exchanges = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        let records = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        (records, exchanges)
    }

    /// Atomically persist the current position.
    pub fn store(&self, session: &Path, records: usize, exchanges: u64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = format!("{}:{records}:{exchanges}\n", session.display());
        let tmp = self.path.with_extension("pos.tmp");
        std::fs::write(&tmp, line)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
