//! Verbatim transcript emission into the intake queue.
//!
//! One JSON file per exchange, written to a temp name and renamed into
//! place — consumers never observe a half-written file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// The queue record consumed by the intake pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub exchange_num: u64,
    pub timestamp: String,
    pub user: String,
    pub assistant: String,
    pub source: String,
    pub session: String,
    #[serde(rename = "type")]
    pub record_type: String,
}

impl TranscriptRecord {
    pub fn new(
        exchange_num: u64,
        user: String,
        assistant: String,
        source: &str,
        session: &str,
    ) -> Self {
        Self {
            exchange_num,
            timestamp: chrono::Utc::now().to_rfc3339(),
            user,
            assistant,
            source: source.to_string(),
            session: session.to_string(),
            record_type: "verbatim_transcript".to_string(),
        }
    }
}

/// Write a transcript record into the queue directory atomically.
/// Filename: `transcript_<seq>_<compact-iso-timestamp>.json`.
pub fn write_transcript(queue_dir: &Path, record: &TranscriptRecord) -> Result<PathBuf> {
    std::fs::create_dir_all(queue_dir)?;

    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let name = format!("transcript_{:06}_{stamp}.json", record.exchange_num);
    let dest = queue_dir.join(&name);

    let tmp = queue_dir.join(format!(".{name}.tmp"));
    std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
    std::fs::rename(&tmp, &dest)?;

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_files_are_complete_json_and_sorted() {
        let dir = tempfile::tempdir().unwrap();

        for i in 0..3u64 {
            let record = TranscriptRecord::new(
                i,
                format!("question {i}"),
                format!("answer {i}"),
                "claude",
                "sess-1",
            );
            write_transcript(dir.path(), &record).unwrap();
        }

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        assert_eq!(names.len(), 3);
        assert!(names[0].starts_with("transcript_000000_"));
        assert!(names[2].starts_with("transcript_000002_"));
        // No temp files left behind
        assert!(names.iter().all(|n| n.ends_with(".json")));

        let body = std::fs::read_to_string(dir.path().join(&names[1])).unwrap();
        let parsed: TranscriptRecord = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.exchange_num, 1);
        assert_eq!(parsed.record_type, "verbatim_transcript");
        assert_eq!(parsed.source, "claude");
        assert_eq!(parsed.session, "sess-1");
    }
}
