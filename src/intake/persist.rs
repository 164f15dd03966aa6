//! Persist stage: enriched records into the memory store.
//!
//! The store insert happens first and the queue-file rename is the commit.
//! A crash between the two replays the record on restart; the dedup key
//! rejects the duplicate at the store boundary, the record moves on to
//! processed, and the stored set is unchanged — replaying any queue
//! directory converges.

use rusqlite::Connection;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::intake::enrich::EnrichedRecord;
use crate::intake::queue;
use crate::store::types::NewMemory;
use crate::store::write::insert_memory;

/// Retry schedule for transient store failures: 2s, 4s, 8s.
const MAX_ATTEMPTS: u32 = 3;

/// Outcome counts for one persist pass.
#[derive(Debug, Default, PartialEq)]
pub struct PersistStats {
    pub inserted: u64,
    pub duplicates: u64,
    pub quarantined: u64,
    pub deferred: u64,
}

/// Build the memory row for an enriched record.
fn to_memory(record: &EnrichedRecord) -> NewMemory {
    NewMemory {
        user_id: record.username.clone(),
        content: record.text.clone(),
        metadata: Some(json!({
            "content": record.content,
            "keywords": record.keywords,
            "sentiment": {
                "score": record.sentiment.score,
                "analysis": record.sentiment.analysis,
            },
            "session": record.session,
            "timestamp": record.timestamp,
            "source": record.source,
        })),
        memory_type: "session_summary".to_string(),
        namespace: Some(record.namespace.clone()),
        dedup_key: Some(record.dedup_key.clone()),
    }
}

/// Insert with bounded exponential backoff on transient failures.
///
/// `backoff_base` is 2 seconds in production; tests pass zero.
pub async fn insert_with_retry(
    conn: &Connection,
    record: &EnrichedRecord,
    backoff_base: Duration,
) -> Result<i64> {
    let memory = to_memory(record);
    let mut attempt = 0u32;
    loop {
        match insert_memory(conn, &memory) {
            Ok(id) => return Ok(id),
            Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                let delay = backoff_base * 2u32.pow(attempt - 1);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "store insert failed; retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Process every file currently in the enriched queue.
pub async fn run_persist_pass(
    conn: &Connection,
    queue_dir: &Path,
    processed_dir: &Path,
    failed_dir: &Path,
    backoff_base: Duration,
) -> Result<PersistStats> {
    let mut stats = PersistStats::default();

    for file in queue::list_queue(queue_dir)? {
        let record: EnrichedRecord = match std::fs::read_to_string(&file)
            .map_err(Error::from)
            .and_then(|body| serde_json::from_str(&body).map_err(Error::from))
        {
            Ok(record) => record,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "unreadable enriched record; quarantining");
                queue::quarantine(&file, failed_dir, &e.to_string())?;
                stats.quarantined += 1;
                continue;
            }
        };

        match insert_with_retry(conn, &record, backoff_base).await {
            Ok(id) => {
                queue::move_to(&file, processed_dir)?;
                info!(id, session = %record.session, "memory persisted");
                stats.inserted += 1;
            }
            Err(Error::Conflict(_)) => {
                // Replay of an already-stored record. Drop it and commit the
                // file so it is not replayed forever.
                info!(session = %record.session, "duplicate record dropped by idempotency key");
                queue::move_to(&file, processed_dir)?;
                stats.duplicates += 1;
            }
            Err(e) if e.is_transient() => {
                // Leave the file in place; the next pass retries it.
                warn!(file = %file.display(), error = %e, "store unavailable; leaving record queued");
                stats.deferred += 1;
            }
            Err(e) => {
                warn!(file = %file.display(), error = %e, "permanent persist failure; quarantining");
                queue::quarantine(&file, failed_dir, &e.to_string())?;
                stats.quarantined += 1;
            }
        }
    }

    Ok(stats)
}
