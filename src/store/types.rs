//! Memory store row types.

use serde::{Deserialize, Serialize};

/// A memory row, matching the `memories` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Store-assigned monotonic id. Never reused.
    pub id: i64,
    /// Principal that produced the memory (session actor or service name).
    pub user_id: String,
    /// The memory text. Summaries for live-session captures, raw text for
    /// document ingest.
    pub content: String,
    /// Open attribute bag. Reserved keys: `source_file`, `session`, `source`,
    /// `timestamp`, `keywords`, `sentiment`, `chunk`, `total_chunks`, `page`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Free-form category tag (`session_summary`, `document`, ...).
    pub memory_type: String,
    /// Tenant partition. Always present; defaults to `"ingested"`.
    pub namespace: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 last-modification timestamp. Never earlier than `created_at`.
    pub updated_at: String,
}

/// Input for a new memory. The store assigns `id` and both timestamps.
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub user_id: String,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub memory_type: String,
    /// `None` or empty coerces to `"ingested"`.
    pub namespace: Option<String>,
    /// Content-derived idempotency key. Rows replayed with the same key are
    /// rejected as conflicts.
    pub dedup_key: Option<String>,
}

/// A semantic search hit: the row plus its cosine distance from the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub memory: Memory,
    pub distance: f64,
}

/// Per-namespace counts for the stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceStat {
    pub namespace: String,
    pub count: u64,
    pub first_entry: String,
    pub last_entry: String,
}
