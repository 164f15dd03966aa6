//! SQL DDL for the memory store.
//!
//! Defines the `memories` table, the `memories_vec` (vec0) virtual table,
//! and `schema_meta`. All DDL uses `IF NOT EXISTS` for idempotent
//! initialization. The vec0 table is created with the configured embedding
//! dimension, which pins the store-wide vector dimension structurally.

use rusqlite::Connection;

/// Schema DDL for the core tables.
///
/// `id` is AUTOINCREMENT so ids are monotonic and never reused, even after
/// administrative deletes. `dedup_key` carries the content-derived
/// idempotency key for ingestion-path rows; the UNIQUE constraint is what
/// rejects replays after a crash between insert and queue-file rename.
const SCHEMA_SQL: &str = r#"
-- Core memory storage
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    content TEXT NOT NULL CHECK(length(content) >= 1),
    metadata TEXT,
    memory_type TEXT NOT NULL DEFAULT 'memory',
    namespace TEXT NOT NULL DEFAULT 'ingested',
    dedup_key TEXT UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
CREATE INDEX IF NOT EXISTS idx_memories_namespace ON memories(namespace);
CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection, embedding_dim: usize) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // vec0 virtual table must be created separately (sqlite-vec syntax).
    // Rows without an embedding simply have no entry here.
    let vec_sql = format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memories_vec USING vec0(\n\
         \x20   id INTEGER PRIMARY KEY,\n\
         \x20   embedding FLOAT[{embedding_dim}]\n\
         );"
    );
    conn.execute_batch(&vec_sql)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('embedding_dim', ?1)",
        [embedding_dim.to_string()],
    )?;

    Ok(())
}
