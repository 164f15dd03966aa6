//! Store write path — validated inserts, embedding attachment, and metadata
//! enrichment.
//!
//! [`insert_memory`] is the single entry point for new rows. Producers never
//! choose ids; the store assigns them. Embeddings arrive later through
//! [`attach_embedding`] and post-processors patch metadata through
//! [`merge_metadata`] — both are single-row operations so concurrent readers
//! are never blocked table-wide.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::store::types::NewMemory;
use crate::store::{embedding_to_bytes, l2_normalize};

/// Compute the content-derived idempotency key for an ingestion-path row.
///
/// A crash between the store insert and the queue-file rename makes the same
/// record arrive twice; this key is what rejects the second copy.
pub fn dedup_key(session: &str, timestamp: &str, user_text: &str) -> String {
    let user_hash = blake3::hash(user_text.as_bytes()).to_hex();
    let composite = format!("{session}|{timestamp}|{user_hash}");
    blake3::hash(composite.as_bytes()).to_hex().to_string()
}

/// Insert a new memory. Returns the store-assigned id.
///
/// Validates non-empty content, coerces a missing namespace to `"ingested"`,
/// and stamps both timestamps with the same instant. A `dedup_key` collision
/// surfaces as [`Error::Conflict`].
pub fn insert_memory(conn: &Connection, memory: &NewMemory) -> Result<i64> {
    if memory.content.is_empty() {
        return Err(Error::BadInput("content must be non-empty".into()));
    }

    let namespace = match memory.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => ns,
        _ => "ingested",
    };

    let now = chrono::Utc::now().to_rfc3339();
    let metadata_json = memory
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO memories (user_id, content, metadata, memory_type, namespace, dedup_key, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            memory.user_id,
            memory.content,
            metadata_json,
            memory.memory_type,
            namespace,
            memory.dedup_key,
            now,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

/// Attach an embedding to a row that has none. The Vector Fleet write path.
///
/// The vector is L2-normalized before storage so L2 distances in the index
/// order identically to cosine distances. A vector whose dimension disagrees
/// with the store's configured dimension is refused, and a second attachment
/// to the same row is a conflict (backfill is null → non-null, once).
pub fn attach_embedding(
    conn: &mut Connection,
    id: i64,
    embedding: &[f32],
    expected_dim: usize,
) -> Result<()> {
    if embedding.len() != expected_dim {
        return Err(Error::BadInput(format!(
            "embedding dimension {} does not match store dimension {expected_dim}",
            embedding.len()
        )));
    }

    let mut vec = embedding.to_vec();
    l2_normalize(&mut vec);

    let tx = conn.transaction().map_err(Error::from)?;

    let exists: Option<i64> = tx
        .query_row(
            "SELECT id FROM memories WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::from)?;
    if exists.is_none() {
        return Err(Error::NotFound(format!("memory {id}")));
    }

    tx.execute(
        "INSERT INTO memories_vec (id, embedding) VALUES (?1, ?2)",
        params![id, embedding_to_bytes(&vec)],
    )
    .map_err(Error::from)?;

    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "UPDATE memories SET updated_at = ?1 WHERE id = ?2",
        params![now, id],
    )
    .map_err(Error::from)?;

    tx.commit().map_err(Error::from)?;
    Ok(())
}

/// Shallow-merge a JSON object into a row's metadata.
///
/// Keys in `patch` win; all other existing keys (including the reserved
/// ones) are preserved. Runs in a single transaction over one row.
pub fn merge_metadata(conn: &mut Connection, id: i64, patch: &serde_json::Value) -> Result<()> {
    let patch_obj = patch
        .as_object()
        .ok_or_else(|| Error::BadInput("metadata patch must be a JSON object".into()))?;

    let tx = conn.transaction().map_err(Error::from)?;

    let existing: Option<Option<String>> = tx
        .query_row(
            "SELECT metadata FROM memories WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::from)?;

    let Some(existing) = existing else {
        return Err(Error::NotFound(format!("memory {id}")));
    };

    let mut merged = existing
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    for (k, v) in patch_obj {
        merged.insert(k.clone(), v.clone());
    }

    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "UPDATE memories SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
        params![
            serde_json::to_string(&serde_json::Value::Object(merged))?,
            now,
            id
        ],
    )
    .map_err(Error::from)?;

    tx.commit().map_err(Error::from)?;
    Ok(())
}
