//! Store read path — id lookup, recency windows, semantic k-NN, and
//! namespace statistics.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::store::types::{Memory, NamespaceStat, ScoredMemory};
use crate::store::{embedding_to_bytes, l2_normalize};

/// Fetch a single memory by id.
pub fn get_by_id(conn: &Connection, id: i64) -> Result<Memory> {
    conn.query_row(
        "SELECT id, user_id, content, metadata, memory_type, namespace, created_at, updated_at \
         FROM memories WHERE id = ?1",
        params![id],
        row_to_memory,
    )
    .optional()
    .map_err(Error::from)?
    .ok_or_else(|| Error::NotFound(format!("memory {id}")))
}

/// Rows in a namespace created within the last `hours`, newest first.
pub fn recent(conn: &Connection, namespace: &str, hours: i64, limit: usize) -> Result<Vec<Memory>> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT id, user_id, content, metadata, memory_type, namespace, created_at, updated_at \
         FROM memories WHERE namespace = ?1 AND created_at >= ?2 \
         ORDER BY created_at DESC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![namespace, cutoff, limit as i64], row_to_memory)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Semantic k-NN over one or more namespaces.
///
/// Results come back in ascending cosine distance; ties break by descending
/// `created_at`. An empty `namespaces` slice searches every namespace. Rows
/// without embeddings are invisible here (but still readable elsewhere).
/// An empty store yields an empty list, not an error.
pub fn semantic(
    conn: &Connection,
    query_embedding: &[f32],
    namespaces: &[String],
    limit: usize,
    expected_dim: usize,
) -> Result<Vec<ScoredMemory>> {
    if query_embedding.len() != expected_dim {
        return Err(Error::BadInput(format!(
            "query embedding dimension {} does not match store dimension {expected_dim}",
            query_embedding.len()
        )));
    }
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut query = query_embedding.to_vec();
    l2_normalize(&mut query);

    // Over-fetch so namespace post-filtering still fills `limit`.
    let candidate_limit = (limit * 4).max(32);

    let mut stmt = conn.prepare(
        "SELECT id, distance FROM memories_vec \
         WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
    )?;
    let candidates: Vec<(i64, f64)> = stmt
        .query_map(params![embedding_to_bytes(&query), candidate_limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let memories = fetch_memories(conn, &candidates.iter().map(|(id, _)| *id).collect::<Vec<_>>())?;

    let mut scored: Vec<ScoredMemory> = candidates
        .into_iter()
        .filter_map(|(id, distance)| {
            let memory = memories.get(&id)?.clone();
            if !namespaces.is_empty() && !namespaces.contains(&memory.namespace) {
                return None;
            }
            Some(ScoredMemory { memory, distance })
        })
        .collect();

    // KNN already orders by distance; re-sort to pin the created_at tie-break.
    scored.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
    });
    scored.truncate(limit);
    Ok(scored)
}

/// Per-namespace counts with first/last timestamps, largest first.
pub fn namespaces(conn: &Connection) -> Result<Vec<NamespaceStat>> {
    let mut stmt = conn.prepare(
        "SELECT namespace, COUNT(*), MIN(created_at), MAX(created_at) \
         FROM memories GROUP BY namespace ORDER BY COUNT(*) DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(NamespaceStat {
                namespace: row.get(0)?,
                count: row.get::<_, i64>(1)? as u64,
                first_entry: row.get(2)?,
                last_entry: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Total memory count — the live counter reported on the health surface.
pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
    Ok(n as u64)
}

/// Rows with no embedding, newest-first bounded by a lookback window.
/// The Vector Fleet's candidate scan.
pub fn missing_embeddings(
    conn: &Connection,
    lookback_hours: i64,
    limit: usize,
) -> Result<Vec<(i64, String)>> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::hours(lookback_hours)).to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT m.id, m.content FROM memories m \
         WHERE NOT EXISTS (SELECT 1 FROM memories_vec v WHERE v.id = m.id) \
           AND m.created_at >= ?1 \
         ORDER BY m.created_at ASC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![cutoff, limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Batch-fetch memories by id.
fn fetch_memories(conn: &Connection, ids: &[i64]) -> Result<HashMap<i64, Memory>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT id, user_id, content, metadata, memory_type, namespace, created_at, updated_at \
         FROM memories WHERE id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params_vec: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let rows = stmt
        .query_map(params_vec.as_slice(), row_to_memory)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows.into_iter().map(|m| (m.id, m)).collect())
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let metadata_str: Option<String> = row.get(3)?;
    Ok(Memory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
        memory_type: row.get(4)?,
        namespace: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
