//! Graph view ETL: project the memory store into a labeled property graph.
//!
//! Nodes: `Memory`, `User`, `Namespace`, `Tag`. Edges: `CREATED`,
//! `BELONGS_TO`, `TAGGED_WITH`, and `RELATED_TO {similarity}` between
//! embedding-similar memories. Every write is an upsert keyed on the node
//! id or the full edge tuple, so reruns over an unchanged store converge to
//! identical counts. The graph is a derived, disposable view — the ETL is
//! its only writer, and it is always rebuildable from the store.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ScrivenerConfig;
use crate::db;
use crate::store::{cosine_from_l2, embedding_from_bytes, embedding_to_bytes};

/// Interval between full rebuilds in continuous mode.
const REBUILD_INTERVAL_SECS: u64 = 3600;

const GRAPH_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memory_nodes (
    id INTEGER PRIMARY KEY,
    content TEXT,
    memory_type TEXT,
    created_at TEXT,
    updated_at TEXT
);

CREATE TABLE IF NOT EXISTS user_nodes (
    id TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS namespace_nodes (
    name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS tag_nodes (
    name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS graph_edges (
    src_label TEXT NOT NULL,
    src_key TEXT NOT NULL,
    relation TEXT NOT NULL,
    dst_label TEXT NOT NULL,
    dst_key TEXT NOT NULL,
    similarity REAL,
    PRIMARY KEY (src_label, src_key, relation, dst_label, dst_key)
);

CREATE INDEX IF NOT EXISTS idx_edges_relation ON graph_edges(relation);
"#;

/// Node and edge totals after a run.
#[derive(Debug, Default, PartialEq)]
pub struct EtlStats {
    pub memories_processed: u64,
    pub memory_nodes: u64,
    pub user_nodes: u64,
    pub namespace_nodes: u64,
    pub tag_nodes: u64,
    pub edges: u64,
    pub errors: u64,
}

/// Open (or create) the graph database. Plain SQLite; no vector extension.
pub fn open_graph_db(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open graph database at {}", path.display()))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute_batch(GRAPH_SCHEMA)
        .context("failed to initialize graph schema")?;
    Ok(conn)
}

/// Open an in-memory graph database (tests and dry runs).
pub fn open_graph_memory_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(GRAPH_SCHEMA)?;
    Ok(conn)
}

fn upsert_edge(
    graph: &Connection,
    src_label: &str,
    src_key: &str,
    relation: &str,
    dst_label: &str,
    dst_key: &str,
    similarity: Option<f64>,
) -> rusqlite::Result<()> {
    graph.execute(
        "INSERT INTO graph_edges (src_label, src_key, relation, dst_label, dst_key, similarity) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(src_label, src_key, relation, dst_label, dst_key) \
         DO UPDATE SET similarity = excluded.similarity",
        params![src_label, src_key, relation, dst_label, dst_key, similarity],
    )?;
    Ok(())
}

/// Project one memory row into nodes and edges.
fn project_row(
    graph: &Connection,
    id: i64,
    user_id: &str,
    content: &str,
    metadata: Option<&str>,
    memory_type: &str,
    namespace: &str,
    created_at: &str,
    updated_at: &str,
) -> rusqlite::Result<()> {
    graph.execute(
        "INSERT INTO memory_nodes (id, content, memory_type, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(id) DO UPDATE SET \
           content = excluded.content, memory_type = excluded.memory_type, \
           created_at = excluded.created_at, updated_at = excluded.updated_at",
        params![id, content, memory_type, created_at, updated_at],
    )?;

    let memory_key = id.to_string();

    if !user_id.is_empty() {
        graph.execute(
            "INSERT INTO user_nodes (id) VALUES (?1) ON CONFLICT(id) DO NOTHING",
            params![user_id],
        )?;
        upsert_edge(graph, "User", user_id, "CREATED", "Memory", &memory_key, None)?;
    }

    graph.execute(
        "INSERT INTO namespace_nodes (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
        params![namespace],
    )?;
    upsert_edge(graph, "Memory", &memory_key, "BELONGS_TO", "Namespace", namespace, None)?;

    // Tags are projected only when metadata.tags is a list of strings; the
    // shape drifts in source data and anything else is skipped.
    if let Some(tags) = metadata
        .and_then(|s| serde_json::from_str::<Value>(s).ok())
        .and_then(|v| v.get("tags").cloned())
        .and_then(|t| t.as_array().cloned())
    {
        for tag in tags.iter().filter_map(Value::as_str) {
            graph.execute(
                "INSERT INTO tag_nodes (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
                params![tag],
            )?;
            upsert_edge(graph, "Memory", &memory_key, "TAGGED_WITH", "Tag", tag, None)?;
        }
    }

    Ok(())
}

/// Stream memories in id order and project each into the graph.
pub fn project_memories(
    store: &Connection,
    graph: &Connection,
    batch_size: usize,
) -> Result<EtlStats> {
    let mut stats = EtlStats::default();
    let mut last_id: i64 = 0;
    let mut batch_num = 0u64;

    loop {
        let rows: Vec<(i64, String, String, Option<String>, String, String, String, String)> = {
            let mut stmt = store.prepare(
                "SELECT id, user_id, content, metadata, memory_type, namespace, created_at, updated_at \
                 FROM memories WHERE id > ?1 ORDER BY id LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![last_id, batch_size as i64], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        if rows.is_empty() {
            break;
        }
        batch_num += 1;

        for (id, user_id, content, metadata, memory_type, namespace, created_at, updated_at) in
            &rows
        {
            last_id = *id;
            match project_row(
                graph,
                *id,
                user_id,
                content,
                metadata.as_deref(),
                memory_type,
                namespace,
                created_at,
                updated_at,
            ) {
                Ok(()) => stats.memories_processed += 1,
                Err(e) => {
                    warn!(id, error = %e, "failed to project memory; continuing");
                    stats.errors += 1;
                }
            }
        }
        info!(batch = batch_num, rows = rows.len(), "projected batch");
    }

    fill_counts(graph, &mut stats)?;
    Ok(stats)
}

/// Similarity pass: for each embedded row, find its k nearest neighbors in
/// the store and upsert `RELATED_TO` edges for pairs at or above the
/// similarity threshold.
pub fn build_similarity_edges(
    store: &Connection,
    graph: &Connection,
    k_neighbors: usize,
    threshold: f64,
) -> Result<u64> {
    let embedded: Vec<(i64, Vec<u8>)> = {
        let mut stmt = store.prepare("SELECT id, embedding FROM memories_vec")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    let mut edges = 0u64;
    for (id, blob) in &embedded {
        let vector = embedding_from_bytes(blob);
        let mut stmt = store.prepare(
            "SELECT id, distance FROM memories_vec \
             WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
        )?;
        let neighbors: Vec<(i64, f64)> = stmt
            .query_map(
                params![embedding_to_bytes(&vector), (k_neighbors + 1) as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (neighbor_id, distance) in neighbors {
            if neighbor_id == *id {
                continue;
            }
            let similarity = cosine_from_l2(distance);
            if similarity < threshold {
                continue;
            }
            upsert_edge(
                graph,
                "Memory",
                &id.to_string(),
                "RELATED_TO",
                "Memory",
                &neighbor_id.to_string(),
                Some(similarity),
            )?;
            edges += 1;
        }
    }

    Ok(edges)
}

fn fill_counts(graph: &Connection, stats: &mut EtlStats) -> Result<()> {
    stats.memory_nodes = count(graph, "memory_nodes")?;
    stats.user_nodes = count(graph, "user_nodes")?;
    stats.namespace_nodes = count(graph, "namespace_nodes")?;
    stats.tag_nodes = count(graph, "tag_nodes")?;
    stats.edges = count(graph, "graph_edges")?;
    Ok(())
}

fn count(conn: &Connection, table: &str) -> Result<u64> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
    Ok(n as u64)
}

/// Count edges by relation, for tests and the run summary.
pub fn edge_count(graph: &Connection, relation: &str) -> Result<u64> {
    let n: i64 = graph.query_row(
        "SELECT COUNT(*) FROM graph_edges WHERE relation = ?1",
        params![relation],
        |r| r.get(0),
    )?;
    Ok(n as u64)
}

/// One full ETL run: projection plus (optionally) the similarity pass.
pub fn run_etl(
    store: &Connection,
    graph: &Connection,
    batch_size: usize,
    k_neighbors: usize,
    threshold: f64,
    skip_similarity: bool,
) -> Result<EtlStats> {
    let mut stats = project_memories(store, graph, batch_size)?;
    if !skip_similarity {
        let related = build_similarity_edges(store, graph, k_neighbors, threshold)?;
        info!(related_edges = related, "similarity pass complete");
        fill_counts(graph, &mut stats)?;
    }

    info!(
        memories = stats.memories_processed,
        memory_nodes = stats.memory_nodes,
        users = stats.user_nodes,
        namespaces = stats.namespace_nodes,
        tags = stats.tag_nodes,
        edges = stats.edges,
        errors = stats.errors,
        "graph rebuild complete"
    );
    Ok(stats)
}

/// Run the ETL until shutdown (or one rebuild with `once`).
pub async fn run_graph(config: &ScrivenerConfig, once: bool, skip_similarity: bool) -> Result<()> {
    let store = db::open_database(config.resolved_db_path(), config.store.embedding_dim)
        .context("failed to open memory store")?;
    let graph = open_graph_db(config.resolved_graph_db_path())?;

    loop {
        if let Err(e) = run_etl(
            &store,
            &graph,
            config.graph.batch_size,
            config.graph.k_neighbors,
            config.graph.similarity_threshold,
            skip_similarity,
        ) {
            warn!(error = %e, "graph rebuild failed");
        }

        if once {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(REBUILD_INTERVAL_SECS)) => {}
            _ = crate::steno::shutdown_signal() => {
                info!("graph ETL shutting down");
                break;
            }
        }
    }

    Ok(())
}
