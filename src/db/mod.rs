pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the memory store at the given path, with extensions
/// loaded, schema initialized for `embedding_dim`, and migrations applied.
///
/// Refuses to open a store whose recorded dimension disagrees with
/// `embedding_dim` — mixing dimensions in one vector index is never valid.
pub fn open_database(path: impl AsRef<Path>, embedding_dim: usize) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // WAL mode: many concurrent readers while the writers serialize
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    schema::init_schema(&conn, embedding_dim).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    migrations::check_embedding_dim(&conn, embedding_dim)?;

    tracing::info!(path = %path.display(), dim = embedding_dim, "database initialized");
    Ok(conn)
}

/// Open an in-memory store for testing.
pub fn open_memory_database(embedding_dim: usize) -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn, embedding_dim).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(conn)
}
