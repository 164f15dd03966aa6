//! Session transcription and long-term memory for AI CLI sessions.
//!
//! Scrivener watches the session logs that AI CLIs (Claude Code, Gemini CLI)
//! append to, captures every user→assistant exchange verbatim, enriches each
//! one with small local language models, and stores the result as an
//! embedded memory that downstream services query semantically.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for vector k-NN; one namespace-partitioned `memories` table
//! - **Capture**: one stenographer process per active session, managed by a
//!   supervisor; exchanges flow through filesystem queue directories whose
//!   commit protocol is the atomic rename
//! - **Enrichment**: keyword extraction, sentiment scoring, and
//!   summarization via a local Ollama-compatible endpoint, each with a
//!   deterministic fallback
//! - **Embeddings**: backfilled asynchronously by a worker fleet that
//!   round-robins across embedding models
//! - **Views**: a rebuildable labeled-property-graph projection and a small
//!   HTTP query surface
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite initialization, schema, and migrations
//! - [`store`] — The memory store: insert, search, enrich, namespace stats
//! - [`steno`] — Session tailing and verbatim transcript emission
//! - [`intake`] — The enrich and persist pipeline stages
//! - [`fleet`] — Embedding backfill workers
//! - [`graph`] — The graph-view ETL
//! - [`server`] — The HTTP query surface
//! - [`supervisor`] — Stenographer lifecycle management

pub mod config;
pub mod db;
pub mod error;
pub mod fleet;
pub mod graph;
pub mod intake;
pub mod llm;
pub mod server;
pub mod steno;
pub mod store;
pub mod supervisor;
