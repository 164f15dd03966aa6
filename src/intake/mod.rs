//! The intake pipeline: capture → enrich → persist, decoupled by
//! filesystem queues that survive restarts.

pub mod enrich;
pub mod persist;
pub mod queue;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::ScrivenerConfig;
use crate::db;
use crate::error::Error;
use crate::llm::{LmClient, OllamaClient};
use crate::steno::emit::TranscriptRecord;

/// Enrich every raw capture currently in `client-dumps/`.
///
/// Each record is enriched, written into `pgai-queue/` (atomic), and its raw
/// file moved to `intake-processed/`. Unreadable captures are quarantined.
pub async fn run_enrich_pass(
    lm: &dyn LmClient,
    model: &str,
    namespace: &str,
    dumps_dir: &Path,
    queue_dir: &Path,
    processed_dir: &Path,
    failed_dir: &Path,
) -> Result<u64> {
    let mut enriched_count = 0u64;

    for file in queue::list_queue(dumps_dir)? {
        let record: TranscriptRecord = match std::fs::read_to_string(&file)
            .map_err(Error::from)
            .and_then(|body| serde_json::from_str(&body).map_err(Error::from))
        {
            Ok(record) => record,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "unreadable capture; quarantining");
                queue::quarantine(&file, failed_dir, &e.to_string())?;
                continue;
            }
        };

        let enriched = enrich::enrich_exchange(lm, model, &record, namespace).await;

        let name = file
            .file_name()
            .map(|n| format!("pgai_{}", n.to_string_lossy()))
            .unwrap_or_else(|| "pgai_record.json".into());
        queue::write_json(queue_dir, &name, &serde_json::to_value(&enriched)?)?;
        queue::move_to(&file, processed_dir)?;

        info!(
            session = %enriched.session,
            keywords = enriched.keywords.len(),
            sentiment = enriched.sentiment.score,
            "exchange enriched"
        );
        enriched_count += 1;
    }

    Ok(enriched_count)
}

/// Run the enrich stage until shutdown (or one pass with `once`).
pub async fn run_intake(config: &ScrivenerConfig, once: bool) -> Result<()> {
    let mut llm_config = config.llm.clone();
    llm_config.timeout_seconds = config.intake.enrich_timeout_seconds;
    let lm = OllamaClient::new(&llm_config).context("failed to build LM client")?;

    let dumps = config.client_dumps_dir();
    let queue_dir = config.pgai_queue_dir();
    let processed = config.intake_processed_dir();
    let failed = config.failed_dir();
    let interval = Duration::from_secs(config.intake.poll_interval_seconds);

    info!(watching = %dumps.display(), "intake enrich stage started");

    loop {
        match run_enrich_pass(
            &lm,
            &config.llm.enrich_model,
            &config.intake.default_namespace,
            &dumps,
            &queue_dir,
            &processed,
            &failed,
        )
        .await
        {
            Ok(0) => {}
            Ok(n) => info!(enriched = n, "enrich pass complete"),
            Err(e) => warn!(error = %e, "enrich pass failed"),
        }

        if once {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = crate::steno::shutdown_signal() => {
                info!("intake enrich stage shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Run the persist stage until shutdown (or one pass with `once`).
pub async fn run_persist(config: &ScrivenerConfig, once: bool) -> Result<()> {
    let conn: Connection = db::open_database(config.resolved_db_path(), config.store.embedding_dim)
        .context("failed to open memory store")?;

    let queue_dir = config.pgai_queue_dir();
    let processed = config.pgai_processed_dir();
    let failed = config.failed_dir();
    let interval = Duration::from_secs(config.intake.poll_interval_seconds);

    info!(watching = %queue_dir.display(), "intake persist stage started");

    loop {
        match persist::run_persist_pass(
            &conn,
            &queue_dir,
            &processed,
            &failed,
            Duration::from_secs(2),
        )
        .await
        {
            Ok(stats) if stats == persist::PersistStats::default() => {}
            Ok(stats) => info!(
                inserted = stats.inserted,
                duplicates = stats.duplicates,
                quarantined = stats.quarantined,
                deferred = stats.deferred,
                "persist pass complete"
            ),
            Err(e) => warn!(error = %e, "persist pass failed"),
        }

        if once {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = crate::steno::shutdown_signal() => {
                info!("intake persist stage shutting down");
                break;
            }
        }
    }

    Ok(())
}
