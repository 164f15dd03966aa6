//! The vector fleet: backfills embeddings on rows that have none.
//!
//! Rows are fanned out across the configured embedding models round-robin so
//! load spreads over several lightweight models. Embedding calls run
//! concurrently up to the worker cap; writes are applied by the coordinating
//! task as calls complete, so the store keeps a single writer while the slow
//! part (model inference) parallelizes. Rows are disjoint by id, so no
//! cross-worker coordination exists.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::ScrivenerConfig;
use crate::db;
use crate::error::Error;
use crate::llm::{LmClient, OllamaClient};
use crate::store::search::missing_embeddings;
use crate::store::write::{attach_embedding, merge_metadata};

/// Retry attempts for transient embedding failures, inside one worker.
const EMBED_ATTEMPTS: u32 = 3;

/// Outcome counts for one backfill pass.
#[derive(Debug, Default, PartialEq)]
pub struct BackfillStats {
    pub embedded: u64,
    /// Rows flagged `needs_conversion`: the assigned model produced a vector
    /// of the wrong dimension. The row keeps a null embedding.
    pub wrong_dimension: u64,
    /// Rows flagged `embed_error`: the model failed permanently.
    pub failed: u64,
}

/// Embed with bounded backoff on transient failures. Permanent failures
/// surface immediately.
async fn embed_with_retry(
    lm: &dyn LmClient,
    model: &str,
    text: &str,
    backoff_base: Duration,
) -> crate::error::Result<Vec<f32>> {
    let mut attempt = 0u32;
    loop {
        match lm.embed(model, text).await {
            Ok(vec) => return Ok(vec),
            Err(e) if e.is_transient() && attempt + 1 < EMBED_ATTEMPTS => {
                attempt += 1;
                let delay = backoff_base * 2u32.pow(attempt - 1);
                warn!(model, attempt, error = %e, "embedding call failed; retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One backfill pass: scan, fan out, write.
pub async fn run_backfill_pass(
    conn: &mut Connection,
    lm: Arc<dyn LmClient>,
    models: &[String],
    expected_dim: usize,
    lookback_hours: i64,
    batch_size: usize,
    workers: usize,
    backoff_base: Duration,
    progress: Option<&ProgressBar>,
) -> Result<BackfillStats> {
    anyhow::ensure!(!models.is_empty(), "fleet.models must not be empty");

    let candidates = missing_embeddings(conn, lookback_hours, batch_size)?;
    if candidates.is_empty() {
        return Ok(BackfillStats::default());
    }
    info!(rows = candidates.len(), "backfilling embeddings");

    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut join_set: JoinSet<(i64, String, crate::error::Result<Vec<f32>>)> = JoinSet::new();

    for (i, (id, content)) in candidates.into_iter().enumerate() {
        let model = models[i % models.len()].clone();
        let lm = Arc::clone(&lm);
        let semaphore = Arc::clone(&semaphore);
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let result = embed_with_retry(lm.as_ref(), &model, &content, backoff_base).await;
            (id, model, result)
        });
    }

    let mut stats = BackfillStats::default();
    while let Some(joined) = join_set.join_next().await {
        let (id, model, result) = joined.context("embedding worker panicked")?;
        match result {
            Ok(vec) if vec.len() != expected_dim => {
                // Refuse the write: mixing dimensions in one index is forbidden.
                warn!(
                    id,
                    model,
                    got = vec.len(),
                    expected = expected_dim,
                    "model dimension disagrees with store; flagging row"
                );
                merge_metadata(
                    conn,
                    id,
                    &serde_json::json!({
                        "needs_conversion": { "model": model, "dimension": vec.len() }
                    }),
                )?;
                stats.wrong_dimension += 1;
            }
            Ok(vec) => match attach_embedding(conn, id, &vec, expected_dim) {
                Ok(()) => stats.embedded += 1,
                Err(Error::Conflict(_)) => {
                    // Someone else embedded this row since the scan. Fine.
                    info!(id, "row already embedded; skipping");
                }
                Err(e) => return Err(e.into()),
            },
            Err(e) => {
                warn!(id, model, error = %e, "embedding failed; flagging row");
                merge_metadata(conn, id, &serde_json::json!({ "embed_error": e.kind() }))?;
                stats.failed += 1;
            }
        }
        if let Some(pb) = progress {
            pb.inc(1);
        }
    }

    Ok(stats)
}

/// Run the fleet until shutdown (or one pass with `once`).
pub async fn run_fleet(config: &ScrivenerConfig, once: bool) -> Result<()> {
    let mut conn = db::open_database(config.resolved_db_path(), config.store.embedding_dim)
        .context("failed to open memory store")?;
    let lm: Arc<dyn LmClient> =
        Arc::new(OllamaClient::new(&config.llm).context("failed to build LM client")?);

    let interval = Duration::from_secs(config.fleet.poll_interval_seconds);

    info!(
        models = config.fleet.models.len(),
        workers = config.fleet.workers,
        "vector fleet started"
    );

    loop {
        let progress = if once {
            let pending =
                missing_embeddings(&conn, config.fleet.lookback_hours, config.fleet.batch_size)?
                    .len();
            let pb = ProgressBar::new(pending as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")
                    .expect("valid template")
                    .progress_chars("##-"),
            );
            Some(pb)
        } else {
            None
        };

        match run_backfill_pass(
            &mut conn,
            Arc::clone(&lm),
            &config.fleet.models,
            config.store.embedding_dim,
            config.fleet.lookback_hours,
            config.fleet.batch_size,
            config.fleet.workers,
            Duration::from_secs(2),
            progress.as_ref(),
        )
        .await
        {
            Ok(stats) if stats == BackfillStats::default() => {}
            Ok(stats) => info!(
                embedded = stats.embedded,
                wrong_dimension = stats.wrong_dimension,
                failed = stats.failed,
                "backfill pass complete"
            ),
            Err(e) => warn!(error = %e, "backfill pass failed"),
        }

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        if once {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = crate::steno::shutdown_signal() => {
                info!("vector fleet shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLm;
    use crate::store::search::{get_by_id, semantic};
    use crate::store::types::NewMemory;
    use crate::store::write::insert_memory;
    use async_trait::async_trait;

    const DIM: usize = 8;

    fn test_db() -> Connection {
        db::open_memory_database(DIM).unwrap()
    }

    fn insert(conn: &Connection, content: &str) -> i64 {
        insert_memory(
            conn,
            &NewMemory {
                user_id: "tester".into(),
                content: content.into(),
                metadata: None,
                memory_type: "session_summary".into(),
                namespace: Some("scripty".into()),
                dedup_key: None,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn backfill_embeds_every_pending_row() {
        let mut conn = test_db();
        for i in 0..10 {
            insert(&conn, &format!("memory number {i}"));
        }

        let lm: Arc<dyn LmClient> = Arc::new(ScriptedLm::new(vec![], DIM));
        let stats = run_backfill_pass(
            &mut conn,
            lm,
            &["nomic-embed-text:v1.5".into(), "mxbai-embed-large:latest".into()],
            DIM,
            1,
            100,
            4,
            Duration::ZERO,
            None,
        )
        .await
        .unwrap();

        assert_eq!(stats.embedded, 10);
        assert_eq!(stats.wrong_dimension, 0);
        assert_eq!(stats.failed, 0);

        // Every row now has a vector; semantic search returns results.
        let pending = missing_embeddings(&conn, 1, 100).unwrap();
        assert!(pending.is_empty());
        let hits = semantic(&conn, &{
            let mut v = vec![0.0f32; DIM];
            v[0] = 1.0;
            v
        }, &[], 5, DIM)
        .unwrap();
        assert_eq!(hits.len(), 5);
        // Ascending distance order.
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let mut conn = test_db();
        insert(&conn, "only row");
        let lm: Arc<dyn LmClient> = Arc::new(ScriptedLm::new(vec![], DIM));

        let first = run_backfill_pass(
            &mut conn, Arc::clone(&lm), &["m".into()], DIM, 1, 100, 4, Duration::ZERO, None,
        )
        .await
        .unwrap();
        assert_eq!(first.embedded, 1);

        let second = run_backfill_pass(
            &mut conn, lm, &["m".into()], DIM, 1, 100, 4, Duration::ZERO, None,
        )
        .await
        .unwrap();
        assert_eq!(second, BackfillStats::default());
    }

    #[tokio::test]
    async fn wrong_dimension_model_is_refused_and_flagged() {
        let mut conn = test_db();
        let id = insert(&conn, "dimension mismatch victim");

        // The model produces 4-dim vectors; the store wants 8.
        let lm: Arc<dyn LmClient> = Arc::new(ScriptedLm::new(vec![], 4));
        let stats = run_backfill_pass(
            &mut conn,
            lm,
            &["tiny-model".into()],
            DIM,
            1,
            100,
            4,
            Duration::ZERO,
            None,
        )
        .await
        .unwrap();

        assert_eq!(stats.wrong_dimension, 1);
        assert_eq!(stats.embedded, 0);

        let row = get_by_id(&conn, id).unwrap();
        let meta = row.metadata.unwrap();
        assert_eq!(meta["needs_conversion"]["model"], "tiny-model");
        assert_eq!(meta["needs_conversion"]["dimension"], 4);
        // Embedding stays null.
        assert_eq!(missing_embeddings(&conn, 1, 100).unwrap().len(), 1);
    }

    struct AlwaysFails;

    #[async_trait]
    impl LmClient for AlwaysFails {
        async fn complete(
            &self,
            _model: &str,
            _prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> crate::error::Result<String> {
            Err(Error::Permanent("model gone".into()))
        }
        async fn embed(&self, _model: &str, _text: &str) -> crate::error::Result<Vec<f32>> {
            Err(Error::Permanent("model gone".into()))
        }
    }

    #[tokio::test]
    async fn permanent_model_failure_flags_the_row() {
        let mut conn = test_db();
        let id = insert(&conn, "doomed row");

        let lm: Arc<dyn LmClient> = Arc::new(AlwaysFails);
        let stats = run_backfill_pass(
            &mut conn,
            lm,
            &["dead-model".into()],
            DIM,
            1,
            100,
            4,
            Duration::ZERO,
            None,
        )
        .await
        .unwrap();

        assert_eq!(stats.failed, 1);
        let meta = get_by_id(&conn, id).unwrap().metadata.unwrap();
        assert_eq!(meta["embed_error"], "permanent");
        // Left null so a later policy pass can try another model.
        assert_eq!(missing_embeddings(&conn, 1, 100).unwrap().len(), 1);
    }
}
