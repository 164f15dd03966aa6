//! The query surface: a small JSON-over-HTTP façade for semantic search,
//! recency fetches, namespace statistics, and health.
//!
//! Query embeddings are computed with the store's configured model — the
//! same model the fleet uses for ingest — so distances are meaningful.
//! Callers always receive a typed error body `{error: {kind, message}}`;
//! anything unexpected is a generic 500 with no internals leaked.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::config::ScrivenerConfig;
use crate::db;
use crate::error::Error;
use crate::llm::{LmClient, OllamaClient};
use crate::store::search;
use crate::store::types::ScoredMemory;

pub struct AppState {
    pub db: Mutex<rusqlite::Connection>,
    pub lm: Arc<dyn LmClient>,
    pub embedding_model: String,
    pub embedding_dim: usize,
}

/// Error wrapper that renders the typed JSON error shape.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::BadInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Error::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Error::Transient(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "upstream temporarily unavailable".to_string(),
            ),
            // Internals stay internal.
            Error::Permanent(msg) | Error::Config(msg) => {
                warn!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        let body = json!({"error": {"kind": self.0.kind(), "message": message}});
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct RecentRequest {
    pub namespace: String,
    #[serde(default = "default_hours")]
    pub hours: i64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

fn default_hours() -> i64 {
    24
}

/// Hard cap so a single request cannot drag the whole store through JSON.
const MAX_LIMIT: usize = 100;

fn memory_json(hit: &ScoredMemory) -> serde_json::Value {
    json!({
        "id": hit.memory.id,
        "user_id": hit.memory.user_id,
        "content": hit.memory.content,
        "namespace": hit.memory.namespace,
        "memory_type": hit.memory.memory_type,
        "created_at": hit.memory.created_at,
        "metadata": hit.memory.metadata,
        "distance": hit.distance,
    })
}

/// POST /query — semantic k-NN over one or more namespaces.
pub async fn query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(Error::BadInput("query must be non-empty".into()).into());
    }
    let limit = request.limit.clamp(1, MAX_LIMIT);

    let embedding = state
        .lm
        .embed(&state.embedding_model, &request.query)
        .await?;

    let hits = {
        let conn = state.db.lock().expect("db mutex poisoned");
        search::semantic(
            &conn,
            &embedding,
            &request.namespaces,
            limit,
            state.embedding_dim,
        )?
    };

    Ok(Json(json!({
        "query": request.query,
        "results_count": hits.len(),
        "memories": hits.iter().map(memory_json).collect::<Vec<_>>(),
    })))
}

/// POST /recent — newest rows in a namespace within a time window.
pub async fn recent(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.namespace.is_empty() {
        return Err(Error::BadInput("namespace must be non-empty".into()).into());
    }
    if request.hours <= 0 {
        return Err(Error::BadInput("hours must be positive".into()).into());
    }
    let limit = request.limit.clamp(1, MAX_LIMIT);

    let memories = {
        let conn = state.db.lock().expect("db mutex poisoned");
        search::recent(&conn, &request.namespace, request.hours, limit)?
    };

    Ok(Json(json!({
        "namespace": request.namespace,
        "hours": request.hours,
        "memories": memories,
    })))
}

/// GET /namespaces — tenant enumeration with counts.
pub async fn namespaces(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (stats, total) = {
        let conn = state.db.lock().expect("db mutex poisoned");
        (search::namespaces(&conn)?, search::count(&conn)?)
    };

    Ok(Json(json!({
        "namespaces": stats,
        "total_namespaces": stats.len(),
        "total_memories": total,
    })))
}

/// GET /health — healthy vs degraded, per subsystem.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let database = {
        let conn = state.db.lock().expect("db mutex poisoned");
        match search::count(&conn) {
            Ok(n) => json!({"status": "healthy", "total_memories": n}),
            Err(e) => {
                warn!(error = %e, "database health check failed");
                json!({"status": "unhealthy"})
            }
        }
    };

    let inference = match state.lm.ping().await {
        Ok(()) => "healthy",
        Err(_) => "unreachable",
    };

    let healthy = database["status"] == "healthy" && inference == "healthy";
    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "database": database,
        "services": {"inference": inference},
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/recent", post(recent))
        .route("/namespaces", get(namespaces))
        .route("/health", get(health))
        .with_state(state)
}

/// Start the query surface.
pub async fn serve(config: ScrivenerConfig) -> anyhow::Result<()> {
    let conn = db::open_database(config.resolved_db_path(), config.store.embedding_dim)?;
    let lm: Arc<dyn LmClient> = Arc::new(OllamaClient::new(&config.llm)?);

    let state = Arc::new(AppState {
        db: Mutex::new(conn),
        lm,
        embedding_model: config.store.embedding_model.clone(),
        embedding_dim: config.store.embedding_dim,
    });

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "query surface listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            crate::steno::shutdown_signal().await;
            info!("shutting down query surface");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLm;
    use crate::store::types::NewMemory;
    use crate::store::write::{attach_embedding, insert_memory};

    const DIM: usize = 8;

    fn test_state() -> Arc<AppState> {
        let conn = db::open_memory_database(DIM).unwrap();
        Arc::new(AppState {
            db: Mutex::new(conn),
            lm: Arc::new(ScriptedLm::new(vec![], DIM)),
            embedding_model: "nomic-embed-text:v1.5".into(),
            embedding_dim: DIM,
        })
    }

    fn seed(state: &AppState, content: &str, namespace: &str, spike: usize) -> i64 {
        let mut conn = state.db.lock().unwrap();
        let id = insert_memory(
            &conn,
            &NewMemory {
                user_id: "tester".into(),
                content: content.into(),
                metadata: None,
                memory_type: "session_summary".into(),
                namespace: Some(namespace.into()),
                dedup_key: None,
            },
        )
        .unwrap();
        let mut v = vec![0.0f32; DIM];
        v[spike % DIM] = 1.0;
        attach_embedding(&mut conn, id, &v, DIM).unwrap();
        id
    }

    #[tokio::test]
    async fn query_returns_store_order_with_counts() {
        let state = test_state();
        // ScriptedLm embeds by text length: "hello" (5 chars) spikes dim 5.
        let near = seed(&state, "close to the query", "scripty", 5);
        let _far = seed(&state, "far away", "scripty", 2);

        let response = query(
            State(Arc::clone(&state)),
            Json(QueryRequest {
                query: "hello".into(),
                namespaces: vec![],
                limit: 10,
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.0["results_count"], 2);
        assert_eq!(response.0["memories"][0]["id"], near);
        let d0 = response.0["memories"][0]["distance"].as_f64().unwrap();
        let d1 = response.0["memories"][1]["distance"].as_f64().unwrap();
        assert!(d0 <= d1);
    }

    #[tokio::test]
    async fn query_rejects_empty_text() {
        let state = test_state();
        let err = query(
            State(state),
            Json(QueryRequest {
                query: "   ".into(),
                namespaces: vec![],
                limit: 10,
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.0.kind(), "bad_input");
    }

    #[tokio::test]
    async fn query_filters_by_namespace() {
        let state = test_state();
        seed(&state, "tenant one", "scripty", 5);
        let wanted = seed(&state, "tenant two", "wolf_hunt", 5);

        let response = query(
            State(state),
            Json(QueryRequest {
                query: "hello".into(),
                namespaces: vec!["wolf_hunt".into()],
                limit: 10,
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.0["results_count"], 1);
        assert_eq!(response.0["memories"][0]["id"], wanted);
    }

    #[tokio::test]
    async fn query_on_empty_store_returns_empty_list() {
        let state = test_state();
        let response = query(
            State(state),
            Json(QueryRequest {
                query: "anything".into(),
                namespaces: vec![],
                limit: 5,
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.0["results_count"], 0);
        assert_eq!(response.0["memories"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn recent_returns_window_shape() {
        let state = test_state();
        seed(&state, "fresh memory", "scripty", 1);

        let response = recent(
            State(state),
            Json(RecentRequest {
                namespace: "scripty".into(),
                hours: 1,
                limit: 10,
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.0["namespace"], "scripty");
        assert_eq!(response.0["hours"], 1);
        assert_eq!(response.0["memories"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recent_validates_inputs() {
        let state = test_state();
        let err = recent(
            State(Arc::clone(&state)),
            Json(RecentRequest {
                namespace: String::new(),
                hours: 1,
                limit: 10,
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.0.kind(), "bad_input");

        let err = recent(
            State(state),
            Json(RecentRequest {
                namespace: "scripty".into(),
                hours: 0,
                limit: 10,
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.0.kind(), "bad_input");
    }

    #[tokio::test]
    async fn namespaces_enumerates_with_totals() {
        let state = test_state();
        seed(&state, "one", "scripty", 1);
        seed(&state, "two", "scripty", 2);
        seed(&state, "three", "ingested", 3);

        let response = namespaces(State(state)).await.unwrap();
        assert_eq!(response.0["total_namespaces"], 2);
        assert_eq!(response.0["total_memories"], 3);
        assert_eq!(response.0["namespaces"][0]["namespace"], "scripty");
        assert_eq!(response.0["namespaces"][0]["count"], 2);
    }

    #[tokio::test]
    async fn health_reports_database_and_services() {
        let state = test_state();
        let response = health(State(state)).await;
        // ScriptedLm's default ping succeeds.
        assert_eq!(response.0["status"], "healthy");
        assert_eq!(response.0["database"]["status"], "healthy");
        assert_eq!(response.0["services"]["inference"], "healthy");
        assert!(response.0["timestamp"].as_str().is_some());
    }
}
