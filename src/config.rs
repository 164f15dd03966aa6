use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScrivenerConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub llm: LlmConfig,
    pub steno: StenoConfig,
    pub intake: IntakeConfig,
    pub fleet: FleetConfig,
    pub supervisor: SupervisorConfig,
    pub graph: GraphConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: String,
    /// Single model used for both ingest embeddings and query embeddings.
    /// Mixing models mixes vector spaces, so there is exactly one.
    pub embedding_model: String,
    /// Declared vector dimension. Writes with any other dimension are refused.
    pub embedding_dim: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the local inference endpoint (Ollama-compatible).
    pub base_url: String,
    /// Model used for keyword extraction, sentiment, and summarization.
    pub enrich_model: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StenoConfig {
    /// Seconds between re-reads of the session file.
    pub check_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IntakeConfig {
    /// Seconds between enrich/persist passes over the queue directories.
    pub poll_interval_seconds: u64,
    /// Per-call timeout for enrichment LM calls.
    pub enrich_timeout_seconds: u64,
    /// Namespace assigned when the producer did not specify one.
    pub default_namespace: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FleetConfig {
    pub batch_size: usize,
    pub workers: usize,
    pub lookback_hours: i64,
    /// Embedding models assigned round-robin. Every model listed here must
    /// produce vectors of `store.embedding_dim` dimensions.
    pub models: Vec<String>,
    pub poll_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SupervisorConfig {
    pub check_interval_seconds: u64,
    /// Seconds of mtime silence after which a session is considered inactive.
    pub stale_threshold_seconds: u64,
    /// Seconds between SIGTERM and SIGKILL when retiring a stenographer.
    pub grace_period_seconds: u64,
    /// Root of Claude Code project session logs.
    pub claude_dir: String,
    /// Root of Gemini CLI chat files.
    pub gemini_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GraphConfig {
    pub db_path: String,
    pub batch_size: usize,
    pub similarity_threshold: f64,
    pub k_neighbors: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the queue directories and per-service logs.
    pub data_dir: String,
}

impl Default for ScrivenerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            llm: LlmConfig::default(),
            steno: StenoConfig::default(),
            intake: IntakeConfig::default(),
            fleet: FleetConfig::default(),
            supervisor: SupervisorConfig::default(),
            graph: GraphConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8900,
            log_level: "info".into(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let db_path = default_scrivener_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            embedding_model: "nomic-embed-text:v1.5".into(),
            embedding_dim: 768,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            enrich_model: "mistral:latest".into(),
            timeout_seconds: 30,
        }
    }
}

impl Default for StenoConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 30,
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
            enrich_timeout_seconds: 30,
            default_namespace: "scripty".into(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            workers: 4,
            lookback_hours: 1,
            models: vec!["nomic-embed-text:v1.5".into()],
            poll_interval_seconds: 300,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            check_interval_seconds: 10,
            stale_threshold_seconds: 300,
            grace_period_seconds: 5,
            claude_dir: home.join(".claude/projects").to_string_lossy().into_owned(),
            gemini_dir: home.join(".gemini/tmp").to_string_lossy().into_owned(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        let db_path = default_scrivener_dir()
            .join("graph.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            batch_size: 1000,
            similarity_threshold: 0.7,
            k_neighbors: 5,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data_dir = default_scrivener_dir()
            .join("data")
            .to_string_lossy()
            .into_owned();
        Self { data_dir }
    }
}

/// Returns `~/.scrivener/`
pub fn default_scrivener_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".scrivener")
}

/// Returns the default config file path: `~/.scrivener/config.toml`
pub fn default_config_path() -> PathBuf {
    default_scrivener_dir().join("config.toml")
}

impl ScrivenerConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            ScrivenerConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (SCRIVENER_DB, SCRIVENER_DATA_DIR,
    /// SCRIVENER_LLM_URL, SCRIVENER_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SCRIVENER_DB") {
            self.store.db_path = val;
        }
        if let Ok(val) = std::env::var("SCRIVENER_DATA_DIR") {
            self.paths.data_dir = val;
        }
        if let Ok(val) = std::env::var("SCRIVENER_LLM_URL") {
            self.llm.base_url = val;
        }
        if let Ok(val) = std::env::var("SCRIVENER_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Resolve the store database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.store.db_path)
    }

    /// Resolve the graph database path, expanding `~` if needed.
    pub fn resolved_graph_db_path(&self) -> PathBuf {
        expand_tilde(&self.graph.db_path)
    }

    /// Resolve the data directory, expanding `~` if needed.
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.paths.data_dir)
    }

    // Queue directory layout. The names are load-bearing: the stenographer,
    // intake, and persist stages rendezvous only through these directories.

    pub fn client_dumps_dir(&self) -> PathBuf {
        self.data_dir().join("client-dumps")
    }

    pub fn pgai_queue_dir(&self) -> PathBuf {
        self.data_dir().join("pgai-queue")
    }

    pub fn pgai_processed_dir(&self) -> PathBuf {
        self.data_dir().join("pgai-processed")
    }

    pub fn intake_processed_dir(&self) -> PathBuf {
        self.data_dir().join("intake-processed")
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.data_dir().join("failed")
    }

    pub fn positions_dir(&self) -> PathBuf {
        self.data_dir().join("positions")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
