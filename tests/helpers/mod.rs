#![allow(dead_code)]

use async_trait::async_trait;
use rusqlite::Connection;
use std::collections::VecDeque;
use std::sync::Mutex;

use scrivener::error::{Error, Result};
use scrivener::llm::LmClient;
use scrivener::store::types::NewMemory;
use scrivener::store::write::insert_memory;

/// Small dimension keeps test vectors readable.
pub const DIM: usize = 8;

/// Open a fresh in-memory store with schema and migrations applied.
pub fn test_db() -> Connection {
    scrivener::db::open_memory_database(DIM).unwrap()
}

/// Deterministic embedding with a spike at position `seed`.
/// Distinct seeds produce orthogonal vectors.
pub fn spike(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[seed % DIM] = 1.0;
    v
}

/// Insert a memory row directly. Returns the store-assigned id.
pub fn insert(conn: &Connection, content: &str, namespace: &str, user: &str) -> i64 {
    insert_memory(
        conn,
        &NewMemory {
            user_id: user.into(),
            content: content.into(),
            metadata: None,
            memory_type: "session_summary".into(),
            namespace: Some(namespace.into()),
            dedup_key: None,
        },
    )
    .unwrap()
}

/// Scripted LM fake: returns canned completions in order and spike
/// embeddings derived from text length. An empty script fails every
/// completion, which exercises the fallback paths.
pub struct FakeLm {
    completions: Mutex<VecDeque<Result<String>>>,
    pub embed_dim: usize,
}

impl FakeLm {
    pub fn new(completions: Vec<Result<String>>, embed_dim: usize) -> Self {
        Self {
            completions: Mutex::new(completions.into_iter().collect()),
            embed_dim,
        }
    }

    /// A fake whose every call times out.
    pub fn unreachable() -> Self {
        Self::new(vec![], DIM)
    }

    /// One standard enrichment script: keywords, sentiment, summary.
    pub fn enrichment(keywords: &str, sentiment_score: i64, summary: &str) -> Self {
        Self::new(
            vec![
                Ok(keywords.to_string()),
                Ok(format!(
                    "{{\"score\": {sentiment_score}, \"analysis\": \"scripted\"}}"
                )),
                Ok(summary.to_string()),
            ],
            DIM,
        )
    }
}

#[async_trait]
impl LmClient for FakeLm {
    async fn complete(
        &self,
        _model: &str,
        _prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String> {
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Transient("scripted timeout".into())))
    }

    async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.embed_dim];
        v[text.len() % self.embed_dim] = 1.0;
        Ok(v)
    }
}

/// Write a Claude-format session file from (user, assistant) pairs.
pub fn write_claude_session(path: &std::path::Path, turns: &[(&str, &str)]) {
    let mut lines = String::new();
    for (user, assistant) in turns {
        lines.push_str(&serde_json::json!({
            "type": "user",
            "message": {"content": user}
        }).to_string());
        lines.push('\n');
        lines.push_str(&serde_json::json!({
            "type": "assistant",
            "message": {"content": [{"type": "text", "text": assistant}]}
        }).to_string());
        lines.push('\n');
    }
    std::fs::write(path, lines).unwrap();
}
