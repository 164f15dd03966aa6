//! Client for the local inference endpoint.
//!
//! Everything the pipeline asks of a language model goes through one seam:
//! [`LmClient::complete`] for prompt-in/text-out enrichment calls and
//! [`LmClient::embed`] for text-to-vector calls. The production
//! implementation talks to an Ollama-compatible server; tests substitute a
//! scripted fake. No caller may depend on these calls succeeding — every
//! enrichment step has a deterministic fallback.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait LmClient: Send + Sync {
    /// Run a completion: prompt in, raw text out.
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String>;

    /// Embed a text into a vector under the named model.
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>>;

    /// Cheap reachability probe for the health surface. Implementations
    /// without a meaningful probe report healthy.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// HTTP client for an Ollama-compatible endpoint.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl LmClient for OllamaClient {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "model": model,
                "prompt": prompt,
                "stream": false,
                "options": {
                    "temperature": temperature,
                    "num_predict": max_tokens,
                },
            }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let kind = if status.is_server_error() {
                Error::Transient(format!("inference endpoint returned {status}"))
            } else {
                Error::Permanent(format!("inference endpoint returned {status}"))
            };
            return Err(kind);
        }

        let body: GenerateResponse = resp.json().await.map_err(Error::from)?;
        Ok(body.response.trim().to_string())
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "model": model, "prompt": text }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let kind = if status.is_server_error() {
                Error::Transient(format!("embedding endpoint returned {status}"))
            } else {
                Error::Permanent(format!("embedding endpoint returned {status}"))
            };
            return Err(kind);
        }

        let body: EmbeddingsResponse = resp.json().await.map_err(Error::from)?;
        if body.embedding.is_empty() {
            return Err(Error::Permanent(format!("model {model} returned an empty embedding")));
        }
        Ok(body.embedding)
    }

    async fn ping(&self) -> Result<()> {
        let resp = self
            .client
            .get(&self.base_url)
            .timeout(Duration::from_secs(2))
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::Transient(format!(
                "inference endpoint returned {}",
                resp.status()
            )))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedLm;
    use super::*;

    #[tokio::test]
    async fn scripted_completions_come_back_in_order() {
        let lm = ScriptedLm::new(
            vec![Ok("first".into()), Ok("second".into())],
            8,
        );
        assert_eq!(lm.complete("m", "p", 64, 0.3).await.unwrap(), "first");
        assert_eq!(lm.complete("m", "p", 64, 0.3).await.unwrap(), "second");
        // script exhausted -> transient failure
        assert!(lm.complete("m", "p", 64, 0.3).await.is_err());
    }

    #[tokio::test]
    async fn scripted_embeddings_have_requested_dimension() {
        let lm = ScriptedLm::new(vec![], 16);
        let v = lm.embed("m", "hello").await.unwrap();
        assert_eq!(v.len(), 16);
        assert!(v.iter().any(|&x| x != 0.0));
    }
}
