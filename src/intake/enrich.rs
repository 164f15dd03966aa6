//! Enrich stage: keyword extraction, sentiment scoring, and summarization.
//!
//! Every LM call is fallible and every field has a deterministic fallback,
//! so a dead inference endpoint degrades output quality but never stalls or
//! drops a record: keywords fall back to empty, sentiment to a neutral 3,
//! and the summary to a truncation of the raw exchange.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::llm::LmClient;
use crate::steno::emit::TranscriptRecord;
use crate::store::write::dedup_key;

/// Characters of raw exchange kept when summarization fails.
const SUMMARY_FALLBACK_CHARS: usize = 240;

/// Sentiment score plus the model's one-line rationale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentiment {
    pub score: i64,
    pub analysis: String,
}

/// The record handed from the enrich stage to the persist stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// The summary — becomes the memory `content`.
    pub text: String,
    /// The raw exchange, preserved verbatim in metadata.
    pub content: String,
    pub namespace: String,
    pub username: String,
    pub session: String,
    pub timestamp: String,
    pub keywords: Vec<String>,
    pub sentiment: Sentiment,
    pub source: String,
    /// Content-derived idempotency key, computed here so the persist stage
    /// can reject replays without re-deriving producer state.
    pub dedup_key: String,
}

/// Enrich one captured exchange. Never fails — failures become fallbacks.
pub async fn enrich_exchange(
    lm: &dyn LmClient,
    model: &str,
    record: &TranscriptRecord,
    namespace: &str,
) -> EnrichedRecord {
    let raw = format!("USER: {}\n\nASSISTANT: {}", record.user, record.assistant);

    let keywords = match lm
        .complete(model, &keywords_prompt(&raw), 128, 0.1)
        .await
    {
        Ok(reply) => parse_keywords(&reply),
        Err(e) => {
            warn!(error = %e, "keyword extraction failed; storing empty keyword list");
            Vec::new()
        }
    };

    let sentiment = match lm
        .complete(model, &sentiment_prompt(&raw), 256, 0.3)
        .await
    {
        Ok(reply) => parse_sentiment(&reply),
        Err(e) => {
            warn!(error = %e, "sentiment analysis failed; defaulting to neutral");
            Sentiment {
                score: 3,
                analysis: format!("analysis unavailable: {e}"),
            }
        }
    };

    let summary = match lm.complete(model, &summary_prompt(&raw), 256, 0.3).await {
        Ok(reply) if !reply.is_empty() => reply,
        Ok(_) | Err(_) => {
            warn!("summarization failed; falling back to truncated exchange");
            truncate_chars(&raw, SUMMARY_FALLBACK_CHARS)
        }
    };

    EnrichedRecord {
        text: summary,
        dedup_key: dedup_key(&record.session, &record.timestamp, &record.user),
        content: raw,
        namespace: namespace.to_string(),
        username: "scrivener".to_string(),
        session: record.session.clone(),
        timestamp: record.timestamp.clone(),
        keywords,
        sentiment,
        source: record.source.clone(),
    }
}

fn keywords_prompt(text: &str) -> String {
    format!(
        "Extract 5-10 topical keywords from this conversation exchange.\n\n\
         Text:\n{}\n\n\
         Return ONLY a JSON array of short keyword strings, nothing else.",
        clip_for_prompt(text)
    )
}

fn sentiment_prompt(text: &str) -> String {
    format!(
        "Analyze the sentiment of the following text and rate it on a scale of 1-5:\n\
         1 = Very Negative (angry, frustrated, critical)\n\
         2 = Negative (disappointed, concerned)\n\
         3 = Neutral (factual, objective)\n\
         4 = Positive (satisfied, constructive)\n\
         5 = Very Positive (enthusiastic, excited)\n\n\
         Text: {}\n\n\
         Respond ONLY with a JSON object in this exact format:\n\
         {{\"score\": <number 1-5>, \"analysis\": \"<brief explanation>\"}}",
        clip_for_prompt(text)
    )
}

fn summary_prompt(text: &str) -> String {
    format!(
        "Summarize this conversation exchange in 2-3 concise sentences. \
         Focus on what task was requested and what action was taken.\n\n\
         {}\n\nSUMMARY:",
        clip_for_prompt(text)
    )
}

/// Small local models choke on huge prompts; clip the exchange.
fn clip_for_prompt(text: &str) -> String {
    truncate_chars(text, 12_000)
}

/// Parse a keyword reply: a JSON array if the model obeyed, otherwise split
/// on commas and newlines. Capped at 10.
pub fn parse_keywords(reply: &str) -> Vec<String> {
    let stripped = strip_code_fences(reply);

    let mut keywords: Vec<String> = if let Some(list) = extract_json(&stripped)
        .and_then(|v| v.as_array().cloned())
    {
        list.iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    } else {
        stripped
            .split(|c| c == ',' || c == '\n')
            .map(|s| s.trim().trim_matches(|c| c == '"' || c == '-' || c == '*').to_string())
            .collect()
    };

    keywords.retain(|k| !k.is_empty() && k.len() <= 64);
    keywords.truncate(10);
    keywords
}

/// Parse a sentiment reply. Out-of-range scores and unparseable replies both
/// fall back to a neutral 3.
pub fn parse_sentiment(reply: &str) -> Sentiment {
    let stripped = strip_code_fences(reply);

    if let Some(obj) = extract_json(&stripped) {
        let score = obj.get("score").and_then(Value::as_i64).unwrap_or(3);
        let analysis = obj
            .get("analysis")
            .or_else(|| obj.get("reasoning"))
            .and_then(Value::as_str)
            .unwrap_or("no explanation provided")
            .to_string();
        if (1..=5).contains(&score) {
            return Sentiment { score, analysis };
        }
        warn!(score, "sentiment score out of range; defaulting to 3");
        return Sentiment { score: 3, analysis };
    }

    Sentiment {
        score: 3,
        analysis: "unparseable sentiment reply".to_string(),
    }
}

/// Models love wrapping JSON in markdown fences. Unwrap the first fence.
fn strip_code_fences(reply: &str) -> String {
    let trimmed = reply.trim();
    if let Some(rest) = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")) {
        if let Some(end) = rest.find("```") {
            return rest[..end].trim().to_string();
        }
        return rest.trim().to_string();
    }
    trimmed.to_string()
}

/// Pull the first JSON value (object or array) out of surrounding chatter.
fn extract_json(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Some(v);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        let start = text.find(open)?;
        let end = text.rfind(close)?;
        if end > start {
            if let Ok(v) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Some(v);
            }
        }
    }
    None
}

/// Truncate at a char boundary, never mid-codepoint.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLm;

    fn transcript(user: &str, assistant: &str) -> TranscriptRecord {
        TranscriptRecord::new(0, user.into(), assistant.into(), "claude", "sess-1")
    }

    #[test]
    fn keywords_parse_json_array() {
        let kw = parse_keywords(r#"["rust", "memory", "sqlite"]"#);
        assert_eq!(kw, vec!["rust", "memory", "sqlite"]);
    }

    #[test]
    fn keywords_parse_fenced_json() {
        let kw = parse_keywords("```json\n[\"alpha\", \"beta\"]\n```");
        assert_eq!(kw, vec!["alpha", "beta"]);
    }

    #[test]
    fn keywords_fall_back_to_comma_split() {
        let kw = parse_keywords("rust, embeddings, vector search");
        assert_eq!(kw, vec!["rust", "embeddings", "vector search"]);
    }

    #[test]
    fn keywords_cap_at_ten() {
        let many: Vec<String> = (0..20).map(|i| format!("\"k{i}\"")).collect();
        let kw = parse_keywords(&format!("[{}]", many.join(",")));
        assert_eq!(kw.len(), 10);
    }

    #[test]
    fn sentiment_parses_well_formed_reply() {
        let s = parse_sentiment(r#"{"score": 4, "analysis": "constructive exchange"}"#);
        assert_eq!(s.score, 4);
        assert_eq!(s.analysis, "constructive exchange");
    }

    #[test]
    fn sentiment_accepts_reasoning_alias_and_fences() {
        let s = parse_sentiment("```json\n{\"score\": 2, \"reasoning\": \"frustrated tone\"}\n```");
        assert_eq!(s.score, 2);
        assert_eq!(s.analysis, "frustrated tone");
    }

    #[test]
    fn out_of_range_sentiment_defaults_to_three() {
        assert_eq!(parse_sentiment(r#"{"score": 9, "analysis": "x"}"#).score, 3);
        assert_eq!(parse_sentiment(r#"{"score": 0, "analysis": "x"}"#).score, 3);
        assert_eq!(parse_sentiment("the vibe is good").score, 3);
    }

    #[tokio::test]
    async fn enrich_uses_scripted_replies() {
        let lm = ScriptedLm::new(
            vec![
                Ok(r#"["files", "listing"]"#.into()),
                Ok(r#"{"score": 4, "analysis": "helpful"}"#.into()),
                Ok("The user asked for a file listing and got one.".into()),
            ],
            8,
        );

        let record = transcript("list files", "here they are");
        let enriched = enrich_exchange(&lm, "mistral:latest", &record, "scripty").await;

        assert_eq!(enriched.keywords, vec!["files", "listing"]);
        assert_eq!(enriched.sentiment.score, 4);
        assert_eq!(enriched.text, "The user asked for a file listing and got one.");
        assert_eq!(enriched.namespace, "scripty");
        assert_eq!(enriched.source, "claude");
        assert!(enriched.content.starts_with("USER: list files"));
        assert!(!enriched.dedup_key.is_empty());
    }

    #[tokio::test]
    async fn enrich_survives_total_lm_failure() {
        // Empty script: every call fails.
        let lm = ScriptedLm::new(vec![], 8);

        let record = transcript("ping", "pong");
        let enriched = enrich_exchange(&lm, "mistral:latest", &record, "scripty").await;

        assert!(enriched.keywords.is_empty());
        assert_eq!(enriched.sentiment.score, 3);
        assert!(enriched.text.starts_with("USER: ping"));
        assert!(enriched.text.chars().count() <= SUMMARY_FALLBACK_CHARS);
    }

    #[tokio::test]
    async fn fallback_summary_truncates_long_exchanges() {
        let lm = ScriptedLm::new(vec![], 8);
        let long_assistant = "x".repeat(2000);
        let record = transcript("explain", &long_assistant);

        let enriched = enrich_exchange(&lm, "m", &record, "scripty").await;
        assert_eq!(enriched.text.chars().count(), SUMMARY_FALLBACK_CHARS);
    }

    #[test]
    fn dedup_key_is_stable_per_exchange() {
        let a = TranscriptRecord {
            exchange_num: 0,
            timestamp: "2026-02-01T00:00:00Z".into(),
            user: "hello".into(),
            assistant: "hi".into(),
            source: "claude".into(),
            session: "s1".into(),
            record_type: "verbatim_transcript".into(),
        };
        let k1 = dedup_key(&a.session, &a.timestamp, &a.user);
        let k2 = dedup_key(&a.session, &a.timestamp, &a.user);
        assert_eq!(k1, k2);
    }
}
