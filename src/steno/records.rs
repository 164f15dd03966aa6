//! Duck-typed session record parsing.
//!
//! Session files come from at least two producers with different shapes, and
//! both evolve without notice. Parsing is therefore defensive: missing keys
//! yield empty strings, unrecognized `type` values land in an explicit
//! [`SessionRecord::Unknown`] arm, and unrecognized assistant content blocks
//! are preserved as raw JSON rather than dropped.

use serde_json::Value;

/// Which producer wrote the session file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Newline-delimited JSON, one record per line (Claude Code).
    Claude,
    /// Single JSON document with a top-level `messages` array (Gemini CLI).
    Gemini,
}

impl SessionKind {
    pub fn source_tag(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
        }
    }

    /// Infer the kind from the file extension: `.jsonl` is newline-delimited.
    pub fn infer(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") => Self::Claude,
            _ => Self::Gemini,
        }
    }
}

impl std::str::FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Self::Claude),
            "gemini" => Ok(Self::Gemini),
            _ => Err(format!("unknown session kind: {s}")),
        }
    }
}

/// One parsed record from a session file.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionRecord {
    /// A user turn. The text may be empty (e.g. a pure tool-result turn).
    User { text: String },
    /// An assistant (or `gemini`) turn, content blocks flattened to one
    /// string with block boundaries recoverable.
    Assistant { text: String },
    /// A tool-result record. Carries no exchange content of its own.
    ToolResult,
    /// Anything else. Counted toward the position, otherwise ignored.
    Unknown,
}

/// Parse one Claude-format record (one JSONL line, already valid JSON).
pub fn parse_claude_record(value: &Value) -> SessionRecord {
    match value.get("type").and_then(Value::as_str) {
        Some("user") => SessionRecord::User {
            text: user_text(value.pointer("/message/content")),
        },
        Some("assistant") => SessionRecord::Assistant {
            text: flatten_assistant_content(value.pointer("/message/content")),
        },
        Some("tool_result") => SessionRecord::ToolResult,
        _ => SessionRecord::Unknown,
    }
}

/// Parse one Gemini-format message (an element of `messages`).
pub fn parse_gemini_record(value: &Value) -> SessionRecord {
    let content = value
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match value.get("type").and_then(Value::as_str) {
        Some("user") => SessionRecord::User { text: content },
        Some("gemini") => SessionRecord::Assistant { text: content },
        _ => SessionRecord::Unknown,
    }
}

/// Extract user text: a plain string, or the `text` elements of a block list.
fn user_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    block.get("text").and_then(Value::as_str).map(str::to_string)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Flatten assistant content blocks into one string, preserving every block.
///
/// `text` blocks pass through verbatim; `thinking` blocks are prefixed with
/// `[THINKING]`; `tool_use` blocks become `[TOOL: <name>]` followed by the
/// pretty-printed input. Blocks of any other shape are kept as raw JSON so
/// the transcript loses nothing.
fn flatten_assistant_content(content: Option<&Value>) -> String {
    let blocks = match content {
        Some(Value::String(s)) => return s.clone(),
        Some(Value::Array(blocks)) => blocks,
        _ => return String::new(),
    };

    let mut parts = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                parts.push(
                    block
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                );
            }
            Some("thinking") => {
                let thinking = block
                    .get("thinking")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                parts.push(format!("[THINKING]\n{thinking}"));
            }
            Some("tool_use") => {
                let name = block.get("name").and_then(Value::as_str).unwrap_or("unknown");
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                let input_pretty =
                    serde_json::to_string_pretty(&input).unwrap_or_else(|_| "null".into());
                parts.push(format!("[TOOL: {name}]\n{input_pretty}"));
            }
            _ => {
                // Unrecognized block shape: keep it verbatim.
                parts.push(serde_json::to_string(block).unwrap_or_default());
            }
        }
    }
    parts.join("\n\n")
}
