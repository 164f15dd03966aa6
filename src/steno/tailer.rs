//! Session file tailing: re-read, resume from position, pair exchanges.
//!
//! Session files are small relative to memory, so each tick reopens and
//! fully re-parses the file, then walks the records starting at the saved
//! position. Emission order equals file order.

use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::steno::records::{parse_claude_record, parse_gemini_record, SessionKind, SessionRecord};

/// One user→assistant pair, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawExchange {
    pub user: String,
    pub assistant: String,
}

/// Result of one tail pass.
#[derive(Debug)]
pub struct TailResult {
    /// Position to persist: the count of records fully consumed.
    pub new_position: usize,
    pub exchanges: Vec<RawExchange>,
}

/// Parse every record currently in the session file.
///
/// Claude files: malformed lines are skipped with a warning and do not count
/// toward the position, so a half-written trailing line is invisible until
/// its write completes. Gemini files: a malformed document (mid-rewrite) is
/// reported as transient; the caller waits for the next tick.
pub fn read_session(path: &Path, kind: SessionKind) -> Result<Vec<SessionRecord>> {
    let contents = std::fs::read_to_string(path)?;

    match kind {
        SessionKind::Claude => {
            let mut records = Vec::new();
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(value) => records.push(parse_claude_record(&value)),
                    Err(e) => {
                        warn!(error = %e, "skipping malformed session line");
                    }
                }
            }
            Ok(records)
        }
        SessionKind::Gemini => {
            let doc: Value = serde_json::from_str(&contents)
                .map_err(|e| Error::Transient(format!("session document not yet parseable: {e}")))?;
            let messages = doc
                .get("messages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            Ok(messages.iter().map(parse_gemini_record).collect())
        }
    }
}

/// Pair user and assistant records into exchanges, starting at `last_position`.
///
/// A shrunken file (fewer records than the saved position) is a rotation:
/// the position resets to 0 and everything re-emits — downstream relies on
/// the idempotency key. A trailing user record with no assistant yet is NOT
/// consumed: the position stops just before it so the completed turn is
/// picked up next tick. Assistant records with no pending user belong to a
/// prelude or a torn turn and are discarded.
pub fn collect_exchanges(records: &[SessionRecord], last_position: usize) -> TailResult {
    let start = if records.len() < last_position {
        warn!(
            records = records.len(),
            position = last_position,
            "session file shrank; treating as rotation and resetting position"
        );
        0
    } else {
        last_position
    };

    let mut exchanges = Vec::new();
    let mut pending_user: Option<(usize, String)> = None;
    let mut consumed = start;

    for (i, record) in records.iter().enumerate().skip(start) {
        match record {
            SessionRecord::User { text } => {
                // A newer user turn supersedes an unanswered one.
                pending_user = Some((i, text.clone()));
            }
            SessionRecord::Assistant { text } => {
                if let Some((_, user)) = pending_user.take() {
                    if !user.is_empty() {
                        exchanges.push(RawExchange {
                            user,
                            assistant: text.clone(),
                        });
                    }
                }
                // No pending user: orphan assistant, dropped.
            }
            SessionRecord::ToolResult | SessionRecord::Unknown => {}
        }
        if pending_user.is_none() {
            consumed = i + 1;
        }
    }

    if let Some((user_index, _)) = pending_user {
        consumed = user_index;
    }

    TailResult {
        new_position: consumed,
        exchanges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(text: &str) -> SessionRecord {
        SessionRecord::User { text: text.into() }
    }

    fn assistant(text: &str) -> SessionRecord {
        SessionRecord::Assistant { text: text.into() }
    }

    #[test]
    fn empty_session_emits_nothing() {
        let result = collect_exchanges(&[], 0);
        assert_eq!(result.new_position, 0);
        assert!(result.exchanges.is_empty());
    }

    #[test]
    fn pairs_in_file_order() {
        let records = vec![
            user("ping"),
            assistant("pong"),
            user("again"),
            assistant("still here"),
        ];
        let result = collect_exchanges(&records, 0);
        assert_eq!(result.new_position, 4);
        assert_eq!(result.exchanges.len(), 2);
        assert_eq!(result.exchanges[0].user, "ping");
        assert_eq!(result.exchanges[0].assistant, "pong");
        assert_eq!(result.exchanges[1].user, "again");
    }

    #[test]
    fn resume_skips_already_consumed_records() {
        let records = vec![
            user("ping"),
            assistant("pong"),
            user("new question"),
            assistant("new answer"),
        ];
        let result = collect_exchanges(&records, 2);
        assert_eq!(result.exchanges.len(), 1);
        assert_eq!(result.exchanges[0].user, "new question");
        assert_eq!(result.new_position, 4);
    }

    #[test]
    fn orphan_assistant_prelude_is_discarded_but_consumed() {
        let records = vec![assistant("hello, I am here"), user("hi"), assistant("hi back")];
        let result = collect_exchanges(&records, 0);
        assert_eq!(result.exchanges.len(), 1);
        assert_eq!(result.exchanges[0].user, "hi");
        assert_eq!(result.new_position, 3);

        // A second pass from the new position re-emits nothing.
        let again = collect_exchanges(&records, result.new_position);
        assert!(again.exchanges.is_empty());
    }

    #[test]
    fn trailing_user_is_held_for_next_tick() {
        let records = vec![user("ping"), assistant("pong"), user("unanswered")];
        let result = collect_exchanges(&records, 0);
        assert_eq!(result.exchanges.len(), 1);
        // Position stops before the unanswered user.
        assert_eq!(result.new_position, 2);

        // Next tick: the assistant has arrived.
        let mut grown = records.clone();
        grown.push(assistant("answer"));
        let next = collect_exchanges(&grown, result.new_position);
        assert_eq!(next.exchanges.len(), 1);
        assert_eq!(next.exchanges[0].user, "unanswered");
        assert_eq!(next.new_position, 4);
    }

    #[test]
    fn consecutive_users_keep_latest() {
        let records = vec![user("first draft"), user("real question"), assistant("answer")];
        let result = collect_exchanges(&records, 0);
        assert_eq!(result.exchanges.len(), 1);
        assert_eq!(result.exchanges[0].user, "real question");
        assert_eq!(result.new_position, 3);
    }

    #[test]
    fn empty_user_turn_is_consumed_without_emitting() {
        let records = vec![user(""), assistant("tool output processed")];
        let result = collect_exchanges(&records, 0);
        assert!(result.exchanges.is_empty());
        assert_eq!(result.new_position, 2);
    }

    #[test]
    fn interleaved_noise_records_are_stepped_over() {
        let records = vec![
            SessionRecord::Unknown,
            user("ping"),
            SessionRecord::ToolResult,
            assistant("pong"),
            SessionRecord::Unknown,
        ];
        let result = collect_exchanges(&records, 0);
        assert_eq!(result.exchanges.len(), 1);
        assert_eq!(result.new_position, 5);
    }

    #[test]
    fn shrunken_file_resets_to_zero() {
        let records = vec![user("ping"), assistant("pong")];
        // Saved position beyond current record count -> rotation.
        let result = collect_exchanges(&records, 10);
        assert_eq!(result.exchanges.len(), 1);
        assert_eq!(result.new_position, 2);
    }

    #[test]
    fn read_session_skips_malformed_claude_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sess.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"type\":\"user\",\"message\":{\"content\":\"ping\"}}\n",
                "{this is not json\n",
                "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"pong\"}]}}\n",
            ),
        )
        .unwrap();

        let records = read_session(&path, SessionKind::Claude).unwrap();
        assert_eq!(records.len(), 2);
        let result = collect_exchanges(&records, 0);
        assert_eq!(result.exchanges.len(), 1);
    }

    #[test]
    fn read_session_parses_gemini_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        std::fs::write(
            &path,
            r#"{"messages": [
                {"type": "user", "content": "hi"},
                {"type": "gemini", "content": "hello", "model": "gemini-pro"}
            ]}"#,
        )
        .unwrap();

        let records = read_session(&path, SessionKind::Gemini).unwrap();
        assert_eq!(records.len(), 2);
        let result = collect_exchanges(&records, 0);
        assert_eq!(result.exchanges.len(), 1);
        assert_eq!(result.exchanges[0].assistant, "hello");
    }

    #[test]
    fn read_session_gemini_mid_rewrite_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        std::fs::write(&path, r#"{"messages": [{"type": "user""#).unwrap();

        let err = read_session(&path, SessionKind::Gemini).unwrap_err();
        assert!(err.is_transient());
    }
}
