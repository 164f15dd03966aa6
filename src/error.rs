//! Domain error kinds shared by every service.
//!
//! Six kinds cover the whole pipeline: [`Error::BadInput`] for contract
//! violations, [`Error::NotFound`] for absent rows, [`Error::Transient`] for
//! retryable I/O, [`Error::Permanent`] for records that must be quarantined,
//! [`Error::Conflict`] for idempotency-key duplicates, and [`Error::Config`]
//! for startup-fatal configuration problems.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Input violates a contract: empty content, wrong-dimension embedding,
    /// malformed request body.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Requested row or namespace does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Recoverable I/O or timeout. Callers may retry with backoff.
    #[error("transient: {0}")]
    Transient(String),

    /// Non-retryable failure. The offending record should be moved aside.
    #[error("permanent: {0}")]
    Permanent(String),

    /// Duplicate id or idempotency key.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Missing or invalid configuration. Fatal at startup (exit code 2).
    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Snake-case tag used in HTTP error bodies and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadInput(_) => "bad_input",
            Self::NotFound(_) => "not_found",
            Self::Transient(_) => "transient",
            Self::Permanent(_) => "permanent",
            Self::Conflict(_) => "conflict",
            Self::Config(_) => "config",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound("no matching row".into()),
            rusqlite::Error::SqliteFailure(code, msg) => match code.code {
                rusqlite::ErrorCode::ConstraintViolation => Self::Conflict(
                    msg.clone().unwrap_or_else(|| "constraint violation".into()),
                ),
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    Self::Transient(e.to_string())
                }
                _ => Self::Permanent(e.to_string()),
            },
            _ => Self::Permanent(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Self::Transient(e.to_string())
        } else {
            Self::Permanent(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::BadInput(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Transient(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_snake_case_tags() {
        assert_eq!(Error::BadInput("x".into()).kind(), "bad_input");
        assert_eq!(Error::NotFound("x".into()).kind(), "not_found");
        assert_eq!(Error::Transient("x".into()).kind(), "transient");
        assert_eq!(Error::Permanent("x".into()).kind(), "permanent");
        assert_eq!(Error::Conflict("x".into()).kind(), "conflict");
        assert_eq!(Error::Config("x".into()).kind(), "config");
    }

    #[test]
    fn no_rows_maps_to_not_found() {
        let e: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(e.kind(), "not_found");
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(Error::Transient("t".into()).is_transient());
        assert!(!Error::Permanent("p".into()).is_transient());
        assert!(!Error::Conflict("c".into()).is_transient());
    }
}
