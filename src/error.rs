//! Error types for polling, aggregation and the store.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, PulseError>;

/// Errors surfaced by providers, adapters and the store.
///
/// Every variant aborts the poll of the provider it was raised for; none of
/// them advance `last_update`.
#[derive(Error, Debug)]
pub enum PulseError {
    /// Missing or invalid provider configuration (credentials, URL, path).
    #[error("configuration error: {0}")]
    Config(String),

    /// Network failure, remote 5xx, unreadable body.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// Authentication still failing after one re-authentication.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A source record that cannot be parsed.
    #[error("malformed record at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    /// `MOVED_TO` without a preceding unmatched `MOVED_FROM`.
    #[error("MOVED_TO at line {line} has no preceding MOVED_FROM")]
    Ordering { line: usize },

    /// Rejected caller input (empty author, empty post).
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Unknown provider, blip set or slug.
    #[error("not found: {0}")]
    NotFound(String),

    /// A concurrent writer changed the records this operation depended on.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PulseError {
    /// True for failures that may succeed on a later poll.
    pub fn is_transient(&self) -> bool {
        matches!(self, PulseError::Transient(_) | PulseError::Io(_))
    }

    /// Short label used as a log/metric field.
    pub fn kind(&self) -> &'static str {
        match self {
            PulseError::Config(_) => "config",
            PulseError::Transient(_) => "transient",
            PulseError::Auth(_) => "auth",
            PulseError::Malformed { .. } => "malformed",
            PulseError::Ordering { .. } => "ordering",
            PulseError::Invalid(_) => "invalid",
            PulseError::NotFound(_) => "not_found",
            PulseError::Conflict(_) => "conflict",
            PulseError::Store(_) => "store",
            PulseError::Io(_) => "io",
        }
    }
}

impl From<reqwest::Error> for PulseError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            PulseError::Config(e.to_string())
        } else {
            PulseError::Transient(e.to_string())
        }
    }
}

impl From<serde_json::Error> for PulseError {
    fn from(e: serde_json::Error) -> Self {
        PulseError::Store(e.to_string())
    }
}
