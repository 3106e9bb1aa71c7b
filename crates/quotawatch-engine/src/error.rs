//! Error types for the quotawatch engine.

use thiserror::Error;

use crate::admission::AdmissionError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures reported by a watch feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed unavailable: {0}")]
    Unavailable(String),

    #[error("invalid feed seed: {0}")]
    Seed(#[from] serde_json::Error),

    #[error("feed seed io: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("invalid arch rule {0:?}")]
    InvalidRule(String),

    #[error("invalid unclassified policy {0:?}")]
    InvalidPolicy(String),
}

/// Errors surfaced by engine requests.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Feed(#[from] FeedError),
}
