//! Error types for the quotawatch data model.

use thiserror::Error;

/// Result type alias for quantity parsing.
pub type QuantityResult<T> = Result<T, QuantityError>;

/// Errors that can occur while parsing a resource quantity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid number in quantity {0:?}")]
    InvalidNumber(String),

    #[error("unknown suffix {suffix:?} in quantity {input:?}")]
    UnknownSuffix { input: String, suffix: String },

    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),
}
