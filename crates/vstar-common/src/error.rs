//! Error types for VStar common types

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised while interpreting scalar input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    #[error("Invalid column type: {0}")]
    InvalidColumnType(String),

    #[error("Value '{raw}' is not a valid {expected}")]
    InvalidValue { raw: String, expected: String },
}
