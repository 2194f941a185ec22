//! VStar Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types and logging for the VStar workspace.
//!
//! # Overview
//!
//! - **Types**: the scalar [`Value`] carried by every record, plus column
//!   schema types
//! - **Logging**: tracing subscriber bootstrap shared by all binaries
//! - **Error Handling**: errors raised while interpreting raw scalar input
//!
//! # Example
//!
//! ```
//! use vstar_common::{ColumnType, Value};
//!
//! let year = Value::parse_as("2020", ColumnType::Integer).unwrap();
//! assert_eq!(year, Value::Int(2020));
//! assert!(Value::parse_as("", ColumnType::Integer).unwrap().is_null());
//! assert!(Value::parse_as("NA", ColumnType::Float).unwrap().is_null());
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use types::{Column, ColumnType, NullTokens, Value, DEFAULT_NULL_TOKENS};
