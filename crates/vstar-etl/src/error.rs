//! Error types for the star-schema ETL
//!
//! Every fatal condition aborts the run and reaches the caller as an
//! [`EtlError`]. Audit-trail write failures are deliberately absent: the
//! operation logger reports them through `tracing` and carries on.

use thiserror::Error;
use vstar_common::Value;

/// Result type alias for ETL operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Main error type for a pipeline run
#[derive(Error, Debug)]
pub enum EtlError {
    /// The record source could not be fully materialized
    #[error("Source read failed: {0}")]
    SourceRead(String),

    /// A dimension projection is malformed (missing attribute, duplicate name, ...)
    #[error("Dimension '{dimension}' is malformed: {reason}")]
    DimensionBuild { dimension: String, reason: String },

    /// A record's projected tuple matched no row of a dimension
    #[error(
        "Record {record_index} has no row in dimension '{dimension}' for ({})",
        format_values(.values)
    )]
    UnresolvedForeignKey {
        record_index: usize,
        dimension: String,
        values: Vec<Value>,
    },

    /// The sink rejected a batch. Batches committed before it stay in place.
    #[error(
        "Write to '{table}' failed at batch {batch} ({committed_batches} batches already committed): {reason}"
    )]
    Write {
        table: String,
        batch: usize,
        committed_batches: usize,
        reason: String,
    },

    /// The sink could not answer a row-count or lock request
    #[error("Sink error on '{target}': {reason}")]
    Sink { target: String, reason: String },

    #[error("Run cancelled while loading '{table}' ({committed_batches} batches already committed)")]
    Cancelled {
        table: String,
        committed_batches: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Stable label for each error class, used in audit messages and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SourceReadFailure,
    DimensionBuildFailure,
    UnresolvedForeignKey,
    WriteFailure,
    SinkFailure,
    Cancelled,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceReadFailure => "SourceReadFailure",
            ErrorKind::DimensionBuildFailure => "DimensionBuildFailure",
            ErrorKind::UnresolvedForeignKey => "UnresolvedForeignKeyError",
            ErrorKind::WriteFailure => "WriteFailure",
            ErrorKind::SinkFailure => "SinkFailure",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Config => "ConfigError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EtlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::SourceRead(_) => ErrorKind::SourceReadFailure,
            EtlError::DimensionBuild { .. } => ErrorKind::DimensionBuildFailure,
            EtlError::UnresolvedForeignKey { .. } => ErrorKind::UnresolvedForeignKey,
            EtlError::Write { .. } => ErrorKind::WriteFailure,
            EtlError::Sink { .. } => ErrorKind::SinkFailure,
            EtlError::Cancelled { .. } => ErrorKind::Cancelled,
            EtlError::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn dimension(dimension: &str, reason: impl Into<String>) -> Self {
        EtlError::DimensionBuild {
            dimension: dimension.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors reported by a [`Sink`](crate::sink::Sink) implementation
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Rejected by sink: {0}")]
    Rejected(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

fn format_values(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
