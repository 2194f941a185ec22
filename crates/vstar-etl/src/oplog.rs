//! Operation logger
//!
//! Wraps each pipeline stage and appends one [`LoadRecord`] per execution to
//! the audit table. Stage errors are recorded and then returned unchanged;
//! audit write errors are reported through `tracing` and dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};

use crate::dimension::Dimension;
use crate::error::Result;
use crate::fact::FactTable;
use crate::load::TableLoad;
use crate::record::RecordSet;
use crate::sink::Sink;

pub const DEFAULT_AUDIT_TABLE: &str = "etl_logs";

/// Operation name constructors, matching the labels stored in the audit table
pub mod operation {
    pub const SOURCE_READ: &str = "SOURCE_READ";
    pub const SILVER_ENRICH: &str = "SILVER_ENRICH";

    pub fn bronze_load(table: &str) -> String {
        format!("BRONZE_LOAD:{}", table)
    }

    pub fn dimension_build(dimension: &str) -> String {
        format!("DIMENSION_BUILD:{}", dimension)
    }

    pub fn fact_build(fact: &str) -> String {
        format!("FACT_BUILD:{}", fact)
    }

    pub fn table_load(table: &str) -> String {
        format!("TABLE_LOAD:{}", table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationStatus {
    Success,
    Error,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Success => "SUCCESS",
            OperationStatus::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadRecord {
    pub operation: String,
    pub status: OperationStatus,
    pub records_processed: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub message: Option<String>,
}

/// Stage outputs that can describe themselves in an audit row
pub trait Audited {
    /// Row count recorded on success
    fn records_processed(&self) -> i64;

    fn audit_message(&self) -> Option<String> {
        None
    }
}

impl Audited for () {
    fn records_processed(&self) -> i64 {
        0
    }
}

impl Audited for RecordSet {
    fn records_processed(&self) -> i64 {
        self.len() as i64
    }
}

impl Audited for Dimension {
    fn records_processed(&self) -> i64 {
        self.len() as i64
    }
}

impl Audited for FactTable {
    fn records_processed(&self) -> i64 {
        self.len() as i64
    }
}

impl Audited for TableLoad {
    fn records_processed(&self) -> i64 {
        self.rows_written() as i64
    }

    fn audit_message(&self) -> Option<String> {
        match self {
            TableLoad::SkippedAlreadyPresent { existing_rows } => Some(format!(
                "table already holds {} rows, write skipped",
                existing_rows
            )),
            TableLoad::Loaded { batches, .. } => Some(format!("{} batches committed", batches)),
            _ => None,
        }
    }
}

/// Appends audit rows through a sink without ever failing the caller
#[derive(Clone)]
pub struct OperationLogger {
    sink: Arc<dyn Sink>,
    audit_table: String,
}

impl OperationLogger {
    pub fn new(sink: Arc<dyn Sink>, audit_table: impl Into<String>) -> Self {
        Self {
            sink,
            audit_table: audit_table.into(),
        }
    }

    pub fn audit_table(&self) -> &str {
        &self.audit_table
    }

    /// Append a record. Failures are logged, never returned.
    pub async fn record(&self, record: &LoadRecord) {
        if let Err(e) = self.sink.append_load_record(&self.audit_table, record).await {
            error!(
                audit_table = %self.audit_table,
                operation = %record.operation,
                status = %record.status,
                error = %e,
                "Failed to write audit record"
            );
        }
    }

    /// Run a stage inside a span named after `operation` and audit its outcome.
    ///
    /// The stage's own result is returned as-is.
    pub async fn track<T, F>(&self, operation: &str, stage: F) -> Result<T>
    where
        T: Audited,
        F: Future<Output = Result<T>>,
    {
        let span = info_span!("stage", operation = %operation);
        let start_time = Utc::now();
        let started = Instant::now();

        let outcome = stage.instrument(span.clone()).await;

        let end_time = Utc::now();
        let duration_seconds = started.elapsed().as_secs_f64();

        let record = match &outcome {
            Ok(output) => {
                span.in_scope(|| {
                    info!(
                        records = output.records_processed(),
                        duration_secs = duration_seconds,
                        "Stage completed"
                    )
                });
                LoadRecord {
                    operation: operation.to_string(),
                    status: OperationStatus::Success,
                    records_processed: output.records_processed(),
                    start_time,
                    end_time,
                    duration_seconds,
                    message: output.audit_message(),
                }
            },
            Err(e) => {
                span.in_scope(|| error!(kind = %e.kind(), error = %e, "Stage failed"));
                LoadRecord {
                    operation: operation.to_string(),
                    status: OperationStatus::Error,
                    records_processed: 0,
                    start_time,
                    end_time,
                    duration_seconds,
                    message: Some(format!("{}: {}", e.kind(), e)),
                }
            },
        };

        self.record(&record).await;
        outcome
    }
}
