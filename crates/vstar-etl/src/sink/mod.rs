//! Sink interface
//!
//! The load coordinator and the operation logger only talk to storage
//! through [`Sink`]. Implementations decide how a batch becomes durable;
//! the contract is that `append_batch` either commits the whole batch or
//! none of it.

mod memory;
mod postgres;

pub use memory::MemorySink;
pub use postgres::PostgresSink;

use async_trait::async_trait;
use vstar_common::{Column, Value};

use crate::error::SinkError;
use crate::oplog::LoadRecord;

/// Target table name and column layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Storage the star schema is written to
#[async_trait]
pub trait Sink: Send + Sync {
    /// Current number of rows in a table
    async fn row_count(&self, table: &str) -> Result<u64, SinkError>;

    /// Append rows to a table, all or nothing. Returns rows written.
    async fn append_batch(&self, table: &TableSchema, rows: &[Vec<Value>]) -> Result<u64, SinkError>;

    /// Append one entry to the fixed-schema audit table
    async fn append_load_record(&self, audit_table: &str, record: &LoadRecord) -> Result<(), SinkError>;

    /// Claim exclusive use of a load target for the duration of a run.
    ///
    /// The default does nothing: the row-count guard alone is then not safe
    /// against concurrent runs.
    async fn lock_run(&self, _target: &str) -> Result<(), SinkError> {
        Ok(())
    }

    async fn unlock_run(&self, _target: &str) -> Result<(), SinkError> {
        Ok(())
    }
}
