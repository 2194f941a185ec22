//! Load coordinator
//!
//! Writes one table at a time behind a row-count idempotency guard. Rows go
//! out in fixed-size batches; each batch is all-or-nothing at the sink, and
//! batches already committed stay in place when a later one fails.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vstar_common::Value;

use crate::error::{EtlError, Result, SinkError};
use crate::sink::{Sink, TableSchema};

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_WRITE_CONCURRENCY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Rows per batch
    pub batch_size: usize,
    /// Batches of one table in flight at once; 1 writes strictly in order
    pub write_concurrency: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            write_concurrency: DEFAULT_WRITE_CONCURRENCY,
        }
    }
}

/// Outcome of loading one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TableLoad {
    Loaded {
        rows: u64,
        batches: usize,
    },
    /// The table already held rows, nothing was written
    SkippedAlreadyPresent {
        existing_rows: u64,
    },
    Failed {
        reason: String,
        /// 1-based number of the rejected batch
        batch: usize,
        committed_batches: usize,
    },
    Cancelled {
        committed_batches: usize,
    },
}

impl TableLoad {
    pub fn rows_written(&self) -> u64 {
        match self {
            TableLoad::Loaded { rows, .. } => *rows,
            _ => 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TableLoad::Loaded { .. } | TableLoad::SkippedAlreadyPresent { .. })
    }

    /// Turn a failed or cancelled load into the matching error
    pub fn into_result(self, table: &str) -> Result<TableLoad> {
        match self {
            TableLoad::Failed {
                reason,
                batch,
                committed_batches,
            } => Err(EtlError::Write {
                table: table.to_string(),
                batch,
                committed_batches,
                reason,
            }),
            TableLoad::Cancelled { committed_batches } => Err(EtlError::Cancelled {
                table: table.to_string(),
                committed_batches,
            }),
            outcome => Ok(outcome),
        }
    }
}

enum BatchOutcome {
    Committed(u64),
    Rejected(SinkError),
    NotDispatched,
}

/// Owns the sink for the duration of a run's writes
#[derive(Clone)]
pub struct LoadCoordinator {
    sink: Arc<dyn Sink>,
    options: LoadOptions,
    cancel: CancellationToken,
}

impl LoadCoordinator {
    pub fn new(sink: Arc<dyn Sink>, options: LoadOptions) -> Self {
        Self {
            sink,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Load `rows` into an empty table, or skip if the table has rows.
    ///
    /// Returns `Err` only when the guard's row-count query fails. Write
    /// failures and cancellation are reported as [`TableLoad`] variants.
    pub async fn load_table(&self, schema: &TableSchema, rows: &[Vec<Value>]) -> Result<TableLoad> {
        let existing_rows = self
            .sink
            .row_count(&schema.name)
            .await
            .map_err(|e| EtlError::Sink {
                target: schema.name.clone(),
                reason: e.to_string(),
            })?;

        if existing_rows > 0 {
            info!(
                table = %schema.name,
                existing_rows,
                "Table already populated, skipping write"
            );
            return Ok(TableLoad::SkippedAlreadyPresent { existing_rows });
        }

        let batch_size = self.options.batch_size.max(1);
        let total_batches = rows.len().div_ceil(batch_size);
        let halted = AtomicBool::new(false);

        info!(
            table = %schema.name,
            rows = rows.len(),
            batches = total_batches,
            batch_size,
            "Loading table"
        );

        let outcomes: Vec<(usize, BatchOutcome)> = stream::iter(rows.chunks(batch_size).enumerate())
            .map(|(idx, chunk)| {
                let halted = &halted;
                async move {
                    // Checked when the batch is dispatched, never mid-batch
                    if halted.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
                        return (idx, BatchOutcome::NotDispatched);
                    }

                    debug!(
                        table = %schema.name,
                        "Writing batch {} / {} ({} rows)",
                        idx + 1,
                        total_batches,
                        chunk.len()
                    );

                    match self.sink.append_batch(schema, chunk).await {
                        Ok(written) => (idx, BatchOutcome::Committed(written)),
                        Err(e) => {
                            halted.store(true, Ordering::SeqCst);
                            (idx, BatchOutcome::Rejected(e))
                        },
                    }
                }
            })
            .buffer_unordered(self.options.write_concurrency.max(1))
            .collect()
            .await;

        let mut written = 0;
        let mut committed_batches = 0;
        let mut skipped = 0;
        let mut failure: Option<(usize, SinkError)> = None;

        for (idx, outcome) in outcomes {
            match outcome {
                BatchOutcome::Committed(rows) => {
                    written += rows;
                    committed_batches += 1;
                },
                BatchOutcome::Rejected(e) => {
                    if failure.as_ref().is_none_or(|(first, _)| idx < *first) {
                        failure = Some((idx, e));
                    }
                },
                BatchOutcome::NotDispatched => skipped += 1,
            }
        }

        if let Some((idx, e)) = failure {
            warn!(
                table = %schema.name,
                batch = idx + 1,
                committed_batches,
                error = %e,
                "Batch rejected, earlier batches stay committed"
            );
            return Ok(TableLoad::Failed {
                reason: e.to_string(),
                batch: idx + 1,
                committed_batches,
            });
        }

        if skipped > 0 {
            warn!(
                table = %schema.name,
                committed_batches,
                remaining_batches = skipped,
                "Load cancelled between batches"
            );
            return Ok(TableLoad::Cancelled { committed_batches });
        }

        info!(table = %schema.name, rows = written, batches = committed_batches, "Table loaded");
        Ok(TableLoad::Loaded {
            rows: written,
            batches: committed_batches,
        })
    }
}

/// Per-table entry of a [`LoadSummary`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableLoadSummary {
    pub table: String,
    /// Whether this run wrote the table
    pub written: bool,
    /// Rows written by this run
    pub row_count: u64,
    /// Rows found by the idempotency guard when the write was skipped
    pub existing_rows: Option<u64>,
}

impl TableLoadSummary {
    pub fn from_outcome(table: impl Into<String>, outcome: &TableLoad) -> Self {
        let existing_rows = match outcome {
            TableLoad::SkippedAlreadyPresent { existing_rows } => Some(*existing_rows),
            _ => None,
        };
        Self {
            table: table.into(),
            written: matches!(outcome, TableLoad::Loaded { .. }),
            row_count: outcome.rows_written(),
            existing_rows,
        }
    }
}

/// Outcome of a star-schema load, one entry per table in write order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub tables: Vec<TableLoadSummary>,
}

impl LoadSummary {
    pub fn push(&mut self, entry: TableLoadSummary) {
        self.tables.push(entry);
    }

    pub fn get(&self, table: &str) -> Option<&TableLoadSummary> {
        self.tables.iter().find(|t| t.table == table)
    }

    pub fn rows_written(&self) -> u64 {
        self.tables.iter().map(|t| t.row_count).sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use vstar_common::{Column, ColumnType};

    fn schema() -> TableSchema {
        TableSchema::new("dim_color", vec![
            Column::new("surrogate_key", ColumnType::Integer),
            Column::new("color", ColumnType::Text),
        ])
    }

    fn rows(n: i64) -> Vec<Vec<Value>> {
        (1..=n).map(|k| vec![Value::Int(k), Value::from(format!("c{k}"))]).collect()
    }

    fn coordinator(sink: &Arc<MemorySink>, batch_size: usize, write_concurrency: usize) -> LoadCoordinator {
        LoadCoordinator::new(sink.clone(), LoadOptions {
            batch_size,
            write_concurrency,
        })
    }

    #[tokio::test]
    async fn test_loads_in_batches() {
        let sink = Arc::new(MemorySink::new());
        let outcome = coordinator(&sink, 2, 1).load_table(&schema(), &rows(5)).await.unwrap();

        assert_eq!(outcome, TableLoad::Loaded { rows: 5, batches: 3 });
        assert_eq!(sink.batch_count("dim_color"), 3);
        assert_eq!(sink.rows("dim_color"), rows(5));
    }

    #[tokio::test]
    async fn test_second_load_is_a_no_op() {
        let sink = Arc::new(MemorySink::new());
        let coordinator = coordinator(&sink, 10, 1);

        coordinator.load_table(&schema(), &rows(3)).await.unwrap();
        let again = coordinator.load_table(&schema(), &rows(3)).await.unwrap();

        assert_eq!(again, TableLoad::SkippedAlreadyPresent { existing_rows: 3 });
        assert!(again.is_success());
        assert_eq!(sink.rows("dim_color").len(), 3);
        assert_eq!(sink.batch_count("dim_color"), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_earlier_batches() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_batch("dim_color", 2);

        let outcome = coordinator(&sink, 2, 1).load_table(&schema(), &rows(6)).await.unwrap();

        match &outcome {
            TableLoad::Failed {
                batch,
                committed_batches,
                ..
            } => {
                assert_eq!(*batch, 2);
                assert_eq!(*committed_batches, 1);
            },
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(sink.rows("dim_color"), rows(2));

        let err = outcome.into_result("dim_color").unwrap_err();
        assert!(matches!(err, EtlError::Write { committed_batches: 1, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_batches_write_every_row() {
        let sink = Arc::new(MemorySink::new());
        let outcome = coordinator(&sink, 3, 4).load_table(&schema(), &rows(20)).await.unwrap();

        assert_eq!(outcome, TableLoad::Loaded { rows: 20, batches: 7 });
        let mut written = sink.rows("dim_color");
        written.sort_by_key(|r| r[0].as_i64());
        assert_eq!(written, rows(20));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_batch() {
        let sink = Arc::new(MemorySink::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = coordinator(&sink, 2, 1)
            .with_cancellation(cancel)
            .load_table(&schema(), &rows(4))
            .await
            .unwrap();

        assert_eq!(outcome, TableLoad::Cancelled { committed_batches: 0 });
        assert!(sink.rows("dim_color").is_empty());
        assert!(matches!(
            outcome.into_result("dim_color"),
            Err(EtlError::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_table_loads_nothing() {
        let sink = Arc::new(MemorySink::new());
        let outcome = coordinator(&sink, 2, 1).load_table(&schema(), &[]).await.unwrap();
        assert_eq!(outcome, TableLoad::Loaded { rows: 0, batches: 0 });
    }

    #[test]
    fn test_summary_entries() {
        let skipped = TableLoadSummary::from_outcome("t", &TableLoad::SkippedAlreadyPresent {
            existing_rows: 9,
        });
        assert!(!skipped.written);
        assert_eq!(skipped.row_count, 0);
        assert_eq!(skipped.existing_rows, Some(9));

        let mut summary = LoadSummary::default();
        summary.push(skipped);
        summary.push(TableLoadSummary::from_outcome("f", &TableLoad::Loaded { rows: 4, batches: 1 }));
        assert_eq!(summary.rows_written(), 4);
        assert!(summary.get("f").unwrap().written);
    }
}
