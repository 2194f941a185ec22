//! In-memory sink
//!
//! Used for dry runs (`vstar-etl plan`) and tests. Supports injected
//! failures so partial-write and audit-failure paths can be exercised.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use vstar_common::Value;

use super::{Sink, TableSchema};
use crate::error::SinkError;
use crate::oplog::LoadRecord;

#[derive(Debug, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    batches: usize,
}

#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<HashMap<String, Table>>,
    audit: Mutex<HashMap<String, Vec<LoadRecord>>>,
    failing_batches: Mutex<HashMap<String, usize>>,
    locks: Mutex<HashSet<String>>,
    fail_audit: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table with existing rows
    pub fn with_rows(self, table: &str, rows: Vec<Vec<Value>>) -> Self {
        lock(&self.tables).entry(table.to_string()).or_default().rows = rows;
        self
    }

    /// Reject the `nth` (1-based) batch appended to `table`
    pub fn fail_batch(&self, table: &str, nth: usize) {
        lock(&self.failing_batches).insert(table.to_string(), nth);
    }

    /// Make every audit append fail
    pub fn fail_audit(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    pub fn rows(&self, table: &str) -> Vec<Vec<Value>> {
        lock(&self.tables)
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn columns(&self, table: &str) -> Vec<String> {
        lock(&self.tables)
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    /// Number of batches successfully appended to `table`
    pub fn batch_count(&self, table: &str) -> usize {
        lock(&self.tables).get(table).map(|t| t.batches).unwrap_or(0)
    }

    pub fn audit_records(&self, audit_table: &str) -> Vec<LoadRecord> {
        lock(&self.audit).get(audit_table).cloned().unwrap_or_default()
    }

    pub fn is_locked(&self, target: &str) -> bool {
        lock(&self.locks).contains(target)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn row_count(&self, table: &str) -> Result<u64, SinkError> {
        Ok(lock(&self.tables).get(table).map(|t| t.rows.len() as u64).unwrap_or(0))
    }

    async fn append_batch(&self, table: &TableSchema, rows: &[Vec<Value>]) -> Result<u64, SinkError> {
        if let Some(bad) = rows.iter().position(|r| r.len() != table.columns.len()) {
            return Err(SinkError::Rejected(format!(
                "row {} has {} values for {} columns of '{}'",
                bad,
                rows[bad].len(),
                table.columns.len(),
                table.name
            )));
        }

        let mut tables = lock(&self.tables);
        let entry = tables.entry(table.name.clone()).or_default();

        let attempt = entry.batches + 1;
        if lock(&self.failing_batches).get(&table.name) == Some(&attempt) {
            return Err(SinkError::Rejected(format!(
                "injected failure on batch {} of '{}'",
                attempt, table.name
            )));
        }

        if entry.columns.is_empty() {
            entry.columns = table.column_names().into_iter().map(str::to_string).collect();
        }
        entry.rows.extend(rows.iter().cloned());
        entry.batches = attempt;

        Ok(rows.len() as u64)
    }

    async fn append_load_record(&self, audit_table: &str, record: &LoadRecord) -> Result<(), SinkError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable(format!("audit table '{}' is unavailable", audit_table)));
        }
        lock(&self.audit)
            .entry(audit_table.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn lock_run(&self, target: &str) -> Result<(), SinkError> {
        if !lock(&self.locks).insert(target.to_string()) {
            return Err(SinkError::Unavailable(format!(
                "another run holds the lock for '{}'",
                target
            )));
        }
        Ok(())
    }

    async fn unlock_run(&self, target: &str) -> Result<(), SinkError> {
        lock(&self.locks).remove(target);
        Ok(())
    }
}
