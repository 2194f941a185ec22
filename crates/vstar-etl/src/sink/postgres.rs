//! PostgreSQL sink
//!
//! Each logical batch runs in its own transaction. A batch wider than the
//! Postgres bind-parameter limit is split into several INSERT statements
//! inside that transaction, so the batch still commits or rolls back as one.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use vstar_common::{ColumnType, Value};

use super::{Sink, TableSchema};
use crate::error::SinkError;
use crate::oplog::LoadRecord;

/// Postgres limits a statement to 65535 bind parameters
const MAX_BIND_PARAMS: usize = 65_535;

pub struct PostgresSink {
    pool: PgPool,
    /// Advisory locks are session-scoped, so each held lock pins its connection
    run_locks: Mutex<HashMap<String, PoolConnection<Postgres>>>,
}

impl PostgresSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Quote a possibly schema-qualified identifier (`silver.dim_x`)
pub fn quote_ident(name: &str) -> Result<String, SinkError> {
    if name.trim().is_empty() {
        return Err(SinkError::InvalidIdentifier("empty identifier".to_string()));
    }

    name.split('.')
        .map(|part| {
            if part.is_empty() || part.contains('\0') {
                return Err(SinkError::InvalidIdentifier(name.to_string()));
            }
            Ok(format!("\"{}\"", part.replace('"', "\"\"")))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|parts| parts.join("."))
}

/// Rows per INSERT statement for a table of `width` columns
fn rows_per_statement(width: usize) -> usize {
    (MAX_BIND_PARAMS / width.max(1)).max(1)
}

fn push_row(
    builder: &mut sqlx::query_builder::Separated<'_, '_, Postgres, &'static str>,
    row: &[Value],
    types: &[ColumnType],
) {
    for (value, ty) in row.iter().zip(types) {
        match ty {
            ColumnType::Integer => builder.push_bind(value.as_i64()),
            ColumnType::Float => builder.push_bind(value.as_f64()),
            ColumnType::Text => builder.push_bind(value.as_str().map(str::to_string)),
        };
    }
}

#[async_trait]
impl Sink for PostgresSink {
    async fn row_count(&self, table: &str) -> Result<u64, SinkError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn append_batch(&self, table: &TableSchema, rows: &[Vec<Value>]) -> Result<u64, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }
        if table.columns.is_empty() {
            return Err(SinkError::Rejected(format!("table '{}' has no columns", table.name)));
        }

        let columns = table
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        let insert = format!("INSERT INTO {} ({}) ", quote_ident(&table.name)?, columns);
        let types: Vec<ColumnType> = table.columns.iter().map(|c| c.ty).collect();

        let mut tx = self.pool.begin().await?;

        for chunk in rows.chunks(rows_per_statement(types.len())) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(insert.as_str());
            query_builder.push_values(chunk, |mut b, row| {
                push_row(&mut b, row, &types);
            });
            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        debug!(table = %table.name, rows = rows.len(), "Committed batch");
        Ok(rows.len() as u64)
    }

    async fn append_load_record(&self, audit_table: &str, record: &LoadRecord) -> Result<(), SinkError> {
        let sql = format!(
            r#"
            INSERT INTO {} (
                operation,
                status,
                records_processed,
                start_time,
                end_time,
                duration_seconds,
                message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
            quote_ident(audit_table)?
        );

        sqlx::query(&sql)
            .bind(&record.operation)
            .bind(record.status.as_str())
            .bind(record.records_processed)
            .bind(record.start_time)
            .bind(record.end_time)
            .bind(record.duration_seconds)
            .bind(&record.message)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn lock_run(&self, target: &str) -> Result<(), SinkError> {
        let mut locks = self.run_locks.lock().await;
        if locks.contains_key(target) {
            return Err(SinkError::Unavailable(format!(
                "run lock for '{}' is already held by this process",
                target
            )));
        }

        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1)::bigint)")
            .bind(target)
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            return Err(SinkError::Unavailable(format!(
                "another run holds the lock for '{}'",
                target
            )));
        }

        locks.insert(target.to_string(), conn);
        Ok(())
    }

    async fn unlock_run(&self, target: &str) -> Result<(), SinkError> {
        let Some(mut conn) = self.run_locks.lock().await.remove(target) else {
            return Ok(());
        };

        let released: bool = match sqlx::query_scalar("SELECT pg_advisory_unlock(hashtext($1)::bigint)")
            .bind(target)
            .fetch_one(&mut *conn)
            .await
        {
            Ok(released) => released,
            Err(e) => {
                // The session may still hold the lock, so it must not go back to the pool
                warn!(target, error = %e, "Advisory unlock failed, closing its connection");
                if let Err(close_err) = conn.detach().close().await {
                    debug!(target, error = %close_err, "Lock connection did not close cleanly");
                }
                return Err(e.into());
            },
        };

        if !released {
            warn!(target, "Advisory lock was not held at unlock");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("dim_vehicle_model").unwrap(), "\"dim_vehicle_model\"");
        assert_eq!(quote_ident("silver.etl_logs").unwrap(), "\"silver\".\"etl_logs\"");
        assert_eq!(quote_ident("we\"ird").unwrap(), "\"we\"\"ird\"");
        assert!(quote_ident("").is_err());
        assert!(quote_ident("silver.").is_err());
    }

    #[test]
    fn test_rows_per_statement_stays_under_bind_limit() {
        assert_eq!(rows_per_statement(13), 5041);
        assert!(rows_per_statement(13) * 13 <= MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(0), MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(100_000), 1);
    }
}
