//! Star-schema pipeline
//!
//! Runs the stages of one batch run in order: source read, optional bronze
//! staging, optional enrichment, one build per dimension, fact assembly, then
//! every dimension table followed by the fact table. Each stage is audited
//! through the [`OperationLogger`]; the first fatal error ends the run.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vstar_common::{Column, ColumnType, Value};

use crate::config::{EtlConfig, StarSchemaConfig};
use crate::dimension::{build_dimensions, Dimension, Dimensions};
use crate::enrich::enrich;
use crate::error::{EtlError, Result};
use crate::fact::{assemble_facts, FactTable};
use crate::load::{LoadCoordinator, LoadOptions, LoadSummary, TableLoad, TableLoadSummary};
use crate::oplog::{operation, OperationLogger, DEFAULT_AUDIT_TABLE};
use crate::record::RecordSet;
use crate::sink::{Sink, TableSchema};
use crate::source::RecordSource;

/// Bronze column naming the file each row came from
pub const SOURCE_FILE_COLUMN: &str = "_source_file";

/// Dimensions and fact table built from one record set
#[derive(Debug, Clone)]
pub struct StarSchema {
    pub dimensions: Dimensions,
    pub facts: FactTable,
}

impl StarSchema {
    /// Build dimensions, then facts. Touches no sink.
    pub fn transform(records: &RecordSet, layout: &StarSchemaConfig) -> Result<Self> {
        layout.validate()?;
        let dimensions = build_dimensions(records, &layout.dimensions)?;
        let facts = assemble_facts(records, &dimensions, &layout.fact)?;
        Ok(Self { dimensions, facts })
    }
}

/// Result of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source: String,
    pub records_read: usize,
    pub bronze: Option<TableLoadSummary>,
    pub star_schema: LoadSummary,
}

/// Build the layout's star schema from `records` and load it into `sink`.
///
/// No bronze staging, no enrichment, audit rows go to `etl_logs`.
pub async fn load_star_schema(
    records: &RecordSet,
    layout: &StarSchemaConfig,
    sink: Arc<dyn Sink>,
) -> Result<LoadSummary> {
    StarSchemaPipeline::new(sink, layout.clone())
        .load_records("memory", records.clone())
        .await
        .map(|report| report.star_schema)
}

pub struct StarSchemaPipeline {
    sink: Arc<dyn Sink>,
    layout: StarSchemaConfig,
    coordinator: LoadCoordinator,
    logger: OperationLogger,
    bronze_table: Option<String>,
    reference_year: Option<i32>,
    run_lock: bool,
}

impl StarSchemaPipeline {
    pub fn new(sink: Arc<dyn Sink>, layout: StarSchemaConfig) -> Self {
        Self {
            coordinator: LoadCoordinator::new(sink.clone(), LoadOptions::default()),
            logger: OperationLogger::new(sink.clone(), DEFAULT_AUDIT_TABLE),
            sink,
            layout,
            bronze_table: None,
            reference_year: None,
            run_lock: false,
        }
    }

    /// Pipeline configured from `config`, with the run lock enabled
    pub fn from_config(config: &EtlConfig, sink: Arc<dyn Sink>) -> Self {
        let mut pipeline = Self::new(sink, config.layout.clone())
            .with_load_options(config.load.options())
            .with_audit_table(&config.load.audit_table)
            .with_run_lock(true);

        if config.source.load_bronze {
            pipeline = pipeline.with_bronze_table(&config.source.bronze_table);
        }
        if config.source.enrich {
            pipeline = pipeline.with_enrichment(config.source.reference_year);
        }
        pipeline
    }

    pub fn with_load_options(mut self, options: LoadOptions) -> Self {
        self.coordinator = LoadCoordinator::new(self.sink.clone(), options);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.coordinator = self.coordinator.with_cancellation(cancel);
        self
    }

    pub fn with_audit_table(mut self, audit_table: &str) -> Self {
        self.logger = OperationLogger::new(self.sink.clone(), audit_table);
        self
    }

    /// Stage raw records in `table` before the star-schema work
    pub fn with_bronze_table(mut self, table: &str) -> Self {
        self.bronze_table = Some(table.to_string());
        self
    }

    /// Derive silver columns, ageing vehicles from `reference_year`
    pub fn with_enrichment(mut self, reference_year: i32) -> Self {
        self.reference_year = Some(reference_year);
        self
    }

    /// Hold the sink's run lock on the fact table for the whole run
    pub fn with_run_lock(mut self, enabled: bool) -> Self {
        self.run_lock = enabled;
        self
    }

    pub fn layout(&self) -> &StarSchemaConfig {
        &self.layout
    }

    /// Read the source fully, then load it
    pub async fn run<S>(&self, source: &mut S) -> Result<RunReport>
    where
        S: RecordSource + ?Sized,
    {
        let source_name = source.name();
        info!(source = %source_name, "Starting star-schema run");

        let records = self
            .logger
            .track(operation::SOURCE_READ, async { source.read_all() })
            .await?;

        self.load_records(&source_name, records).await
    }

    /// Load an already materialized record set
    pub async fn load_records(&self, source_name: &str, records: RecordSet) -> Result<RunReport> {
        self.layout.validate()?;

        let lock_target = self.layout.fact.name.clone();
        if self.run_lock {
            self.sink
                .lock_run(&lock_target)
                .await
                .map_err(|e| EtlError::Sink {
                    target: lock_target.clone(),
                    reason: e.to_string(),
                })?;
        }

        let result = self.load_locked(source_name, records).await;

        if self.run_lock {
            if let Err(e) = self.sink.unlock_run(&lock_target).await {
                warn!(target = %lock_target, error = %e, "Failed to release run lock");
            }
        }

        result
    }

    async fn load_locked(&self, source_name: &str, records: RecordSet) -> Result<RunReport> {
        let records_read = records.len();

        let bronze = match &self.bronze_table {
            Some(table) => Some(self.load_bronze(table, source_name, &records).await?),
            None => None,
        };

        let records = match self.reference_year {
            Some(year) => {
                self.logger
                    .track(operation::SILVER_ENRICH, async { enrich(records, year) })
                    .await?
            },
            None => records,
        };

        let star = self.build(&records).await?;

        let mut star_schema = LoadSummary::default();
        for dimension in star.dimensions.iter() {
            let outcome = self
                .load_table(&dimension.table_schema(), &dimension.table_rows())
                .await?;
            star_schema.push(TableLoadSummary::from_outcome(dimension.name(), &outcome));
        }

        let outcome = self
            .load_table(&star.facts.table_schema(), &star.facts.table_rows())
            .await?;
        star_schema.push(TableLoadSummary::from_outcome(star.facts.name(), &outcome));

        info!(
            source = %source_name,
            records = records_read,
            rows_written = star_schema.rows_written(),
            "Star-schema run complete"
        );

        Ok(RunReport {
            source: source_name.to_string(),
            records_read,
            bronze,
            star_schema,
        })
    }

    /// Dimension builds then fact assembly, each audited on its own
    async fn build(&self, records: &RecordSet) -> Result<StarSchema> {
        let mut dimensions = Vec::with_capacity(self.layout.dimensions.len());
        for spec in &self.layout.dimensions {
            let dimension = self
                .logger
                .track(&operation::dimension_build(&spec.name), async {
                    Dimension::build(spec, records)
                })
                .await?;
            dimensions.push(dimension);
        }
        let dimensions: Dimensions = dimensions.into_iter().collect();

        let facts = self
            .logger
            .track(&operation::fact_build(&self.layout.fact.name), async {
                assemble_facts(records, &dimensions, &self.layout.fact)
            })
            .await?;

        Ok(StarSchema { dimensions, facts })
    }

    async fn load_table(&self, schema: &TableSchema, rows: &[Vec<Value>]) -> Result<TableLoad> {
        self.logger
            .track(&operation::table_load(&schema.name), async {
                self.coordinator
                    .load_table(schema, rows)
                    .await
                    .and_then(|outcome| outcome.into_result(&schema.name))
            })
            .await
    }

    async fn load_bronze(
        &self,
        table: &str,
        source_name: &str,
        records: &RecordSet,
    ) -> Result<TableLoadSummary> {
        let mut columns = records.columns().to_vec();
        columns.push(Column::new(SOURCE_FILE_COLUMN, ColumnType::Text));
        let schema = TableSchema::new(table, columns);

        let rows: Vec<Vec<Value>> = records
            .rows()
            .iter()
            .map(|row| {
                let mut row = row.clone();
                row.push(Value::from(source_name));
                row
            })
            .collect();

        let outcome = self
            .logger
            .track(&operation::bronze_load(table), async {
                self.coordinator
                    .load_table(&schema, &rows)
                    .await
                    .and_then(|outcome| outcome.into_result(table))
            })
            .await?;

        Ok(TableLoadSummary::from_outcome(table, &outcome))
    }

    /// Source-free dry run: enrichment (if enabled) and the in-memory transform
    pub fn plan(&self, records: RecordSet) -> Result<StarSchema> {
        let records = match self.reference_year {
            Some(year) => enrich(records, year)?,
            None => records,
        };
        StarSchema::transform(&records, &self.layout)
    }
}
