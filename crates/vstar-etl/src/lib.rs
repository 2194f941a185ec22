//! VStar ETL Library
//!
//! Turns a flat vehicle price dataset (bronze) into a star schema (silver):
//! one table per dimension with dense surrogate keys, and a fact table that
//! references every dimension and carries the numeric measures.
//!
//! # Stages
//!
//! - **Source**: [`source::CsvSource`] materializes the raw records
//! - **Dimension builder**: [`dimension::build_dimensions`]
//! - **Fact assembler**: [`fact::assemble_facts`]
//! - **Load coordinator**: [`load::LoadCoordinator`] writes each table behind
//!   a row-count idempotency guard
//! - **Operation logger**: [`oplog::OperationLogger`] audits every stage
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vstar_etl::config::StarSchemaConfig;
//! use vstar_etl::pipeline::StarSchemaPipeline;
//! use vstar_etl::sink::MemorySink;
//! use vstar_etl::source::CsvSource;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sink = Arc::new(MemorySink::new());
//!     let pipeline = StarSchemaPipeline::new(sink, StarSchemaConfig::vehicle_default(true))
//!         .with_enrichment(2025);
//!
//!     let report = pipeline.run(&mut CsvSource::new("vehicles.csv")).await?;
//!     println!("{} records read", report.records_read);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod dimension;
pub mod enrich;
pub mod error;
pub mod fact;
pub mod load;
pub mod oplog;
pub mod pipeline;
pub mod record;
pub mod sink;
pub mod source;

pub use config::{EtlConfig, StarSchemaConfig};
pub use dimension::{build_dimensions, Dimension, DimensionSpec, Dimensions};
pub use error::{EtlError, ErrorKind, Result};
pub use fact::{assemble_facts, FactSpec, FactTable};
pub use load::{LoadCoordinator, LoadOptions, LoadSummary, TableLoad};
pub use oplog::{LoadRecord, OperationLogger, OperationStatus};
pub use pipeline::{load_star_schema, RunReport, StarSchema, StarSchemaPipeline};
pub use record::RecordSet;
pub use sink::{MemorySink, PostgresSink, Sink, TableSchema};
pub use source::{CsvSource, RecordSource};
