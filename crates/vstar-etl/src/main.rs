//! VStar ETL - vehicle bronze to star-schema loader

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vstar_common::logging::{init_logging, LogConfig, LogLevel};
use vstar_etl::config::EtlConfig;
use vstar_etl::pipeline::StarSchemaPipeline;
use vstar_etl::sink::{MemorySink, PostgresSink, TableSchema};
use vstar_etl::source::{CsvSource, RecordSource};

#[derive(Parser, Debug)]
#[command(name = "vstar-etl")]
#[command(author, version, about = "Vehicle price star-schema ETL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args, Debug)]
struct SourceArgs {
    /// Raw vehicle CSV
    #[arg(long, env = "VSTAR_CSV_PATH")]
    csv: Option<PathBuf>,

    /// TOML star-schema layout, overrides VSTAR_LAYOUT_FILE (defaults to the
    /// vehicle layout)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Skip the silver enrichment columns
    #[arg(long)]
    no_enrich: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Load the star schema into PostgreSQL
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// Rows per write batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Do not stage raw records in the bronze table
        #[arg(long)]
        no_bronze: bool,

        /// Print the run report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Build the star schema in memory and report its shape
    Plan {
        #[command(flatten)]
        source: SourceArgs,
    },
}

fn apply_source_args(config: &mut EtlConfig, args: &SourceArgs) -> Result<()> {
    if let Some(csv) = &args.csv {
        config.source.csv_path = csv.clone();
    }
    if args.no_enrich {
        config.source.enrich = false;
    }
    if let Some(schema) = &args.schema {
        config.source.layout_file = Some(schema.clone());
    }
    config.resolve_layout().context("Failed to load star schema layout")?;
    Ok(())
}

fn csv_source(config: &EtlConfig) -> CsvSource {
    CsvSource::new(&config.source.csv_path).with_null_tokens(config.source.null_tokens.clone())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("vstar-etl")
        .build();

    // Merge with environment variables (they take precedence)
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _log_guard = init_logging(&log_config)?;

    let mut config = EtlConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            source,
            batch_size,
            no_bronze,
            json,
        } => {
            apply_source_args(&mut config, &source)?;
            if let Some(batch_size) = batch_size {
                config.load.batch_size = batch_size;
            }
            if no_bronze {
                config.source.load_bronze = false;
            }
            config.validate()?;

            run(&config, json).await
        },
        Command::Plan { source } => {
            apply_source_args(&mut config, &source)?;
            config.validate()?;

            plan(&config)
        },
    }
}

async fn run(config: &EtlConfig, json: bool) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            on_signal.cancel();
        }
    });

    let sink = Arc::new(PostgresSink::new(pool.clone()));
    let pipeline = StarSchemaPipeline::from_config(config, sink).with_cancellation(cancel);
    let mut source = csv_source(config);

    let report = match pipeline.run(&mut source).await {
        Ok(report) => report,
        Err(e) => {
            error!(kind = %e.kind(), error = %e, "Run failed");
            pool.close().await;
            return Err(e.into());
        },
    };

    for table in report.bronze.iter().chain(report.star_schema.tables.iter()) {
        info!(
            table = %table.table,
            written = table.written,
            rows = table.row_count,
            existing_rows = ?table.existing_rows,
            "Table summary"
        );
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    pool.close().await;
    info!("Run complete");
    Ok(())
}

fn plan(config: &EtlConfig) -> Result<()> {
    let mut source = csv_source(config);
    let records = source.read_all()?;

    let mut pipeline = StarSchemaPipeline::new(Arc::new(MemorySink::new()), config.layout.clone());
    if config.source.enrich {
        pipeline = pipeline.with_enrichment(config.source.reference_year);
    }

    let star = pipeline.plan(records)?;

    for dimension in star.dimensions.iter() {
        info!(
            dimension = %dimension.name(),
            rows = dimension.len(),
            columns = %column_list(&dimension.table_schema()),
            "Dimension"
        );
    }
    info!(
        fact = %star.facts.name(),
        rows = star.facts.len(),
        columns = %column_list(&star.facts.table_schema()),
        "Fact table"
    );

    Ok(())
}

/// `name TYPE` pairs, as the target table needs them
fn column_list(schema: &TableSchema) -> String {
    schema
        .columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.ty.sql_type()))
        .collect::<Vec<_>>()
        .join(", ")
}
