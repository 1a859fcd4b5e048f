//! Climate dataset importer.
//!
//! Loads grid coordinates and gridded climate statistics from NetCDF files
//! into PostgreSQL. Without `--mutate` the whole pipeline runs against an
//! in-memory store and only reports what it would write.

mod database;
mod progress;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use ingestion::{
    load_import_config, CoordinateReport, DatasetFailure, ImportOptions, Importer, LoadAllReport,
    LogProgress, NetCdfReader, ProgressSink,
};
use serde::Serialize;
use storage::{MemoryStore, PgStore, StatisticStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use database::DatabaseArgs;
use progress::BarProgress;

#[derive(Parser, Debug)]
#[command(name = "pfimport")]
#[command(about = "Import climate grid datasets into the statistics database")]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .multiple(true)
        .args(["load_coordinates", "load_one", "load_all"])
))]
struct Args {
    /// Import configuration file
    #[arg(short, long, env = "PF_IMPORT_CONFIG", default_value = "config/datasets.yaml")]
    conf: PathBuf,

    /// Replace the coordinates of every configured grid
    #[arg(long)]
    load_coordinates: bool,

    /// Import one dataset by id
    #[arg(long, value_name = "ID")]
    load_one: Option<i64>,

    /// Import every configured dataset
    #[arg(long)]
    load_all: bool,

    /// Write to PostgreSQL (default is a dry run against an in-memory store)
    #[arg(long)]
    mutate: bool,

    /// Create missing tables before importing
    #[arg(long, requires = "mutate")]
    ensure_schema: bool,

    /// Import only the first N rows of each dataset
    #[arg(long, value_name = "N")]
    sample_size: Option<usize>,

    /// Override sync.batch_size
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: Option<u64>,

    /// Skip merge batches below this number (after a failure report)
    #[arg(long, default_value_t = 0)]
    resume_from_batch: usize,

    /// Log every SQL statement
    #[arg(long)]
    log_sql: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log progress instead of drawing progress bars
    #[arg(long)]
    no_progress: bool,

    /// Print a JSON summary to stdout
    #[arg(long)]
    report_json: bool,

    #[command(flatten)]
    database: DatabaseArgs,
}

#[derive(Debug, Default, Serialize)]
struct RunSummary {
    dry_run: bool,
    coordinates: Vec<CoordinateReport>,
    #[serde(flatten)]
    datasets: LoadAllReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args);
    netcdf_parser::silence_hdf5_errors();

    let config = load_import_config(&args.conf)?;
    info!(
        config = %args.conf.display(),
        grids = config.grids.len(),
        datasets = config.datasets.len(),
        "Loaded import configuration"
    );

    let store = open_store(&args).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current batch");
                cancel.cancel();
            }
        });
    }

    let progress: Arc<dyn ProgressSink> = if args.no_progress {
        Arc::new(LogProgress::default())
    } else {
        Arc::new(BarProgress::new())
    };

    let importer = Importer::new(Arc::new(config), store, Arc::new(NetCdfReader))
        .with_progress(progress)
        .with_cancellation(cancel)
        .with_options(ImportOptions {
            sample_size: args.sample_size,
            resume_from_batch: args.resume_from_batch,
            batch_size: args.batch_size.map(|n| n as usize),
            dry_run: !args.mutate,
        });

    let mut summary = RunSummary {
        dry_run: !args.mutate,
        ..Default::default()
    };

    if args.load_coordinates {
        summary.coordinates = importer
            .load_coordinates()
            .await
            .context("Failed to load grid coordinates")?;
    }

    if let Some(id) = args.load_one {
        match importer.load_dataset(id).await {
            Ok(report) => summary.datasets.imported.push(report),
            Err(e) => summary.datasets.failed.push(DatasetFailure {
                dataset_id: id,
                message: e.to_string(),
                resume_from_batch: e.resume_batch(),
            }),
        }
    }

    if args.load_all {
        let report = importer.load_all().await;
        summary.datasets.imported.extend(report.imported);
        summary.datasets.failed.extend(report.failed);
    }

    if args.report_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    for failure in &summary.datasets.failed {
        match failure.resume_from_batch {
            Some(batch) => error!(
                dataset_id = failure.dataset_id,
                error = %failure.message,
                "Import failed; merge imports can continue with --resume-from-batch {}",
                batch
            ),
            None => error!(
                dataset_id = failure.dataset_id,
                error = %failure.message,
                "Import failed"
            ),
        }
    }
    anyhow::ensure!(
        summary.datasets.failed.is_empty(),
        "{} of {} dataset import(s) failed",
        summary.datasets.failed.len(),
        summary.datasets.failed.len() + summary.datasets.imported.len()
    );

    info!(
        datasets = summary.datasets.imported.len(),
        grids = summary.coordinates.len(),
        dry_run = summary.dry_run,
        "Import finished"
    );
    Ok(())
}

fn init_tracing(args: &Args) {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    if args.log_sql {
        match "sqlx::query=debug".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring SQL log directive: {}", e),
        }
    }

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store(args: &Args) -> Result<Arc<dyn StatisticStore>> {
    if !args.mutate {
        info!("Dry run: writing to an in-memory store; pass --mutate to write to PostgreSQL");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let mut config = args.database.store_config()?;
    config.log_sql = args.log_sql;
    let store = PgStore::connect(&config)
        .await
        .context("Failed to connect to PostgreSQL")?;
    if args.ensure_schema {
        store
            .ensure_schema()
            .await
            .context("Failed to create tables")?;
    }
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_an_action_is_required() {
        assert!(Args::try_parse_from(["pfimport"]).is_err());
        assert!(Args::try_parse_from(["pfimport", "--load-all"]).is_ok());
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "pfimport",
            "--conf",
            "datasets.yaml",
            "--load-coordinates",
            "--load-one",
            "40101",
            "--mutate",
            "--sample-size",
            "100",
            "--resume-from-batch",
            "3",
            "--log-sql",
        ])
        .unwrap();
        assert_eq!(args.conf, PathBuf::from("datasets.yaml"));
        assert!(args.load_coordinates && args.mutate && args.log_sql);
        assert_eq!(args.load_one, Some(40101));
        assert_eq!(args.sample_size, Some(100));
        assert_eq!(args.resume_from_batch, 3);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        assert!(Args::try_parse_from(["pfimport", "--load-all", "--batch-size", "0"]).is_err());
    }

    #[test]
    fn test_ensure_schema_requires_mutate() {
        assert!(Args::try_parse_from(["pfimport", "--load-all", "--ensure-schema"]).is_err());
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/datasets.yaml");
        let config = load_import_config(&path).unwrap();
        assert_eq!(config.grids.len(), 2);
        assert_eq!(config.datasets.len(), 3);
        assert!(config.dataset(40701).is_some());
    }

    #[tokio::test]
    async fn test_dry_run_imports_sample_config() {
        let file = test_utils::write_temp_config(test_utils::SAMPLE_CONFIG_YAML);
        let args = Args::try_parse_from([
            "pfimport",
            "--conf",
            file.path().to_str().unwrap(),
            "--load-coordinates",
        ])
        .unwrap();

        let config = load_import_config(&args.conf).unwrap();
        let store = open_store(&args).await.unwrap();
        let importer = Importer::new(Arc::new(config), store.clone(), Arc::new(NetCdfReader));
        let reports = importer.load_coordinates().await.unwrap();
        assert_eq!(reports[0].rows, 6);
        assert_eq!(
            store.count_coordinates(climate_common::GridKind::Gcm).await.unwrap(),
            6
        );
    }
}
