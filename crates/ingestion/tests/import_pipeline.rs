//! Imports of synthetic grids into the in-memory store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use climate_common::{GridKind, StatisticRecord, Unit};
use grid_transform::{
    BuildPool, DatasetMeta, DimensionRoles, GridFlattener, NullPolicy, RecordBuilder, RecordShape,
    RowErrorPolicy,
};
use ingestion::{
    parse_import_config, ErrorKind, ImportConfig, ImportOptions, Importer, IngestionError,
    ProgressError, ProgressSink, StaticSources,
};
use storage::{MemoryStore, StatisticRow, StatisticStore};
use test_utils::{synthetic_source, SAMPLE_DATASET_ID};
use tokio_util::sync::CancellationToken;

const DATASET: i64 = SAMPLE_DATASET_ID as i64;

fn config(protocol: &str, retries: u32) -> Arc<ImportConfig> {
    let yaml = format!(
        r#"
grids:
  - kind: GCM
    lon: [-10.0, -9.5, -9.0]
    lat: [40.0, 40.5]
sync:
  batch_size: 50
  protocol: {protocol}
  max_batch_retries: {retries}
  retry_backoff_ms: 0
  build_chunk_size: 64
  workers: 2
datasets:
  - id: 40101
    filename: synthetic.nc
    grid: GCM
    unit: "°C"
    parent_category: Heat
    dimensions: [lon, lat, warming_levels]
    shape:
      type: mean_percentiles
      mean: mean
      pctl10: pctl10
      pctl90: pctl90
  - id: 40199
    filename: missing.nc
    grid: GCM
    unit: days
    shape:
      type: ladder
      values: [mean]
"#
    );
    Arc::new(parse_import_config(&yaml).unwrap())
}

fn importer(config: Arc<ImportConfig>, store: &MemoryStore) -> Importer {
    let sources = StaticSources::new().with_source(DATASET, synthetic_source(10, 10, 10));
    Importer::new(config, Arc::new(store.clone()), Arc::new(sources))
}

fn built_records() -> Vec<StatisticRecord> {
    let source = synthetic_source(10, 10, 10);
    let meta = DatasetMeta {
        dataset_id: SAMPLE_DATASET_ID,
        grid: GridKind::Gcm,
        unit: Unit::DegreesCelsius,
        shape: RecordShape::MeanPercentiles {
            mean: "mean".into(),
            pctl10: Some("pctl10".into()),
            pctl90: Some("pctl90".into()),
        },
        roles: DimensionRoles::default(),
    };
    let builder = RecordBuilder::new(meta, &source.spec).unwrap();
    let rows: Vec<_> = GridFlattener::new(&source.spec, source.variables.iter().collect(), NullPolicy::Any)
        .unwrap()
        .rows()
        .collect();
    BuildPool::new(Some(2), RowErrorPolicy::Abort)
        .unwrap()
        .build_chunk(&builder, &rows)
        .unwrap()
        .records
}

#[tokio::test]
async fn test_replace_all_import_and_reimport() {
    let store = MemoryStore::new();
    let importer = importer(config("replace_all", 0), &store);

    let report = importer.load_dataset(DATASET).await.unwrap();
    assert_eq!(report.records_written, 540);
    assert_eq!(report.rows_flattened, 540);
    assert_eq!(report.rows_dropped, 60);
    assert_eq!(report.batches_committed, 11);
    assert_eq!(store.count_records(SAMPLE_DATASET_ID).await.unwrap(), 540);

    let keys: HashSet<_> = store
        .fetch_records(SAMPLE_DATASET_ID)
        .await
        .unwrap()
        .into_iter()
        .map(|row| (row.coordinate_hash, row.warming_scenario))
        .collect();
    assert_eq!(keys.len(), 540);

    importer.load_dataset(DATASET).await.unwrap();
    assert_eq!(store.count_records(SAMPLE_DATASET_ID).await.unwrap(), 540);
    assert_eq!(store.commits(), 2);
}

#[tokio::test]
async fn test_written_records_read_back_unchanged() {
    let store = MemoryStore::new();
    importer(config("replace_all", 0), &store)
        .load_dataset(DATASET)
        .await
        .unwrap();

    let mut expected: Vec<StatisticRow> = built_records().iter().map(StatisticRow::from).collect();
    expected.sort_by(|a, b| a.key().cmp(&b.key()));
    assert_eq!(store.fetch_records(SAMPLE_DATASET_ID).await.unwrap(), expected);

    let header = store.fetch_header(SAMPLE_DATASET_ID).await.unwrap().unwrap();
    assert_eq!(header.name, "Average temperature");
    assert_eq!(header.model.as_deref(), Some("global REMO"));
    assert_eq!(header.unit, Unit::DegreesCelsius);
}

#[tokio::test]
async fn test_replace_all_failure_keeps_previous_import() {
    let store = MemoryStore::new();
    let importer = importer(config("replace_all", 3), &store);
    importer.load_dataset(DATASET).await.unwrap();
    let before = store.fetch_records(SAMPLE_DATASET_ID).await.unwrap();

    store.fail_writes(3, 1);
    let err = importer.load_dataset(DATASET).await.unwrap_err();
    assert!(matches!(err, IngestionError::BatchFailed { batch: 3, attempts: 1, .. }));
    assert_eq!(err.kind(), ErrorKind::Synchronization);
    // Replace-all has no partial progress to resume from.
    assert_eq!(err.resume_batch(), None);

    assert_eq!(store.fetch_records(SAMPLE_DATASET_ID).await.unwrap(), before);
    assert!(store.fetch_header(SAMPLE_DATASET_ID).await.unwrap().is_some());
    assert_eq!(store.commits(), 1);
}

#[tokio::test]
async fn test_merge_resumes_from_failed_batch() {
    let store = MemoryStore::new();
    let config = config("merge_by_key", 0);

    store.fail_writes(4, 100);
    let err = importer(config.clone(), &store)
        .load_dataset(DATASET)
        .await
        .unwrap_err();
    assert_eq!(err.resume_batch(), Some(4));
    assert_eq!(store.count_records(SAMPLE_DATASET_ID).await.unwrap(), 200);

    store.fail_writes(0, 0);
    let report = importer(config, &store)
        .with_options(ImportOptions {
            resume_from_batch: 4,
            ..Default::default()
        })
        .load_dataset(DATASET)
        .await
        .unwrap();
    assert_eq!(report.batches_skipped, 4);
    assert_eq!(report.batches_committed, 7);
    assert_eq!(report.records_written, 340);
    assert_eq!(store.count_records(SAMPLE_DATASET_ID).await.unwrap(), 540);
}

#[tokio::test]
async fn test_merge_retries_transient_failures() {
    let store = MemoryStore::new();
    store.fail_writes(2, 2);

    let report = importer(config("merge_by_key", 2), &store)
        .load_dataset(DATASET)
        .await
        .unwrap();
    assert_eq!(report.retries, 2);
    assert_eq!(report.batches_committed, 11);
    assert_eq!(store.count_records(SAMPLE_DATASET_ID).await.unwrap(), 540);
}

#[tokio::test]
async fn test_merge_is_idempotent() {
    let store = MemoryStore::new();
    let importer = importer(config("merge_by_key", 0), &store);
    importer.load_dataset(DATASET).await.unwrap();
    let first = store.fetch_records(SAMPLE_DATASET_ID).await.unwrap();
    importer.load_dataset(DATASET).await.unwrap();
    assert_eq!(store.fetch_records(SAMPLE_DATASET_ID).await.unwrap(), first);
}

#[tokio::test]
async fn test_configuration_errors_write_nothing() {
    let store = MemoryStore::new();
    let importer = importer(config("replace_all", 0), &store);

    let err = importer.load_dataset(12345).await.unwrap_err();
    assert!(matches!(err, IngestionError::UnknownDataset(12345)));
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = importer.load_dataset(40199).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn test_sample_size_limits_rows() {
    let store = MemoryStore::new();
    let report = importer(config("replace_all", 0), &store)
        .with_options(ImportOptions {
            sample_size: Some(25),
            dry_run: true,
            ..Default::default()
        })
        .load_dataset(DATASET)
        .await
        .unwrap();
    assert_eq!(report.rows_flattened, 25);
    assert_eq!(report.records_written, 25);
    assert!(report.dry_run);
}

#[tokio::test]
async fn test_cancelled_import_rolls_back() {
    let store = MemoryStore::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = importer(config("replace_all", 0), &store)
        .with_cancellation(cancel)
        .load_dataset(DATASET)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.resume_batch(), None);
    assert_eq!(store.count_records(SAMPLE_DATASET_ID).await.unwrap(), 0);
    assert_eq!(store.commits(), 0);
}

struct BrokenProgress {
    calls: AtomicUsize,
}

impl ProgressSink for BrokenProgress {
    fn start(&self, _dataset_id: i32, _total: Option<u64>) -> Result<(), ProgressError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProgressError("terminal closed".into()))
    }

    fn advance(&self, _dataset_id: i32, _processed: u64) -> Result<(), ProgressError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProgressError("terminal closed".into()))
    }

    fn finish(&self, _dataset_id: i32, _processed: u64) -> Result<(), ProgressError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProgressError("terminal closed".into()))
    }
}

#[tokio::test]
async fn test_progress_failures_do_not_abort() {
    let store = MemoryStore::new();
    let progress = Arc::new(BrokenProgress {
        calls: AtomicUsize::new(0),
    });

    importer(config("replace_all", 0), &store)
        .with_progress(progress.clone())
        .load_dataset(DATASET)
        .await
        .unwrap();
    assert_eq!(store.count_records(SAMPLE_DATASET_ID).await.unwrap(), 540);
    // start + one advance per batch + finish
    assert_eq!(progress.calls.load(Ordering::SeqCst), 13);
}

#[tokio::test]
async fn test_load_all_continues_past_failures() {
    let store = MemoryStore::new();
    let report = importer(config("replace_all", 0), &store).load_all().await;

    assert_eq!(report.imported.len(), 1);
    assert_eq!(report.imported[0].dataset_id, SAMPLE_DATASET_ID);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].dataset_id, 40199);
}

#[tokio::test]
async fn test_load_coordinates() {
    let store = MemoryStore::new();
    let reports = importer(config("replace_all", 0), &store)
        .load_coordinates()
        .await
        .unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].rows, 6);
    assert_eq!(store.count_coordinates(GridKind::Gcm).await.unwrap(), 6);
}
