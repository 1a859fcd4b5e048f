//! Writes the records of one dataset to a [`StatisticStore`].
//!
//! Two protocols are supported:
//!
//! - **Replace-all**: delete the dataset's records and header, insert the new
//!   header and every record, all inside one transaction. A failure at any
//!   point leaves the previous import untouched and the dataset has to be
//!   redone from scratch.
//! - **Merge-by-key**: upsert the header, then upsert each batch in its own
//!   transaction keyed by (dataset_id, coordinate_hash, warming_scenario).
//!   Batches are idempotent, transient failures are retried, and a failed
//!   run can resume from the batch that failed.
//!
//! Records arrive as a [`RecordStream`] and are regrouped into batches of
//! `batch_size`. Batch boundaries depend only on record order, which the
//! import pipeline keeps deterministic, so batch numbers are stable between
//! runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use climate_common::{DatasetHeader, StatisticRecord};
use serde::{Deserialize, Serialize};
use storage::{StatisticStore, StoreResult, StoreTransaction, KEY_COLUMNS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{IngestionError, Result};
use crate::progress::{NoopProgress, ProgressError, ProgressSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncProtocol {
    #[default]
    ReplaceAll,
    MergeByKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    /// Writes are in progress.
    Staged,
    Committed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub protocol: SyncProtocol,
    pub batch_size: usize,
    /// Extra attempts per merge batch on transient store errors.
    pub max_batch_retries: u32,
    /// Delay before retry `n` is `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// Merge batches below this number are assumed committed and skipped.
    pub resume_from_batch: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            protocol: SyncProtocol::default(),
            batch_size: 1000,
            max_batch_retries: 3,
            retry_backoff: Duration::from_millis(200),
            resume_from_batch: 0,
        }
    }
}

/// Counts for one dataset import.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub dataset_id: i32,
    pub protocol: SyncProtocol,
    pub dry_run: bool,
    pub rows_flattened: u64,
    pub rows_dropped: u64,
    pub rows_skipped: u64,
    pub records_built: u64,
    pub records_written: u64,
    pub batches_committed: usize,
    pub batches_skipped: usize,
    pub retries: u32,
}

/// A source of record chunks. Chunk sizes are arbitrary.
#[async_trait]
pub trait RecordStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<StatisticRecord>>>;
}

#[async_trait]
impl RecordStream for mpsc::Receiver<Result<Vec<StatisticRecord>>> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<StatisticRecord>>> {
        self.recv().await.transpose()
    }
}

#[async_trait]
impl RecordStream for Vec<StatisticRecord> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<StatisticRecord>>> {
        if self.is_empty() {
            Ok(None)
        } else {
            Ok(Some(std::mem::take(self)))
        }
    }
}

/// Regroups a stream into batches of a fixed size; the last may be shorter.
struct Batches<'s, S: ?Sized> {
    stream: &'s mut S,
    pending: Vec<StatisticRecord>,
    size: usize,
    exhausted: bool,
}

impl<'s, S: RecordStream + ?Sized> Batches<'s, S> {
    fn new(stream: &'s mut S, size: usize) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            size: size.max(1),
            exhausted: false,
        }
    }

    async fn next(&mut self) -> Result<Option<Vec<StatisticRecord>>> {
        while !self.exhausted && self.pending.len() < self.size {
            match self.stream.next_chunk().await? {
                Some(chunk) => self.pending.extend(chunk),
                None => self.exhausted = true,
            }
        }
        if self.pending.is_empty() {
            return Ok(None);
        }
        let rest = self.pending.split_off(self.size.min(self.pending.len()));
        Ok(Some(std::mem::replace(&mut self.pending, rest)))
    }
}

/// Single-writer sync of one dataset at a time.
pub struct SyncEngine {
    store: Arc<dyn StatisticStore>,
    options: SyncOptions,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    state: SyncState,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn StatisticStore>, options: SyncOptions) -> Self {
        Self {
            store,
            options,
            progress: Arc::new(NoopProgress),
            cancel: CancellationToken::new(),
            state: SyncState::Idle,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Stop between batches once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Write `header` and every record of `records`.
    ///
    /// `total` is the expected record count, used for progress only.
    #[instrument(skip_all, fields(dataset_id = header.id, protocol = ?self.options.protocol))]
    pub async fn sync<S: RecordStream + ?Sized>(
        &mut self,
        header: &DatasetHeader,
        records: &mut S,
        total: Option<u64>,
    ) -> Result<SyncReport> {
        self.state = SyncState::Idle;
        let mut report = SyncReport {
            dataset_id: header.id,
            protocol: self.options.protocol,
            ..Default::default()
        };
        self.notify(header.id, |p| p.start(header.id, total));

        let result = match self.options.protocol {
            SyncProtocol::ReplaceAll => self.replace_all(header, records, &mut report).await,
            SyncProtocol::MergeByKey => self.merge_by_key(header, records, &mut report).await,
        };

        match result {
            Ok(()) => {
                self.state = SyncState::Committed;
                self.notify(header.id, |p| p.finish(header.id, report.records_written));
                info!(
                    records = report.records_written,
                    batches = report.batches_committed,
                    skipped_batches = report.batches_skipped,
                    retries = report.retries,
                    "Dataset synchronized"
                );
                Ok(report)
            }
            Err(e) => {
                self.state = SyncState::Failed;
                Err(e)
            }
        }
    }

    fn notify(
        &self,
        dataset_id: i32,
        call: impl FnOnce(&dyn ProgressSink) -> std::result::Result<(), ProgressError>,
    ) {
        if let Err(e) = call(self.progress.as_ref()) {
            warn!(dataset_id, error = %e, "Progress reporting failed");
        }
    }

    fn check_cancelled(&self, dataset_id: i32, next_batch: usize) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(IngestionError::Cancelled {
                dataset_id,
                protocol: self.options.protocol,
                next_batch,
            });
        }
        Ok(())
    }

    async fn replace_all<S: RecordStream + ?Sized>(
        &mut self,
        header: &DatasetHeader,
        records: &mut S,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut tx = self.store.begin().await?;
        self.state = SyncState::Staged;

        match self.replace_all_in(&mut tx, header, records, report).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(dataset_id = header.id, error = %rollback, "Rollback failed");
                }
                warn!(
                    dataset_id = header.id,
                    error = %e,
                    "Replace-all import rolled back; the dataset must be re-imported"
                );
                Err(e)
            }
        }
    }

    async fn replace_all_in<S: RecordStream + ?Sized>(
        &self,
        tx: &mut Box<dyn StoreTransaction>,
        header: &DatasetHeader,
        records: &mut S,
        report: &mut SyncReport,
    ) -> Result<()> {
        let dataset_id = header.id;
        let deleted = tx.delete_records(dataset_id).await?;
        tx.delete_header(dataset_id).await?;
        tx.insert_header(header).await?;
        debug!(dataset_id, deleted, "Cleared previous import");

        let mut batches = Batches::new(records, self.options.batch_size);
        let mut index = 0;
        while let Some(batch) = batches.next().await? {
            self.check_cancelled(dataset_id, index)?;
            let written =
                tx.insert_records(&batch)
                    .await
                    .map_err(|source| IngestionError::BatchFailed {
                        dataset_id,
                        protocol: SyncProtocol::ReplaceAll,
                        batch: index,
                        attempts: 1,
                        source,
                    })?;
            report.records_written += written;
            report.batches_committed += 1;
            self.notify(dataset_id, |p| p.advance(dataset_id, report.records_written));
            index += 1;
        }
        // A producer stopped by cancellation ends the stream early.
        self.check_cancelled(dataset_id, index)
    }

    async fn merge_by_key<S: RecordStream + ?Sized>(
        &mut self,
        header: &DatasetHeader,
        records: &mut S,
        report: &mut SyncReport,
    ) -> Result<()> {
        let dataset_id = header.id;
        let resume = self.options.resume_from_batch;
        if resume > 0 {
            info!(dataset_id, resume_from_batch = resume, "Resuming merge import");
        }

        self.commit_with_retries(dataset_id, resume, Some(header), &[], report)
            .await?;
        self.state = SyncState::Staged;

        let mut batches = Batches::new(records, self.options.batch_size);
        let mut index = 0;
        while let Some(batch) = batches.next().await? {
            if index < resume {
                report.batches_skipped += 1;
                index += 1;
                continue;
            }
            self.check_cancelled(dataset_id, index)?;
            let written = self
                .commit_with_retries(dataset_id, index, None, &batch, report)
                .await?;
            report.records_written += written;
            report.batches_committed += 1;
            debug!(dataset_id, batch = index, written, "Committed batch");
            self.notify(dataset_id, |p| p.advance(dataset_id, report.records_written));
            index += 1;
        }
        self.check_cancelled(dataset_id, index)
    }

    async fn commit_with_retries(
        &self,
        dataset_id: i32,
        batch_index: usize,
        header: Option<&DatasetHeader>,
        batch: &[StatisticRecord],
        report: &mut SyncReport,
    ) -> Result<u64> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.commit_batch(header, batch).await {
                Ok(written) => return Ok(written),
                Err(e) if e.is_transient() && attempts <= self.options.max_batch_retries => {
                    warn!(
                        dataset_id,
                        batch = batch_index,
                        attempt = attempts,
                        error = %e,
                        "Retrying batch"
                    );
                    report.retries += 1;
                    if !self.options.retry_backoff.is_zero() {
                        tokio::time::sleep(self.options.retry_backoff * attempts).await;
                    }
                }
                Err(source) => {
                    return Err(IngestionError::BatchFailed {
                        dataset_id,
                        protocol: SyncProtocol::MergeByKey,
                        batch: batch_index,
                        attempts,
                        source,
                    })
                }
            }
        }
    }

    /// One merge transaction: optional header upsert plus a keyed upsert.
    async fn commit_batch(
        &self,
        header: Option<&DatasetHeader>,
        batch: &[StatisticRecord],
    ) -> StoreResult<u64> {
        let mut tx = self.store.begin().await?;
        let result: StoreResult<u64> = async {
            if let Some(header) = header {
                tx.upsert_header(header).await?;
            }
            if batch.is_empty() {
                Ok(0)
            } else {
                tx.upsert_records(batch, &KEY_COLUMNS).await
            }
        }
        .await;

        match result {
            Ok(written) => {
                tx.commit().await?;
                Ok(written)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    debug!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("options", &self.options)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use climate_common::{NormalizedValue, StatisticValues};

    fn record(n: usize) -> StatisticRecord {
        StatisticRecord {
            dataset_id: 1,
            coordinate_hash: format!("{:04}", n),
            warming_scenario: "1.5".into(),
            values: StatisticValues::Ladder {
                values: vec![Some(NormalizedValue::Integer(n as i64))],
            },
        }
    }

    struct Chunks(Vec<Vec<StatisticRecord>>);

    #[async_trait]
    impl RecordStream for Chunks {
        async fn next_chunk(&mut self) -> Result<Option<Vec<StatisticRecord>>> {
            if self.0.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.0.remove(0)))
            }
        }
    }

    #[tokio::test]
    async fn test_batches_regroup_chunks() {
        let mut stream = Chunks(vec![
            (0..3).map(record).collect(),
            vec![],
            (3..10).map(record).collect(),
        ]);
        let mut batches = Batches::new(&mut stream, 4);
        let mut sizes = Vec::new();
        let mut first = Vec::new();
        while let Some(batch) = batches.next().await.unwrap() {
            sizes.push(batch.len());
            first.push(batch[0].coordinate_hash.clone());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(first, vec!["0000", "0004", "0008"]);
    }

    #[tokio::test]
    async fn test_vec_stream_yields_once() {
        let mut stream: Vec<StatisticRecord> = (0..3).map(record).collect();
        assert_eq!(stream.next_chunk().await.unwrap().map(|c| c.len()), Some(3));
        assert!(stream.next_chunk().await.unwrap().is_none());
    }

    #[test]
    fn test_protocol_names() {
        let protocol: SyncProtocol = serde_yaml::from_str("merge_by_key").unwrap();
        assert_eq!(protocol, SyncProtocol::MergeByKey);
        assert_eq!(SyncProtocol::default(), SyncProtocol::ReplaceAll);
    }
}
