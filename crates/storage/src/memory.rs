//! In-memory statistic store for dry runs and tests.
//!
//! Each transaction works on a snapshot taken at `begin` and publishes the
//! datasets and grids it touched on `commit`. Datasets are copied on first
//! write, so untouched datasets are shared between snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use climate_common::{DatasetHeader, GridKind, StatisticRecord};
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::schema::{validate_columns, CoordinateRow, StatisticRow, KEY_COLUMNS};
use crate::store::{StatisticStore, StoreTransaction};

#[derive(Debug, Default, Clone)]
struct DatasetState {
    header: Option<DatasetHeader>,
    records: BTreeMap<(String, String), StatisticRow>,
}

impl DatasetState {
    fn is_empty(&self) -> bool {
        self.header.is_none() && self.records.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
struct Snapshot {
    datasets: BTreeMap<i32, Arc<DatasetState>>,
    coordinates: BTreeMap<GridKind, Arc<Vec<CoordinateRow>>>,
}

/// Makes record writes fail with a transient error.
#[derive(Debug, Default)]
struct FaultPlan {
    /// Record writes that still succeed before failures start.
    skip: usize,
    /// Record writes that fail once failures start.
    remaining: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Snapshot>>,
    faults: Arc<std::sync::Mutex<FaultPlan>>,
    commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `after` record writes succeed, then fail the next `times` writes
    /// with [`StoreError::Injected`].
    pub fn fail_writes(&self, after: usize, times: usize) {
        let mut plan = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        plan.skip = after;
        plan.remaining = times;
    }

    /// Number of committed transactions.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub async fn coordinates(&self, grid: GridKind) -> Vec<CoordinateRow> {
        let shared = self.shared.lock().await;
        shared
            .coordinates
            .get(&grid)
            .map(|rows| rows.as_ref().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StatisticStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let working = self.shared.lock().await.clone();
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            working,
            touched: BTreeSet::new(),
            touched_grids: BTreeSet::new(),
        }))
    }

    async fn fetch_header(&self, dataset_id: i32) -> StoreResult<Option<DatasetHeader>> {
        let shared = self.shared.lock().await;
        Ok(shared
            .datasets
            .get(&dataset_id)
            .and_then(|d| d.header.clone()))
    }

    async fn fetch_records(&self, dataset_id: i32) -> StoreResult<Vec<StatisticRow>> {
        let shared = self.shared.lock().await;
        Ok(shared
            .datasets
            .get(&dataset_id)
            .map(|d| d.records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn count_records(&self, dataset_id: i32) -> StoreResult<u64> {
        let shared = self.shared.lock().await;
        Ok(shared
            .datasets
            .get(&dataset_id)
            .map(|d| d.records.len() as u64)
            .unwrap_or(0))
    }

    async fn count_coordinates(&self, grid: GridKind) -> StoreResult<u64> {
        let shared = self.shared.lock().await;
        Ok(shared
            .coordinates
            .get(&grid)
            .map(|rows| rows.len() as u64)
            .unwrap_or(0))
    }
}

pub struct MemoryTransaction {
    store: MemoryStore,
    working: Snapshot,
    touched: BTreeSet<i32>,
    touched_grids: BTreeSet<GridKind>,
}

impl MemoryTransaction {
    fn dataset_mut(&mut self, dataset_id: i32) -> &mut DatasetState {
        self.touched.insert(dataset_id);
        Arc::make_mut(self.working.datasets.entry(dataset_id).or_default())
    }

    fn check_fault(&self) -> StoreResult<()> {
        let mut plan = self
            .store
            .faults
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if plan.skip > 0 {
            plan.skip -= 1;
            return Ok(());
        }
        if plan.remaining > 0 {
            plan.remaining -= 1;
            return Err(StoreError::Injected("record write failed".to_string()));
        }
        Ok(())
    }

    fn write_records(&mut self, records: &[StatisticRecord], upsert: bool) -> StoreResult<u64> {
        self.check_fault()?;
        for record in records {
            let row = StatisticRow::from(record);
            let dataset = self.dataset_mut(record.dataset_id);
            if dataset.header.is_none() {
                return Err(StoreError::Constraint(format!(
                    "dataset {} has no header",
                    record.dataset_id
                )));
            }
            let key = (row.coordinate_hash.clone(), row.warming_scenario.clone());
            if !upsert && dataset.records.contains_key(&key) {
                return Err(StoreError::Constraint(format!(
                    "duplicate statistic ({}, {}, {})",
                    record.dataset_id, key.0, key.1
                )));
            }
            dataset.records.insert(key, row);
        }
        Ok(records.len() as u64)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn delete_records(&mut self, dataset_id: i32) -> StoreResult<u64> {
        let dataset = self.dataset_mut(dataset_id);
        let deleted = dataset.records.len() as u64;
        dataset.records.clear();
        Ok(deleted)
    }

    async fn delete_header(&mut self, dataset_id: i32) -> StoreResult<u64> {
        let dataset = self.dataset_mut(dataset_id);
        if !dataset.records.is_empty() {
            return Err(StoreError::Constraint(format!(
                "dataset {} still has statistics",
                dataset_id
            )));
        }
        Ok(u64::from(dataset.header.take().is_some()))
    }

    async fn insert_header(&mut self, header: &DatasetHeader) -> StoreResult<()> {
        let dataset = self.dataset_mut(header.id);
        if dataset.header.is_some() {
            return Err(StoreError::Constraint(format!(
                "dataset {} already exists",
                header.id
            )));
        }
        dataset.header = Some(header.clone());
        Ok(())
    }

    async fn upsert_header(&mut self, header: &DatasetHeader) -> StoreResult<()> {
        self.dataset_mut(header.id).header = Some(header.clone());
        Ok(())
    }

    async fn insert_records(&mut self, records: &[StatisticRecord]) -> StoreResult<u64> {
        self.write_records(records, false)
    }

    async fn upsert_records(
        &mut self,
        records: &[StatisticRecord],
        key_columns: &[&str],
    ) -> StoreResult<u64> {
        validate_columns(key_columns).map_err(StoreError::InvalidColumn)?;
        let keys: BTreeSet<&str> = key_columns.iter().copied().collect();
        let primary: BTreeSet<&str> = KEY_COLUMNS.iter().copied().collect();
        if keys != primary {
            return Err(StoreError::Constraint(format!(
                "no unique constraint matches ({})",
                key_columns.join(", ")
            )));
        }
        self.write_records(records, true)
    }

    async fn replace_coordinates(
        &mut self,
        grid: GridKind,
        rows: &[CoordinateRow],
    ) -> StoreResult<u64> {
        self.touched_grids.insert(grid);
        self.working.coordinates.insert(grid, Arc::new(rows.to_vec()));
        Ok(rows.len() as u64)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            store,
            mut working,
            touched,
            touched_grids,
        } = *self;

        let mut shared = store.shared.lock().await;
        for id in touched {
            match working.datasets.remove(&id) {
                Some(dataset) if !dataset.is_empty() => {
                    shared.datasets.insert(id, dataset);
                }
                _ => {
                    shared.datasets.remove(&id);
                }
            }
        }
        for grid in touched_grids {
            if let Some(rows) = working.coordinates.remove(&grid) {
                shared.coordinates.insert(grid, rows);
            }
        }
        store.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use climate_common::{NormalizedValue, StatisticValues, Unit};

    fn header(id: i32) -> DatasetHeader {
        DatasetHeader {
            id,
            name: "Change in average temperature".into(),
            slug: "change-in-average-temperature".into(),
            description: None,
            parent_category: Some("Heat".into()),
            sub_category: None,
            model: Some("global REMO".into()),
            unit: Unit::DegreesCelsius,
        }
    }

    fn record(id: i32, hash: &str, mean: &str) -> StatisticRecord {
        StatisticRecord {
            dataset_id: id,
            coordinate_hash: hash.into(),
            warming_scenario: "1.5".into(),
            values: StatisticValues::MeanPercentiles {
                mean: Some(NormalizedValue::Decimal(mean.into())),
                pctl10: None,
                pctl90: None,
            },
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_header(&header(1)).await.unwrap();
        tx.insert_records(&[record(1, "a", "1.0")]).await.unwrap();
        assert_eq!(store.count_records(1).await.unwrap(), 0);

        tx.rollback().await.unwrap();
        assert_eq!(store.count_records(1).await.unwrap(), 0);
        assert!(store.fetch_header(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_requires_header_and_unique_key() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_records(&[record(1, "a", "1.0")]).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));

        tx.insert_header(&header(1)).await.unwrap();
        tx.insert_records(&[record(1, "a", "1.0")]).await.unwrap();
        let err = tx.insert_records(&[record(1, "a", "2.0")]).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_header(&header(1)).await.unwrap();
        tx.upsert_records(&[record(1, "a", "1.0")], &KEY_COLUMNS).await.unwrap();
        tx.upsert_records(&[record(1, "a", "2.0"), record(1, "b", "3.0")], &KEY_COLUMNS)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let rows = store.fetch_records(1).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].mean.as_deref(), Some("2.0"));
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_upsert_rejects_unknown_columns() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .upsert_records(&[record(1, "a", "1.0")], &["dataset_id", "md5"])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidColumn(c) if c == "md5"));
    }

    #[tokio::test]
    async fn test_fault_plan() {
        let store = MemoryStore::new();
        store.fail_writes(1, 1);
        let mut tx = store.begin().await.unwrap();
        tx.upsert_header(&header(1)).await.unwrap();
        tx.insert_records(&[record(1, "a", "1.0")]).await.unwrap();
        let err = tx.insert_records(&[record(1, "b", "1.0")]).await.unwrap_err();
        assert!(err.is_transient());
        tx.insert_records(&[record(1, "b", "1.0")]).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_header_with_records_fails() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_header(&header(1)).await.unwrap();
        tx.insert_records(&[record(1, "a", "1.0")]).await.unwrap();
        assert!(tx.delete_header(1).await.is_err());
        assert_eq!(tx.delete_records(1).await.unwrap(), 1);
        assert_eq!(tx.delete_header(1).await.unwrap(), 1);
    }
}
