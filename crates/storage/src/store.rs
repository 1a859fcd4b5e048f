//! Persistent store abstraction used by the sync engine.

use async_trait::async_trait;
use climate_common::{DatasetHeader, GridKind, StatisticRecord};

use crate::error::StoreResult;
use crate::schema::{CoordinateRow, StatisticRow};

/// A store of dataset headers, statistic rows and grid coordinates.
///
/// All writes go through a [`StoreTransaction`]; nothing is visible to
/// readers until the transaction commits.
#[async_trait]
pub trait StatisticStore: Send + Sync {
    /// Start a transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    async fn fetch_header(&self, dataset_id: i32) -> StoreResult<Option<DatasetHeader>>;

    /// All statistic rows of a dataset, ordered by key.
    async fn fetch_records(&self, dataset_id: i32) -> StoreResult<Vec<StatisticRow>>;

    async fn count_records(&self, dataset_id: i32) -> StoreResult<u64>;

    async fn count_coordinates(&self, grid: GridKind) -> StoreResult<u64>;
}

/// An open transaction. Dropping it without committing discards its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn delete_records(&mut self, dataset_id: i32) -> StoreResult<u64>;

    async fn delete_header(&mut self, dataset_id: i32) -> StoreResult<u64>;

    async fn insert_header(&mut self, header: &DatasetHeader) -> StoreResult<()>;

    /// Insert the header or overwrite the descriptive fields of an existing one.
    async fn upsert_header(&mut self, header: &DatasetHeader) -> StoreResult<()>;

    /// Plain insert; a key that already exists is a constraint violation.
    async fn insert_records(&mut self, records: &[StatisticRecord]) -> StoreResult<u64>;

    /// Insert or update by `key_columns`, which must name statistics columns.
    async fn upsert_records(
        &mut self,
        records: &[StatisticRecord],
        key_columns: &[&str],
    ) -> StoreResult<u64>;

    /// Replace every coordinate of `grid` with `rows`.
    async fn replace_coordinates(
        &mut self,
        grid: GridKind,
        rows: &[CoordinateRow],
    ) -> StoreResult<u64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
