//! Storage for dataset headers, statistic rows and grid coordinates.
//!
//! Provides:
//! - [`StatisticStore`] and [`StoreTransaction`], the transactional seam used
//!   by the sync engine
//! - [`PgStore`] for PostgreSQL
//! - [`MemoryStore`] for dry runs and tests

pub mod error;
pub mod memory;
pub mod postgres;
pub mod schema;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, MemoryTransaction};
pub use postgres::{PgStore, PgStoreConfig, PgStoreTransaction, PgTarget};
pub use schema::{
    validate_columns, CoordinateRow, DatasetRow, StatisticRow, KEY_COLUMNS, SCHEMA_SQL,
    STATISTIC_COLUMNS,
};
pub use store::{StatisticStore, StoreTransaction};
