//! PostgreSQL statistic store.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use climate_common::{DatasetHeader, GridKind, StatisticRecord};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::schema::{
    validate_columns, CoordinateRow, DatasetRow, StatisticRow, SCHEMA_SQL, STATISTIC_COLUMNS,
};
use crate::store::{StatisticStore, StoreTransaction};

/// Rows per multi-row INSERT. Twelve binds per row stays under the
/// protocol limit of 65535 parameters.
const ROWS_PER_STATEMENT: usize = 5000;

const SCRATCH_TABLE: &str = "pf_statistics_scratch";

/// Where to connect: a `postgres://` URL or options assembled field by field.
#[derive(Debug, Clone)]
pub enum PgTarget {
    Url(String),
    Options(PgConnectOptions),
}

/// Connection settings for [`PgStore`].
#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    pub target: PgTarget,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Log every statement at debug level under the `sqlx::query` target.
    pub log_sql: bool,
}

impl PgStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_target(PgTarget::Url(url.into()))
    }

    pub fn from_options(options: PgConnectOptions) -> Self {
        Self::with_target(PgTarget::Options(options))
    }

    fn with_target(target: PgTarget) -> Self {
        Self {
            target,
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
            log_sql: false,
        }
    }
}

/// Statistic store backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &PgStoreConfig) -> StoreResult<Self> {
        let mut options = match &config.target {
            PgTarget::Url(url) => PgConnectOptions::from_str(url)
                .map_err(|e| StoreError::Configuration(e.to_string()))?,
            PgTarget::Options(options) => options.clone(),
        };
        if !config.log_sql {
            options = options.disable_statement_logging();
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(&self.pool).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StatisticStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn fetch_header(&self, dataset_id: i32) -> StoreResult<Option<DatasetHeader>> {
        let row = sqlx::query_as::<_, DatasetRow>(
            "SELECT id, name, slug, description, parent_category, sub_category, model, unit \
             FROM pf_datasets WHERE id = $1",
        )
        .bind(dataset_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DatasetHeader::try_from)
            .transpose()
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    async fn fetch_records(&self, dataset_id: i32) -> StoreResult<Vec<StatisticRow>> {
        let rows = sqlx::query_as::<_, StatisticRow>(
            "SELECT dataset_id, coordinate_hash, warming_scenario, \
             pctl10::text AS pctl10, mean::text AS mean, pctl90::text AS pctl90, \
             low_value::text AS low_value, mid_value::text AS mid_value, \
             high_value::text AS high_value, value_list::text[] AS value_list, \
             x::text[] AS x, y::text[] AS y \
             FROM pf_dataset_statistics WHERE dataset_id = $1 \
             ORDER BY coordinate_hash COLLATE \"C\", warming_scenario COLLATE \"C\"",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_records(&self, dataset_id: i32) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM pf_dataset_statistics WHERE dataset_id = $1",
        )
        .bind(dataset_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn count_coordinates(&self, grid: GridKind) -> StoreResult<u64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pf_grid_coordinates WHERE grid = $1")
                .bind(grid.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

/// An open PostgreSQL transaction.
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgStoreTransaction {
    async fn insert_rows(&mut self, table: &str, rows: &[StatisticRow]) -> StoreResult<u64> {
        let mut affected = 0;
        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                table,
                STATISTIC_COLUMNS.join(", ")
            ));
            push_statistic_values(&mut qb, chunk);
            affected += qb.build().execute(&mut *self.tx).await?.rows_affected();
        }
        Ok(affected)
    }

    async fn write_header(&mut self, header: &DatasetHeader, upsert: bool) -> StoreResult<()> {
        let row = DatasetRow::from(header);
        let mut sql = String::from(
            "INSERT INTO pf_datasets \
             (id, name, slug, description, parent_category, sub_category, model, unit) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        );
        if upsert {
            sql.push_str(
                " ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, slug = EXCLUDED.slug, \
                 description = EXCLUDED.description, parent_category = EXCLUDED.parent_category, \
                 sub_category = EXCLUDED.sub_category, model = EXCLUDED.model, \
                 unit = EXCLUDED.unit",
            );
        }

        sqlx::query(&sql)
            .bind(row.id)
            .bind(row.name)
            .bind(row.slug)
            .bind(row.description)
            .bind(row.parent_category)
            .bind(row.sub_category)
            .bind(row.model)
            .bind(row.unit)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

fn push_statistic_values(qb: &mut QueryBuilder<'_, Postgres>, rows: &[StatisticRow]) {
    qb.push_values(rows, |mut b, row| {
        b.push_bind(row.dataset_id)
            .push_bind(row.coordinate_hash.clone())
            .push_bind(row.warming_scenario.clone());
        for value in [
            &row.pctl10,
            &row.mean,
            &row.pctl90,
            &row.low_value,
            &row.mid_value,
            &row.high_value,
        ] {
            b.push_bind(value.clone());
            b.push_unseparated("::numeric");
        }
        b.push_bind(row.value_list.clone());
        b.push_unseparated("::numeric[]");
        for values in [&row.x, &row.y] {
            b.push_bind(values.clone());
            b.push_unseparated("::numeric[]");
        }
    });
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn delete_records(&mut self, dataset_id: i32) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM pf_dataset_statistics WHERE dataset_id = $1")
            .bind(dataset_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_header(&mut self, dataset_id: i32) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM pf_datasets WHERE id = $1")
            .bind(dataset_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_header(&mut self, header: &DatasetHeader) -> StoreResult<()> {
        self.write_header(header, false).await
    }

    async fn upsert_header(&mut self, header: &DatasetHeader) -> StoreResult<()> {
        self.write_header(header, true).await
    }

    async fn insert_records(&mut self, records: &[StatisticRecord]) -> StoreResult<u64> {
        let rows: Vec<StatisticRow> = records.iter().map(StatisticRow::from).collect();
        let inserted = self.insert_rows("pf_dataset_statistics", &rows).await?;
        debug!(rows = inserted, "Inserted statistics");
        Ok(inserted)
    }

    async fn upsert_records(
        &mut self,
        records: &[StatisticRecord],
        key_columns: &[&str],
    ) -> StoreResult<u64> {
        validate_columns(key_columns).map_err(StoreError::InvalidColumn)?;

        sqlx::query(&format!(
            "CREATE TEMPORARY TABLE IF NOT EXISTS {} \
             (LIKE pf_dataset_statistics INCLUDING DEFAULTS) ON COMMIT DROP",
            SCRATCH_TABLE
        ))
        .execute(&mut *self.tx)
        .await?;

        let rows: Vec<StatisticRow> = records.iter().map(StatisticRow::from).collect();
        self.insert_rows(SCRATCH_TABLE, &rows).await?;

        let columns = STATISTIC_COLUMNS.join(", ");
        let updates = STATISTIC_COLUMNS
            .iter()
            .filter(|c| !key_columns.contains(c))
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates)
        };

        let result = sqlx::query(&format!(
            "INSERT INTO pf_dataset_statistics ({columns}) \
             SELECT {columns} FROM {scratch} \
             ON CONFLICT ({keys}) {conflict}",
            columns = columns,
            scratch = SCRATCH_TABLE,
            keys = key_columns.join(", "),
            conflict = conflict,
        ))
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(&format!("TRUNCATE {}", SCRATCH_TABLE))
            .execute(&mut *self.tx)
            .await?;

        debug!(rows = result.rows_affected(), "Upserted statistics");
        Ok(result.rows_affected())
    }

    async fn replace_coordinates(
        &mut self,
        grid: GridKind,
        rows: &[CoordinateRow],
    ) -> StoreResult<u64> {
        let deleted = sqlx::query("DELETE FROM pf_grid_coordinates WHERE grid = $1")
            .bind(grid.as_str())
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        debug!(grid = %grid, deleted, "Cleared grid coordinates");

        let mut inserted = 0;
        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO pf_grid_coordinates (md5_hash, grid, lon, lat) ");
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.md5_hash.clone())
                    .push_bind(row.grid.as_str())
                    .push_bind(row.lon)
                    .push_bind(row.lat);
            });
            inserted += qb.build().execute(&mut *self.tx).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_per_statement_fits_bind_limit() {
        assert!(ROWS_PER_STATEMENT * STATISTIC_COLUMNS.len() <= u16::MAX as usize);
    }

    #[test]
    fn test_config_defaults() {
        let config = PgStoreConfig::new("postgres://localhost/pf");
        assert!(!config.log_sql);
        assert_eq!(config.max_connections, 4);
        assert!(matches!(config.target, PgTarget::Url(_)));
    }
}
