//! Grid coordinate loading.
//!
//! Every grid kind gets the cartesian product of its longitudes and
//! latitudes, keyed by fingerprint. A grid is replaced in a single
//! transaction, so readers see either the old or the new lattice.

use std::collections::HashSet;
use std::path::Path;

use climate_common::GridKind;
use grid_transform::fingerprint;
use serde::Serialize;
use storage::{CoordinateRow, StatisticStore, StoreTransaction};
use tracing::{info, instrument, warn};

use crate::config::GridConfig;
use crate::error::{IngestionError, Result};
use crate::importer::Importer;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinateReport {
    pub grid: GridKind,
    pub rows: u64,
    /// Lattice points whose fingerprint repeats an earlier point.
    pub duplicates: u64,
}

/// Fingerprinted lattice points, longitude outermost. Points that round to
/// an already seen fingerprint are dropped.
pub fn coordinate_rows(kind: GridKind, lons: &[f64], lats: &[f64]) -> (Vec<CoordinateRow>, u64) {
    let mut seen = HashSet::with_capacity(lons.len() * lats.len());
    let mut rows = Vec::with_capacity(lons.len() * lats.len());
    let mut duplicates = 0;
    for &lon in lons {
        for &lat in lats {
            let fp = fingerprint(kind, lon, lat);
            if seen.insert(fp.hash.clone()) {
                rows.push(CoordinateRow {
                    md5_hash: fp.hash,
                    grid: kind,
                    lon,
                    lat,
                });
            } else {
                duplicates += 1;
            }
        }
    }
    (rows, duplicates)
}

impl Importer {
    /// Replace the coordinates of every configured grid.
    pub async fn load_coordinates(&self) -> Result<Vec<CoordinateReport>> {
        let mut reports = Vec::with_capacity(self.config().grids.len());
        for grid in &self.config().grids {
            if self.cancellation().is_cancelled() {
                warn!("Coordinate load cancelled");
                break;
            }
            reports.push(self.load_grid(grid).await?);
        }
        Ok(reports)
    }

    #[instrument(skip_all, fields(grid = %grid.kind))]
    async fn load_grid(&self, grid: &GridConfig) -> Result<CoordinateReport> {
        let (lons, lats) = grid_axes(grid).await?;
        let kind = grid.kind;
        let (rows, duplicates) =
            tokio::task::spawn_blocking(move || coordinate_rows(kind, &lons, &lats))
                .await
                .map_err(|e| IngestionError::Worker(e.to_string()))?;
        if duplicates > 0 {
            warn!(duplicates, "Lattice points share a fingerprint; keeping the first");
        }

        let mut tx = self.store().begin().await?;
        match tx.replace_coordinates(kind, &rows).await {
            Ok(written) => {
                tx.commit().await?;
                info!(rows = written, "Loaded grid coordinates");
                Ok(CoordinateReport {
                    grid: kind,
                    rows: written,
                    duplicates,
                })
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e.into())
            }
        }
    }
}

async fn grid_axes(grid: &GridConfig) -> Result<(Vec<f64>, Vec<f64>)> {
    if !grid.lon.is_empty() && !grid.lat.is_empty() {
        return Ok((grid.lon.clone(), grid.lat.clone()));
    }
    let filename = grid.filename.clone().ok_or_else(|| {
        IngestionError::InvalidConfig(format!("grid {} has no coordinates", grid.kind))
    })?;
    let names = [grid.lon_name.clone(), grid.lat_name.clone()];

    let mut axes = tokio::task::spawn_blocking(move || {
        netcdf_parser::read_axes(Path::new(&filename), &[names[0].as_str(), names[1].as_str()])
    })
    .await
    .map_err(|e| IngestionError::Worker(e.to_string()))??;

    match (axes.pop(), axes.pop()) {
        (Some(lats), Some(lons)) => Ok((lons, lats)),
        _ => Err(IngestionError::InvalidConfig(format!(
            "grid {} axes could not be read",
            grid.kind
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cartesian_product() {
        let (rows, duplicates) = coordinate_rows(GridKind::Gcm, &[0.0, 0.5, 1.0], &[10.0, 10.5]);
        assert_eq!(rows.len(), 6);
        assert_eq!(duplicates, 0);
        assert_eq!((rows[1].lon, rows[1].lat), (0.0, 10.5));
        assert_eq!(rows[0].md5_hash, fingerprint(GridKind::Gcm, 0.0, 10.0).hash);
    }

    #[test]
    fn test_signed_zero_is_one_point() {
        let (rows, duplicates) = coordinate_rows(GridKind::Rcm, &[0.0, -0.0], &[0.0]);
        assert_eq!(rows.len(), 1);
        assert_eq!(duplicates, 1);
        assert_eq!(rows[0].md5_hash, "db356f9eaed9882d671f847c08dc745b");
    }
}
