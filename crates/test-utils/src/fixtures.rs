//! Import configuration fixtures.

use std::io::Write;
use tempfile::NamedTempFile;

/// Dataset id used by the fixtures and by [`crate::synthetic_source`].
pub const SAMPLE_DATASET_ID: i32 = 40101;

/// Configuration with one GCM grid and two datasets over the synthetic grid:
/// a mean/percentile dataset (40101) and a curve dataset (40102).
pub const SAMPLE_CONFIG_YAML: &str = r#"
grids:
  - kind: GCM
    lon: [-10.0, -9.5, -9.0]
    lat: [40.0, 40.5]

sync:
  batch_size: 100
  protocol: replace_all
  max_batch_retries: 2
  build_chunk_size: 64

datasets:
  - id: 40101
    filename: ${PF_TEST_DATA_DIR:-/tmp}/mean_temp.nc
    slug: change-in-average-temperature
    name: Change in average temperature
    parent_category: Heat
    model: globalREMO
    unit: "°C"
    grid: GCM
    dimensions: [lon, lat, warming_levels]
    shape:
      type: mean_percentiles
      mean: mean
      pctl10: pctl10
      pctl90: pctl90

  - id: 40102
    filename: ${PF_TEST_DATA_DIR:-/tmp}/hot_days_cdf.nc
    slug: likelihood-of-hot-days
    name: Likelihood of hot days
    parent_category: Heat
    unit: days
    grid: GCM
    dimensions: [lon, lat, warming_levels]
    null_policy: all
    shape:
      type: curve
      x: [mean, pctl10]
      y: [pctl90, pctl90]
"#;

/// Write `contents` to a temporary `.yaml` file that lives as long as the handle.
pub fn write_temp_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temporary config file");
    file.write_all(contents.as_bytes())
        .expect("Failed to write temporary config file");
    file
}
