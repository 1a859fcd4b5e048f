//! Synthetic climate grids with predictable values and null patterns.

use climate_common::{Dimension, GlobalAttributes, GridSource, GridSpec, VariableBuffer};

/// Warming levels used by the synthetic grids.
pub const WARMING_LEVELS: [f64; 6] = [0.5, 1.0, 1.5, 2.0, 2.5, 3.0];

/// A `lon x lat x warming_levels` lattice on a half-degree spacing.
///
/// Longitudes start at -10.0 and latitudes at 40.0.
pub fn warming_grid(n_lon: usize, n_lat: usize, levels: &[f64]) -> GridSpec {
    GridSpec::new(vec![
        Dimension::new("lon", (0..n_lon).map(|i| -10.0 + i as f64 * 0.5).collect::<Vec<_>>()),
        Dimension::new("lat", (0..n_lat).map(|j| 40.0 + j as f64 * 0.5).collect::<Vec<_>>()),
        Dimension::new("warming_levels", levels.to_vec()),
    ])
}

/// A grid source with `mean`, `pctl10` and `pctl90` variables.
///
/// Every `null_every`-th cell (starting at cell 0) is missing in all three
/// variables, so a 10x10x6 grid with `null_every = 10` keeps 540 rows.
/// The mean at cell `p` is `20 + p / 100`.
///
/// # Example
///
/// ```
/// use test_utils::synthetic_source;
///
/// let source = synthetic_source(10, 10, 10);
/// assert_eq!(source.variables[0].samples.len(), 600);
/// assert!(source.variables[0].samples[0].is_nan());
/// assert_eq!(source.variables[0].samples[1], 20.01);
/// ```
pub fn synthetic_source(n_lon: usize, n_lat: usize, null_every: usize) -> GridSource {
    let spec = warming_grid(n_lon, n_lat, &WARMING_LEVELS);
    let cells = n_lon * n_lat * WARMING_LEVELS.len();
    let null_at = |p: usize| null_every > 0 && p % null_every == 0;

    let variable = |name: &str, offset: f64| {
        let samples = (0..cells)
            .map(|p| {
                if null_at(p) {
                    f64::NAN
                } else {
                    20.0 + offset + p as f64 / 100.0
                }
            })
            .collect();
        VariableBuffer::new(name, samples)
    };

    GridSource {
        spec,
        variables: vec![
            variable("mean", 0.0),
            variable("pctl10", -1.5),
            variable("pctl90", 1.5),
        ],
        attributes: GlobalAttributes {
            id: Some(40101),
            title: Some("Average temperature".to_string()),
            description: Some("Synthetic mean temperature".to_string()),
            category: Some("Heat".to_string()),
            model: Some("globalREMO".to_string()),
            unit: Some("°C".to_string()),
        },
    }
}

/// Rearrange a source's dimensions into `order`, permuting every buffer so
/// that each cell keeps its coordinates and values.
pub fn reorder_source(source: &GridSource, order: &[usize]) -> GridSource {
    let old_dims = source.spec.dimensions();
    let spec = source
        .spec
        .reordered(order)
        .expect("order must be a permutation of the dimensions");
    let new_lens: Vec<usize> = spec.dimensions().iter().map(Dimension::len).collect();
    let cells: usize = new_lens.iter().product();

    let mut mapping = Vec::with_capacity(cells);
    let mut new_index = vec![0usize; new_lens.len()];
    for _ in 0..cells {
        let mut old_index = vec![0usize; old_dims.len()];
        for (k, &i) in new_index.iter().enumerate() {
            old_index[order[k]] = i;
        }
        let old_position = old_index
            .iter()
            .zip(old_dims)
            .fold(0usize, |acc, (&i, d)| acc * d.len() + i);
        mapping.push(old_position);

        for d in (0..new_index.len()).rev() {
            new_index[d] += 1;
            if new_index[d] < new_lens[d] {
                break;
            }
            new_index[d] = 0;
        }
    }

    let variables = source
        .variables
        .iter()
        .map(|v| VariableBuffer {
            name: v.name.clone(),
            samples: mapping.iter().map(|&p| v.samples[p]).collect(),
            kind: v.kind,
        })
        .collect();

    GridSource {
        spec,
        variables,
        attributes: source.attributes.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_null_count() {
        let source = synthetic_source(10, 10, 10);
        let nulls = source.variables[0].samples.iter().filter(|v| v.is_nan()).count();
        assert_eq!(nulls, 60);
    }

    #[test]
    fn test_reorder_keeps_cells() {
        let source = synthetic_source(2, 3, 0);
        let reordered = reorder_source(&source, &[2, 0, 1]);
        assert_eq!(reordered.spec.dimensions()[0].name, "warming_levels");
        // (lon 1, lat 2, level 4) in the original layout.
        let old = (1 * 3 + 2) * 6 + 4;
        // (level 4, lon 1, lat 2) in the new layout.
        let new = (4 * 2 + 1) * 3 + 2;
        assert_eq!(reordered.variables[0].samples[new], source.variables[0].samples[old]);
    }
}
