//! Simplification of piecewise (x, y) curves.

use crate::normalize::round_tenths;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveOptions {
    /// Drop the degenerate (0, 0) point unless it is the only point.
    #[serde(default = "default_drop_origin")]
    pub drop_origin: bool,
}

fn default_drop_origin() -> bool {
    true
}

impl Default for CurveOptions {
    fn default() -> Self {
        Self { drop_origin: true }
    }
}

/// Deduplicate then average a curve.
///
/// After simplification x is strictly increasing and y carries at most one
/// fractional digit. Applying it twice gives the same curve.
pub fn simplify(xs: &[f64], ys: &[f64], options: &CurveOptions) -> (Vec<f64>, Vec<f64>) {
    let points = dedupe(xs, ys, options);
    let points = average_by_x(points);
    let points = drop_origin(points, options);
    points.into_iter().unzip()
}

/// Keep the first occurrence of each (x, rounded y) pair.
fn dedupe(xs: &[f64], ys: &[f64], options: &CurveOptions) -> Vec<(f64, f64)> {
    let mut seen = HashSet::new();
    let points: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .map(|(&x, &y)| (x, round_tenths(y)))
        .filter(|&(x, y)| seen.insert((key(x), key(y))))
        .collect();
    drop_origin(points, options)
}

/// One point per x, ascending, with the mean of its y values.
fn average_by_x(mut points: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut out: Vec<(f64, f64)> = Vec::with_capacity(points.len());
    let mut i = 0;
    while i < points.len() {
        let x = points[i].0;
        let mut sum = 0.0;
        let mut n = 0usize;
        while i < points.len() && key(points[i].0) == key(x) {
            sum += points[i].1;
            n += 1;
            i += 1;
        }
        out.push((x, round_tenths(sum / n as f64)));
    }
    out
}

fn drop_origin(points: Vec<(f64, f64)>, options: &CurveOptions) -> Vec<(f64, f64)> {
    if !options.drop_origin || points.len() <= 1 {
        return points;
    }
    let kept: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|&(x, y)| !(x == 0.0 && y == 0.0))
        .collect();
    // A curve made only of origins collapses to a single origin.
    if kept.is_empty() {
        points.into_iter().take(1).collect()
    } else {
        kept
    }
}

// Bit pattern with signed zero folded, so -0.0 and 0.0 compare equal.
fn key(v: f64) -> u64 {
    (v + 0.0).to_bits()
}
