//! Statistical primitives
//!
//! Descriptive statistics, percentiles, least-squares regression and moving
//! averages. Every function guards its degenerate inputs (empty slices, zero
//! denominators) and returns `None` or `0.0` instead of letting `NaN` or
//! infinities leak into results.

use chrono::{DateTime, Utc};

use crate::insights::types::{Percentiles, SeriesPoint, SeriesStatistics};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Denominators smaller than this are treated as zero.
pub const EPSILON: f64 = 1e-12;

/// Least-squares line `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl Regression {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population variance.
pub fn variance(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some(sum_sq / values.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    variance(values).map(f64::sqrt)
}

/// Percentile `p` (0..=100) of an ascending slice, linearly interpolated
/// between the two closest ranks.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 100.0);
    let index = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    if lower == upper {
        return Some(sorted[lower]);
    }
    let fraction = index - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Percent change from `from` to `to`; `0.0` when `from` is zero.
pub fn percent_change(from: f64, to: f64) -> f64 {
    if from.abs() < EPSILON {
        return 0.0;
    }
    (to - from) / from.abs() * 100.0
}

/// Fractional days from `origin` to `at`.
pub fn days_between(origin: DateTime<Utc>, at: DateTime<Utc>) -> f64 {
    (at - origin).num_milliseconds() as f64 / MILLIS_PER_DAY
}

/// Ordinary least squares over paired samples. `None` with fewer than two
/// points. A vertical spread of zero (all `x` equal) yields a flat line
/// through the mean.
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Option<Regression> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let nf = n as f64;

    let sum_x: f64 = xs.iter().sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = xs.iter().zip(ys).map(|(x, y)| x * y).sum();
    let sum_x2: f64 = xs.iter().map(|x| x * x).sum();

    let denominator = nf * sum_x2 - sum_x * sum_x;
    let mean_y = sum_y / nf;
    let (slope, intercept) = if denominator.abs() < EPSILON {
        (0.0, mean_y)
    } else {
        let slope = (nf * sum_xy - sum_x * sum_y) / denominator;
        (slope, (sum_y - slope * sum_x) / nf)
    };

    let ss_tot: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
        .sum();
    // A constant series is fitted exactly by the flat line.
    let r_squared = if ss_tot < EPSILON {
        if ss_res < EPSILON { 1.0 } else { 0.0 }
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    Some(Regression {
        slope,
        intercept,
        r_squared,
    })
}

/// Regression of value against days elapsed since the first point.
pub fn regress_points(points: &[SeriesPoint]) -> Option<Regression> {
    let origin = points.first()?.timestamp;
    let xs: Vec<f64> = points.iter().map(|p| days_between(origin, p.timestamp)).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.value).collect();
    linear_regression(&xs, &ys)
}

/// Trailing simple moving average. Output element `i` averages
/// `values[i..i + window]`, so the result has `len - window + 1` elements
/// (empty when the window is larger than the input).
pub fn simple_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

/// Descriptive statistics of a series in chronological order.
pub fn describe(values: &[f64]) -> Option<SeriesStatistics> {
    let first_value = *values.first()?;
    let last_value = *values.last()?;

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mean = mean(values)?;
    let variance = variance(values)?;
    let pct = |p: f64| percentile(&sorted, p).unwrap_or(0.0);

    Some(SeriesStatistics {
        count: values.len(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean,
        variance,
        std_dev: variance.sqrt(),
        percentiles: Percentiles {
            p25: pct(25.0),
            p50: pct(50.0),
            p75: pct(75.0),
            p90: pct(90.0),
            p95: pct(95.0),
        },
        first_value,
        last_value,
        total_change: last_value - first_value,
        percent_change: percent_change(first_value, last_value),
    })
}
