//! Pattern detection over a single metric series
//!
//! Significant-change events, weekly seasonality and z-score anomalies.

use chrono::Datelike;

use crate::insights::{
    calculator::{self, percent_change},
    config::TrendConfig,
    types::*,
};

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Name of a day index (Sunday = 0).
pub fn day_name(index: usize) -> &'static str {
    DAY_NAMES.get(index).copied().unwrap_or("Unknown")
}

/// Detector for changes, seasonality and anomalies in a metric series
#[derive(Debug, Clone)]
pub struct PatternDetector {
    config: TrendConfig,
}

impl PatternDetector {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }

    /// Window of the smoothing average used before looking for jumps.
    pub fn smoothing_window(len: usize) -> usize {
        (len / 10).max(2)
    }

    /// Compare consecutive values of the smoothed series and report every
    /// jump larger than the threshold. Reported values and timestamps are
    /// the raw points at the end of each smoothing window.
    pub fn detect_significant_changes(&self, points: &[SeriesPoint]) -> Vec<SignificantChange> {
        let window = Self::smoothing_window(points.len());
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let smoothed = calculator::simple_moving_average(&values, window);

        smoothed
            .windows(2)
            .enumerate()
            .filter_map(|(j, pair)| {
                let change = percent_change(pair[0], pair[1]);
                if change.abs() <= self.config.significant_change_threshold {
                    return None;
                }
                // smoothed[j] ends at raw index j + window - 1
                let before = &points[j + window - 1];
                let after = &points[j + window];
                Some(SignificantChange {
                    from_timestamp: before.timestamp,
                    to_timestamp: after.timestamp,
                    from_value: before.value,
                    to_value: after.value,
                    percent_change: change,
                    direction: if change > 0.0 {
                        ChangeDirection::Increase
                    } else {
                        ChangeDirection::Decrease
                    },
                })
            })
            .collect()
    }

    /// Weekly seasonality from day-of-week averages. Requires at least
    /// `seasonality_min_points` points and every weekday represented.
    pub fn detect_seasonality(&self, points: &[SeriesPoint]) -> Option<Seasonality> {
        if points.len() < self.config.seasonality_min_points {
            return None;
        }

        let mut sums = [0.0_f64; 7];
        let mut counts = [0_usize; 7];
        for point in points {
            let day = point.timestamp.weekday().num_days_from_sunday() as usize;
            sums[day] += point.value;
            counts[day] += 1;
        }
        if counts.iter().any(|&c| c == 0) {
            return None;
        }

        let mut day_averages = [0.0_f64; 7];
        for day in 0..7 {
            day_averages[day] = sums[day] / counts[day] as f64;
        }

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let overall = calculator::mean(&values)?;
        if overall.abs() < calculator::EPSILON {
            return None;
        }

        let mut max_day = 0;
        let mut min_day = 0;
        for day in 1..7 {
            if day_averages[day] > day_averages[max_day] {
                max_day = day;
            }
            if day_averages[day] < day_averages[min_day] {
                min_day = day;
            }
        }

        let relative_variation = (day_averages[max_day] - day_averages[min_day]) / overall.abs();
        if relative_variation <= self.config.seasonality_threshold {
            return None;
        }

        Some(Seasonality {
            day_averages,
            relative_variation,
            max_day,
            min_day,
            max_day_name: day_name(max_day).to_string(),
            min_day_name: day_name(min_day).to_string(),
            confidence: if relative_variation > self.config.seasonality_high_threshold {
                SeasonalityConfidence::High
            } else {
                SeasonalityConfidence::Medium
            },
        })
    }

    /// Points whose z-score over the whole series exceeds the threshold.
    /// Near-constant series use a much higher threshold so rounding noise
    /// is not reported.
    pub fn detect_anomalies(&self, points: &[SeriesPoint]) -> Vec<Anomaly> {
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let (Some(mean), Some(std_dev)) = (calculator::mean(&values), calculator::std_dev(&values))
        else {
            return Vec::new();
        };
        if std_dev < calculator::EPSILON {
            return Vec::new();
        }

        let threshold = if std_dev < self.config.flat_series_std_dev {
            self.config.flat_series_anomaly_threshold
        } else {
            self.config.anomaly_threshold
        };

        points
            .iter()
            .filter_map(|point| {
                let z_score = (point.value - mean) / std_dev;
                if z_score.abs() <= threshold {
                    return None;
                }
                Some(Anomaly {
                    timestamp: point.timestamp,
                    value: point.value,
                    z_score,
                    direction: if z_score > 0.0 {
                        AnomalyDirection::High
                    } else {
                        AnomalyDirection::Low
                    },
                    deviation_percent: percent_change(mean, point.value),
                })
            })
            .collect()
    }
}
