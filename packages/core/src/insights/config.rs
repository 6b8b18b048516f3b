//! Configuration for the site insights system
//!
//! Every threshold the analysis relies on lives here so it can be tuned
//! without touching the algorithms. Defaults reproduce the product's
//! established behaviour.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::insights::error::InsightsError;

/// Configuration for the whole insights pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightsConfig {
    pub trend: TrendConfig,
    pub forecast: ForecastConfig,
    pub benchmark: BenchmarkConfig,
    pub report: ReportConfig,
}

/// Configuration for per-metric trend analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub min_data_points: usize,
    pub recent_period_days: i64,
    /// Percent change between consecutive smoothed values that counts as significant.
    pub significant_change_threshold: f64,
    pub anomaly_threshold: f64,
    /// Threshold used instead of `anomaly_threshold` when the series is near-constant.
    pub flat_series_anomaly_threshold: f64,
    pub flat_series_std_dev: f64,
    pub seasonality_min_points: usize,
    pub seasonality_threshold: f64,
    pub seasonality_high_threshold: f64,
    /// Slopes (per day) with a smaller magnitude are classified as stable.
    pub stable_slope_threshold: f64,
    pub forecast_days: usize,
    pub forecast_min_r_squared: f64,
    pub forecast_min_points: usize,
    /// Share of analysed metrics one direction needs to dominate the overall trend.
    pub overall_majority: f64,
}

/// Configuration for ensemble forecasting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub min_data_points: usize,
    pub ma_window_size: usize,
    pub wma_decay_factor: f64,
    pub confidence_level: f64,
    pub algorithm_weights: BTreeMap<String, f64>,
    /// Relative width of the final interval below which a forecast is highly stable.
    pub high_stability_width: f64,
    /// Relative width below which it is moderately stable; anything wider is low.
    pub medium_stability_width: f64,
}

/// Configuration for competitor benchmarking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub max_competitors: usize,
    pub outdated_after_days: i64,
    pub refresh_attempts: u32,
    pub refresh_backoff_ms: u64,
}

/// Configuration for report synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub top_changes: usize,
    pub top_anomalies: usize,
    /// Significant changes at least this large (percent) become insights.
    pub large_change_threshold: f64,
    /// Forecast changes at least this large (percent) become insights.
    pub predicted_change_threshold: f64,
    pub timeout_seconds: u64,
    pub competitor_refresh_timeout_seconds: u64,
}

impl InsightsConfig {
    /// Load overrides from a JSON document; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, InsightsError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            InsightsError::config_error(format!("cannot read {}: {}", path.display(), err))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|err| {
            InsightsError::config_error(format!("invalid {}: {}", path.display(), err))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), InsightsError> {
        if self.trend.min_data_points < 2 {
            return Err(InsightsError::config_error("trend.min_data_points must be at least 2"));
        }
        if self.forecast.min_data_points < 2 {
            return Err(InsightsError::config_error("forecast.min_data_points must be at least 2"));
        }
        if self.forecast.ma_window_size == 0 {
            return Err(InsightsError::config_error("forecast.ma_window_size must be positive"));
        }
        if !(0.0..=1.0).contains(&self.forecast.wma_decay_factor) || self.forecast.wma_decay_factor == 0.0 {
            return Err(InsightsError::config_error("forecast.wma_decay_factor must be in (0, 1]"));
        }
        if self.forecast.algorithm_weights.values().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(InsightsError::config_error("forecast weights must be non-negative"));
        }
        let (high, medium) = (self.forecast.high_stability_width, self.forecast.medium_stability_width);
        if !(high > 0.0 && high <= medium && medium.is_finite()) {
            return Err(InsightsError::config_error(
                "forecast stability widths must satisfy 0 < high <= medium",
            ));
        }
        if self.benchmark.max_competitors == 0 {
            return Err(InsightsError::config_error("benchmark.max_competitors must be positive"));
        }
        Ok(())
    }
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_data_points: 5,
            recent_period_days: 14,
            significant_change_threshold: 10.0,
            anomaly_threshold: 2.5,
            flat_series_anomaly_threshold: 10.0,
            flat_series_std_dev: 1e-3,
            seasonality_min_points: 14,
            seasonality_threshold: 0.1,
            seasonality_high_threshold: 0.2,
            stable_slope_threshold: 1e-4,
            forecast_days: 7,
            forecast_min_r_squared: 0.1,
            forecast_min_points: 3,
            overall_majority: 0.6,
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        let mut algorithm_weights = BTreeMap::new();
        algorithm_weights.insert("linear".to_string(), 0.4);
        algorithm_weights.insert("movingAverage".to_string(), 0.3);
        algorithm_weights.insert("weightedMovingAverage".to_string(), 0.3);

        Self {
            min_data_points: 10,
            ma_window_size: 7,
            wma_decay_factor: 0.9,
            confidence_level: 0.95,
            algorithm_weights,
            high_stability_width: 0.1,
            medium_stability_width: 0.3,
        }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            max_competitors: 10,
            outdated_after_days: 7,
            refresh_attempts: 3,
            refresh_backoff_ms: 200,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_changes: 3,
            top_anomalies: 5,
            large_change_threshold: 20.0,
            predicted_change_threshold: 5.0,
            timeout_seconds: 30,
            competitor_refresh_timeout_seconds: 10,
        }
    }
}
