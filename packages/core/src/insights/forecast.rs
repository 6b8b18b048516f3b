//! Ensemble Forecast Engine
//!
//! Each forecasting algorithm implements [`ForecastAlgorithm`] and is
//! registered with a base weight. A forecast runs every registered
//! algorithm independently, drops the ones that fail, and combines the
//! survivors into a weighted ensemble with widening confidence intervals.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;

use crate::insights::{
    calculator::{self, EPSILON},
    catalog::MetricCatalog,
    config::ForecastConfig,
    error::InsightsError,
    types::*,
};

/// Supported confidence levels and their two-sided z-scores.
const Z_SCORES: [(f64, f64); 4] = [(0.80, 1.28), (0.90, 1.645), (0.95, 1.96), (0.99, 2.576)];

/// A forecasting strategy.
pub trait ForecastAlgorithm: Send + Sync {
    /// Registry key, also used to look up the configured weight.
    fn name(&self) -> &str;

    /// One predicted value per day for `horizon_days` days after the last point.
    fn predict(&self, series: &MetricSeries, horizon_days: usize) -> Result<Vec<f64>, InsightsError>;
}

/// Least-squares line over the full series, extrapolated forward.
#[derive(Debug, Clone, Default)]
pub struct LinearForecast;

impl ForecastAlgorithm for LinearForecast {
    fn name(&self) -> &str {
        "linear"
    }

    fn predict(&self, series: &MetricSeries, horizon_days: usize) -> Result<Vec<f64>, InsightsError> {
        let points = series.points();
        let regression = calculator::regress_points(points)
            .ok_or_else(|| InsightsError::insufficient_data("linear forecast", 2, points.len()))?;
        let (first, last) = match (points.first(), points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(InsightsError::insufficient_data("linear forecast", 2, 0)),
        };
        let last_x = calculator::days_between(first.timestamp, last.timestamp);

        Ok((1..=horizon_days)
            .map(|day| regression.predict(last_x + day as f64))
            .collect())
    }
}

/// Flat projection at the mean of the trailing window.
#[derive(Debug, Clone)]
pub struct MovingAverageForecast {
    pub window: usize,
}

impl ForecastAlgorithm for MovingAverageForecast {
    fn name(&self) -> &str {
        "movingAverage"
    }

    fn predict(&self, series: &MetricSeries, horizon_days: usize) -> Result<Vec<f64>, InsightsError> {
        let values = series.values();
        let start = values.len().saturating_sub(self.window);
        let average = calculator::mean(&values[start..])
            .ok_or_else(|| InsightsError::insufficient_data("moving average forecast", 1, 0))?;
        Ok(vec![average; horizon_days])
    }
}

/// Flat projection at an exponentially decayed mean of the trailing
/// window; the most recent point carries weight 1, the one before it
/// `decay`, then `decay^2`, and so on.
#[derive(Debug, Clone)]
pub struct WeightedMovingAverageForecast {
    pub window: usize,
    pub decay: f64,
}

impl ForecastAlgorithm for WeightedMovingAverageForecast {
    fn name(&self) -> &str {
        "weightedMovingAverage"
    }

    fn predict(&self, series: &MetricSeries, horizon_days: usize) -> Result<Vec<f64>, InsightsError> {
        let values = series.values();
        let start = values.len().saturating_sub(self.window);
        let window = &values[start..];
        if window.is_empty() {
            return Err(InsightsError::insufficient_data("weighted moving average forecast", 1, 0));
        }

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (age, value) in window.iter().rev().enumerate() {
            let weight = self.decay.powi(age as i32);
            weighted_sum += value * weight;
            weight_total += weight;
        }
        if weight_total < EPSILON {
            return Err(InsightsError::invalid_data("weighted moving average has zero total weight"));
        }
        Ok(vec![weighted_sum / weight_total; horizon_days])
    }
}

struct RegisteredAlgorithm {
    algorithm: Arc<dyn ForecastAlgorithm>,
    weight: f64,
}

/// Multi-algorithm forecaster
pub struct ForecastEngine {
    config: ForecastConfig,
    catalog: Arc<MetricCatalog>,
    algorithms: BTreeMap<String, RegisteredAlgorithm>,
}

impl std::fmt::Debug for ForecastEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastEngine")
            .field("config", &self.config)
            .field("algorithms", &self.algorithm_names())
            .finish()
    }
}

impl ForecastEngine {
    /// Engine with the linear, moving-average and weighted-moving-average
    /// algorithms registered at their configured weights.
    pub fn new(config: ForecastConfig, catalog: Arc<MetricCatalog>) -> Self {
        let mut engine = Self::empty(config.clone(), catalog);
        engine.register_with_configured_weight(Arc::new(LinearForecast));
        engine.register_with_configured_weight(Arc::new(MovingAverageForecast {
            window: config.ma_window_size,
        }));
        engine.register_with_configured_weight(Arc::new(WeightedMovingAverageForecast {
            window: config.ma_window_size,
            decay: config.wma_decay_factor,
        }));
        engine
    }

    /// Engine with no algorithms registered.
    pub fn empty(config: ForecastConfig, catalog: Arc<MetricCatalog>) -> Self {
        Self {
            config,
            catalog,
            algorithms: BTreeMap::new(),
        }
    }

    /// Register (or replace) an algorithm under its name.
    pub fn register(&mut self, algorithm: Arc<dyn ForecastAlgorithm>, weight: f64) {
        let name = algorithm.name().to_string();
        self.algorithms
            .insert(name, RegisteredAlgorithm { algorithm, weight: weight.max(0.0) });
    }

    fn register_with_configured_weight(&mut self, algorithm: Arc<dyn ForecastAlgorithm>) {
        let weight = self
            .config
            .algorithm_weights
            .get(algorithm.name())
            .copied()
            .unwrap_or(0.0);
        self.register(algorithm, weight);
    }

    pub fn algorithm_names(&self) -> Vec<String> {
        self.algorithms.keys().cloned().collect()
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Forecast `horizon_days` ahead.
    ///
    /// Too little history yields a result with `success == false`. Failing
    /// algorithms are logged and left out of the ensemble; the call only
    /// errors when none of them produced a forecast.
    pub fn forecast(&self, series: &MetricSeries, horizon_days: usize) -> Result<ForecastResult, InsightsError> {
        let metric_key = series.metric_key.clone();
        let display_name = self.catalog.display_name(&metric_key);

        if horizon_days == 0 {
            return Err(InsightsError::invalid_data("forecast horizon must be at least one day"));
        }

        if series.len() < self.config.min_data_points {
            return Ok(ForecastResult {
                metric_key,
                display_name,
                success: false,
                message: Some(format!(
                    "Insufficient data: {} data points, at least {} required",
                    series.len(),
                    self.config.min_data_points
                )),
                horizon_days,
                ensemble: Vec::new(),
                by_algorithm: BTreeMap::new(),
                confidence_intervals: Vec::new(),
                summary: None,
            });
        }

        let last = match series.last() {
            Some(last) => *last,
            None => return Err(InsightsError::insufficient_data("forecast", 1, 0)),
        };
        let to_points = |values: &[f64]| -> Vec<ForecastPoint> {
            values
                .iter()
                .enumerate()
                .map(|(i, &value)| ForecastPoint {
                    timestamp: last.timestamp + Duration::days(i as i64 + 1),
                    value,
                    day: i + 1,
                })
                .collect()
        };

        let mut predictions: Vec<(&str, f64, Vec<f64>)> = Vec::new();
        for (name, registered) in &self.algorithms {
            match registered.algorithm.predict(series, horizon_days) {
                Ok(values) if values.len() == horizon_days && values.iter().all(|v| v.is_finite()) => {
                    predictions.push((name.as_str(), registered.weight, values));
                }
                Ok(values) => {
                    tracing::warn!(
                        metric = %metric_key,
                        algorithm = %name,
                        produced = values.len(),
                        "Forecast algorithm produced unusable output, excluding it"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        metric = %metric_key,
                        algorithm = %name,
                        "Forecast algorithm failed, excluding it: {}",
                        err
                    );
                }
            }
        }

        if predictions.is_empty() {
            return Err(InsightsError::no_forecast_available(metric_key));
        }

        let ensemble_values = combine(&predictions, horizon_days);
        let ensemble = to_points(&ensemble_values);
        let by_algorithm = predictions
            .iter()
            .map(|(name, _, values)| (name.to_string(), to_points(values)))
            .collect();

        let history = series.values();
        let std_dev = calculator::std_dev(&history).unwrap_or(0.0);
        let confidence_intervals = confidence_intervals(&ensemble, std_dev, self.config.confidence_level);
        let summary = self.summarize(&metric_key, last.value, &ensemble, &confidence_intervals);

        Ok(ForecastResult {
            metric_key,
            display_name,
            success: true,
            message: None,
            horizon_days,
            ensemble,
            by_algorithm,
            confidence_intervals,
            summary,
        })
    }

    fn summarize(
        &self,
        metric_key: &str,
        last_observed: f64,
        ensemble: &[ForecastPoint],
        intervals: &[ConfidenceInterval],
    ) -> Option<ForecastSummary> {
        let final_forecast = ensemble.last()?.value;
        let final_interval = intervals.last()?;
        let percent_change = calculator::percent_change(last_observed, final_forecast);
        let is_positive_change = if self.catalog.higher_is_better(metric_key) {
            percent_change > 0.0
        } else {
            percent_change < 0.0
        };

        Some(ForecastSummary {
            last_observed,
            final_forecast,
            percent_change,
            is_positive_change,
            stability: stability(final_interval, &self.config),
        })
    }
}

/// Per-day weighted combination with weights renormalised over the
/// algorithms that produced output. A single algorithm passes through.
fn combine(predictions: &[(&str, f64, Vec<f64>)], horizon_days: usize) -> Vec<f64> {
    if let [(_, _, only)] = predictions {
        return only.clone();
    }

    let total_weight: f64 = predictions.iter().map(|(_, w, _)| w).sum();
    let equal = 1.0 / predictions.len() as f64;
    (0..horizon_days)
        .map(|day| {
            predictions
                .iter()
                .map(|(_, weight, values)| {
                    let share = if total_weight < EPSILON { equal } else { weight / total_weight };
                    values[day] * share
                })
                .sum()
        })
        .collect()
}

/// z-score of the supported confidence level closest to `level`
/// (given either as a fraction or a percentage).
pub fn z_score_for(level: f64) -> f64 {
    let level = if level > 1.0 { level / 100.0 } else { level };
    Z_SCORES
        .iter()
        .min_by(|a, b| (a.0 - level).abs().total_cmp(&(b.0 - level).abs()))
        .map(|(_, z)| *z)
        .unwrap_or(1.96)
}

/// Symmetric intervals whose margin grows linearly with distance:
/// `z * std_dev * (1 + day_index / horizon)` with `day_index` starting at 0.
pub fn confidence_intervals(
    ensemble: &[ForecastPoint],
    std_dev: f64,
    confidence_level: f64,
) -> Vec<ConfidenceInterval> {
    let z = z_score_for(confidence_level);
    let horizon = ensemble.len().max(1) as f64;
    ensemble
        .iter()
        .enumerate()
        .map(|(index, point)| {
            let margin = z * std_dev * (1.0 + index as f64 / horizon);
            ConfidenceInterval {
                timestamp: point.timestamp,
                lower: point.value - margin,
                center: point.value,
                upper: point.value + margin,
            }
        })
        .collect()
}

/// Classifies the final interval by its width relative to the forecast.
pub fn stability(interval: &ConfidenceInterval, config: &ForecastConfig) -> ForecastStability {
    if interval.center.abs() < EPSILON {
        return ForecastStability::Low;
    }
    let relative_width = (interval.upper - interval.lower) / interval.center.abs();
    if relative_width < config.high_stability_width {
        ForecastStability::High
    } else if relative_width < config.medium_stability_width {
        ForecastStability::Medium
    } else {
        ForecastStability::Low
    }
}
