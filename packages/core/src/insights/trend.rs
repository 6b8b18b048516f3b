//! Trend Analyzer
//!
//! Turns one metric series into a [`TrendResult`]: statistics, the
//! full-period and recent least-squares trends, significant changes,
//! seasonality, anomalies and a short linear projection.

use std::sync::Arc;

use chrono::Duration;

use crate::insights::{
    calculator::{self, Regression},
    catalog::MetricCatalog,
    config::TrendConfig,
    detector::PatternDetector,
    error::InsightsError,
    types::*,
};

/// Per-metric trend analysis
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    config: TrendConfig,
    catalog: Arc<MetricCatalog>,
    detector: PatternDetector,
}

impl TrendAnalyzer {
    pub fn new(config: TrendConfig, catalog: Arc<MetricCatalog>) -> Self {
        let detector = PatternDetector::new(config.clone());
        Self {
            config,
            catalog,
            detector,
        }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    /// Analyse a series. Too few points is not an error: the result comes
    /// back with `success == false` and no analysis.
    pub fn analyze(&self, series: &MetricSeries) -> Result<TrendResult, InsightsError> {
        let metric_key = series.metric_key.clone();
        let display_name = self.catalog.display_name(&metric_key);
        let points = series.points();

        if points.len() < self.config.min_data_points {
            return Ok(TrendResult {
                metric_key,
                display_name,
                success: false,
                data_points: points.len(),
                message: Some(format!(
                    "Insufficient data: {} data points, at least {} required",
                    points.len(),
                    self.config.min_data_points
                )),
                analysis: None,
            });
        }

        if let Some(bad) = points.iter().find(|p| !p.value.is_finite()) {
            return Err(InsightsError::invalid_data(format!(
                "non-finite value for {} at {}",
                metric_key, bad.timestamp
            )));
        }

        let values = series.values();
        let statistics = calculator::describe(&values)
            .ok_or_else(|| InsightsError::insufficient_data("statistics", 1, 0))?;
        let trend = self
            .fit_trend(&metric_key, points)
            .ok_or_else(|| InsightsError::insufficient_data("trend", 2, points.len()))?;
        let recent_trend = self.recent_trend(&metric_key, points);
        let significant_changes = self.detector.detect_significant_changes(points);
        let seasonality = self.detector.detect_seasonality(points);
        let anomalies = self.detector.detect_anomalies(points);
        let forecast = self.project(points, &trend, self.config.forecast_days);

        tracing::debug!(
            metric = %metric_key,
            points = points.len(),
            slope = trend.slope,
            r_squared = trend.r_squared,
            "Trend analysed"
        );

        Ok(TrendResult {
            metric_key,
            display_name,
            success: true,
            data_points: points.len(),
            message: None,
            analysis: Some(TrendAnalysis {
                statistics,
                trend,
                recent_trend,
                significant_changes,
                seasonality,
                anomalies,
                forecast,
            }),
        })
    }

    /// Least-squares trend with x = days since the first point.
    pub fn fit_trend(&self, metric_key: &str, points: &[SeriesPoint]) -> Option<LinearTrend> {
        let regression = calculator::regress_points(points)?;
        let first = points.first()?;
        let last = points.last()?;
        let span = calculator::days_between(first.timestamp, last.timestamp);
        let fitted_start = regression.predict(0.0);
        let fitted_end = regression.predict(span);

        Some(LinearTrend {
            slope: regression.slope,
            intercept: regression.intercept,
            r_squared: regression.r_squared,
            direction: self.classify(metric_key, regression.slope),
            percent_change: calculator::percent_change(fitted_start, fitted_end),
            sample_count: points.len(),
        })
    }

    /// Interpret a slope through the metric's polarity.
    pub fn classify(&self, metric_key: &str, slope: f64) -> TrendDirection {
        if slope.abs() < self.config.stable_slope_threshold {
            return TrendDirection::Stable;
        }
        let rising = slope > 0.0;
        if rising == self.catalog.higher_is_better(metric_key) {
            TrendDirection::Improving
        } else {
            TrendDirection::Degrading
        }
    }

    /// Trend over the last `recent_period_days`, falling back to the
    /// trailing half of the series when the window holds fewer than two points.
    pub fn recent_trend(&self, metric_key: &str, points: &[SeriesPoint]) -> Option<LinearTrend> {
        let last = points.last()?;
        let cutoff = last.timestamp - Duration::days(self.config.recent_period_days);
        let start = points.partition_point(|p| p.timestamp < cutoff);
        let window = &points[start..];

        if window.len() >= 2 {
            return self.fit_trend(metric_key, window);
        }
        let half = &points[points.len() / 2..];
        if half.len() >= 2 {
            self.fit_trend(metric_key, half)
        } else {
            None
        }
    }

    /// Linear projection `days` ahead. Empty when the fit is too poor to be
    /// meaningful or there are too few points.
    pub fn project(&self, points: &[SeriesPoint], trend: &LinearTrend, days: usize) -> Vec<ForecastPoint> {
        if points.len() < self.config.forecast_min_points
            || trend.r_squared < self.config.forecast_min_r_squared
        {
            return Vec::new();
        }
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Vec::new();
        };

        let regression = Regression {
            slope: trend.slope,
            intercept: trend.intercept,
            r_squared: trend.r_squared,
        };
        let last_x = calculator::days_between(first.timestamp, last.timestamp);
        (1..=days)
            .map(|day| ForecastPoint {
                timestamp: last.timestamp + Duration::days(day as i64),
                value: regression.predict(last_x + day as f64),
                day,
            })
            .collect()
    }

    /// Summarise directions across metrics. One direction wins when it
    /// holds more than the configured majority of analysed metrics.
    pub fn overall_trend<'a, I>(&self, results: I) -> OverallTrend
    where
        I: IntoIterator<Item = &'a TrendResult>,
    {
        let mut improving = 0;
        let mut degrading = 0;
        let mut stable = 0;
        for direction in results.into_iter().filter_map(TrendResult::direction) {
            match direction {
                TrendDirection::Improving => improving += 1,
                TrendDirection::Degrading => degrading += 1,
                TrendDirection::Stable => stable += 1,
            }
        }

        let analyzed = improving + degrading + stable;
        let majority = |count: usize| analyzed > 0 && count as f64 / analyzed as f64 > self.config.overall_majority;
        let direction = if analyzed == 0 {
            OverallDirection::Stable
        } else if majority(improving) {
            OverallDirection::Improving
        } else if majority(degrading) {
            OverallDirection::Degrading
        } else if majority(stable) {
            OverallDirection::Stable
        } else {
            OverallDirection::Mixed
        };

        OverallTrend {
            direction,
            improving,
            degrading,
            stable,
            analyzed,
        }
    }
}
