//! Tests for the site insights pipeline
//!
//! Unit tests and property-based tests for trend analysis, ensemble
//! forecasting, competitor benchmarking, report synthesis and the engine
//! that orchestrates them over a store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use crate::insights::{
    benchmark::{normalize_url, BenchmarkEngine, RegisterOptions, Registration},
    catalog::MetricCatalog,
    config::{BenchmarkConfig, ForecastConfig, InsightsConfig, ReportConfig, TrendConfig},
    engine::SiteInsightsEngine,
    error::{InsightsError, ProviderError},
    forecast::{confidence_intervals, stability, z_score_for, ForecastAlgorithm, ForecastEngine},
    provider::{mock::MockProvider, PerformanceProvider},
    report::{snapshot_count, ReportOptions, ReportSynthesizer},
    trend::TrendAnalyzer,
    types::*,
};
use crate::store::{InMemoryMetricsStore, MetricsStore};

// Sunday, so weekday indices line up with day offsets.
fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap()
}

fn catalog() -> Arc<MetricCatalog> {
    Arc::new(MetricCatalog::standard())
}

fn daily_series(metric_key: &str, values: &[f64]) -> MetricSeries {
    let points = values
        .iter()
        .enumerate()
        .map(|(day, &value)| SeriesPoint {
            timestamp: base() + Duration::days(day as i64),
            value,
        })
        .collect();
    MetricSeries::new("site", metric_key, points)
}

fn linear(len: usize, start: f64, step: f64) -> Vec<f64> {
    (0..len).map(|i| start + step * i as f64).collect()
}

fn analyzer() -> TrendAnalyzer {
    TrendAnalyzer::new(TrendConfig::default(), catalog())
}

fn forecaster() -> ForecastEngine {
    ForecastEngine::new(ForecastConfig::default(), catalog())
}

fn benchmark_engine(max_competitors: usize) -> BenchmarkEngine {
    let config = BenchmarkConfig {
        max_competitors,
        ..BenchmarkConfig::default()
    };
    BenchmarkEngine::new(config, catalog())
}

fn synthesizer() -> ReportSynthesizer {
    let catalog = catalog();
    ReportSynthesizer::new(
        ReportConfig::default(),
        catalog.clone(),
        Arc::new(TrendAnalyzer::new(TrendConfig::default(), catalog.clone())),
        Arc::new(ForecastEngine::new(ForecastConfig::default(), catalog.clone())),
        BenchmarkEngine::new(BenchmarkConfig::default(), catalog),
    )
}

fn metric_map(pairs: &[(&str, f64)]) -> MetricMap {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn competitor(url: &str, metrics: Option<MetricMap>) -> CompetitorRecord {
    CompetitorRecord {
        site_id: "site".to_string(),
        url: url.to_string(),
        name: url.trim_start_matches("https://").to_string(),
        added_at: base(),
        last_updated: metrics.as_ref().map(|_| base()),
        metrics,
        tags: Vec::new(),
        notes: String::new(),
        version: 1,
    }
}

fn scored(url: &str, score: f64) -> CompetitorRecord {
    competitor(url, Some(metric_map(&[("score", score)])))
}

fn analysis(result: &TrendResult) -> &TrendAnalysis {
    result.analysis.as_ref().expect("analysis present")
}

// =============================================================================
// UNIT TESTS - Trend Analyzer
// =============================================================================

#[test]
fn test_too_few_points_is_flagged_not_an_error() {
    let result = analyzer().analyze(&daily_series("score", &[1.0, 2.0, 3.0, 4.0])).unwrap();
    assert!(!result.success);
    assert_eq!(result.data_points, 4);
    assert!(result.analysis.is_none());
    assert!(result.message.is_some());
}

#[test]
fn test_perfect_line_recovers_slope_and_intercept() {
    let result = analyzer().analyze(&daily_series("score", &linear(10, 5.0, 2.0))).unwrap();
    let trend = &analysis(&result).trend;
    assert!((trend.slope - 2.0).abs() < 1e-9);
    assert!((trend.intercept - 5.0).abs() < 1e-9);
    assert!((trend.r_squared - 1.0).abs() < 1e-9);
    assert_eq!(trend.direction, TrendDirection::Improving);
}

#[test]
fn test_lower_is_better_metric_falling_is_improving() {
    let falling = analyzer()
        .analyze(&daily_series("largestContentfulPaint", &linear(10, 3000.0, -50.0)))
        .unwrap();
    assert_eq!(analysis(&falling).trend.direction, TrendDirection::Improving);

    let rising = analyzer()
        .analyze(&daily_series("largestContentfulPaint", &linear(10, 2000.0, 50.0)))
        .unwrap();
    assert_eq!(analysis(&rising).trend.direction, TrendDirection::Degrading);
}

#[test]
fn test_unknown_metric_defaults_to_lower_is_better() {
    let result = analyzer().analyze(&daily_series("customTimer", &linear(8, 10.0, 1.0))).unwrap();
    assert_eq!(analysis(&result).trend.direction, TrendDirection::Degrading);
    assert_eq!(result.display_name, "customTimer");
}

#[test]
fn test_constant_series_is_stable() {
    let result = analyzer().analyze(&daily_series("score", &[72.0; 12])).unwrap();
    let analysis = analysis(&result);
    assert_eq!(analysis.trend.direction, TrendDirection::Stable);
    assert!(analysis.anomalies.is_empty());
    assert!(analysis.significant_changes.is_empty());
    assert_eq!(analysis.statistics.percent_change, 0.0);
}

#[test]
fn test_recent_trend_uses_trailing_window() {
    // 15 days falling, then 15 days rising.
    let mut values = linear(15, 90.0, -2.0);
    values.extend(linear(15, 62.0, 2.0));
    let result = analyzer().analyze(&daily_series("score", &values)).unwrap();
    let recent = analysis(&result).recent_trend.as_ref().unwrap();
    assert_eq!(recent.sample_count, 15);
    assert_eq!(recent.direction, TrendDirection::Improving);
}

#[test]
fn test_recent_trend_falls_back_to_trailing_half() {
    let points = (0..5)
        .map(|i| SeriesPoint {
            timestamp: base() + Duration::days(30 * i),
            value: 50.0 + i as f64,
        })
        .collect();
    let series = MetricSeries::new("site", "score", points);
    let result = analyzer().analyze(&series).unwrap();
    let recent = analysis(&result).recent_trend.as_ref().unwrap();
    assert_eq!(recent.sample_count, 3);
}

#[test]
fn test_spike_among_constants_is_the_only_anomaly() {
    let mut values = vec![100.0; 20];
    values.push(1000.0);
    let result = analyzer().analyze(&daily_series("totalBlockingTime", &values)).unwrap();
    let anomalies = &analysis(&result).anomalies;
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].value, 1000.0);
    assert_eq!(anomalies[0].direction, AnomalyDirection::High);
    assert!(anomalies[0].deviation_percent > 0.0);
}

#[test]
fn test_weekend_pattern_is_seasonal() {
    let values: Vec<f64> = (0..21)
        .map(|day| if day % 7 == 0 || day % 7 == 6 { 200.0 } else { 100.0 })
        .collect();
    let result = analyzer().analyze(&daily_series("speedIndex", &values)).unwrap();
    let seasonality = analysis(&result).seasonality.as_ref().expect("seasonality");
    assert!(seasonality.max_day == 0 || seasonality.max_day == 6);
    assert!((1..=5).contains(&seasonality.min_day));
    assert_eq!(seasonality.confidence, SeasonalityConfidence::High);
}

#[test]
fn test_step_change_is_significant() {
    let mut values = vec![100.0; 10];
    values.extend(vec![150.0; 10]);
    let result = analyzer().analyze(&daily_series("speedIndex", &values)).unwrap();
    let changes = &analysis(&result).significant_changes;
    assert!(!changes.is_empty());
    assert_eq!(changes[0].direction, ChangeDirection::Increase);
}

#[test]
fn test_projection_extends_good_fit() {
    let result = analyzer().analyze(&daily_series("score", &linear(10, 50.0, 0.5))).unwrap();
    let forecast = &analysis(&result).forecast;
    assert_eq!(forecast.len(), 7);
    assert_eq!(forecast[0].day, 1);
    assert!((forecast[0].value - 55.0).abs() < 1e-9);
    assert_eq!(forecast[0].timestamp, base() + Duration::days(10));
}

#[test]
fn test_projection_skipped_for_poor_fit() {
    let values: Vec<f64> = (0..10).map(|i| if i % 2 == 0 { 50.0 } else { 60.0 }).collect();
    let result = analyzer().analyze(&daily_series("score", &values)).unwrap();
    let analysis = analysis(&result);
    assert!(analysis.trend.r_squared < 0.1);
    assert!(analysis.forecast.is_empty());
}

#[test]
fn test_non_finite_value_is_invalid_data() {
    let mut values = linear(6, 1.0, 1.0);
    values[3] = f64::NAN;
    let err = analyzer().analyze(&daily_series("score", &values)).unwrap_err();
    assert!(matches!(err, InsightsError::InvalidData { .. }));
}

#[test]
fn test_overall_trend_majority_and_mixed() {
    let analyzer = analyzer();
    let improving = analyzer.analyze(&daily_series("score", &linear(6, 50.0, 1.0))).unwrap();
    let degrading = analyzer.analyze(&daily_series("score", &linear(6, 50.0, -1.0))).unwrap();
    let short = analyzer.analyze(&daily_series("score", &[1.0])).unwrap();

    let majority = analyzer.overall_trend([&improving, &improving, &improving, &degrading, &short]);
    assert_eq!(majority.direction, OverallDirection::Improving);
    assert_eq!(majority.analyzed, 4);

    let split = analyzer.overall_trend([&improving, &degrading]);
    assert_eq!(split.direction, OverallDirection::Mixed);

    let none = analyzer.overall_trend([&short]);
    assert_eq!(none.direction, OverallDirection::Stable);
    assert_eq!(none.analyzed, 0);
}

// =============================================================================
// UNIT TESTS - Forecast Engine
// =============================================================================

struct Constant {
    name: &'static str,
    value: f64,
}

impl ForecastAlgorithm for Constant {
    fn name(&self) -> &str {
        self.name
    }

    fn predict(&self, _series: &MetricSeries, horizon_days: usize) -> Result<Vec<f64>, InsightsError> {
        Ok(vec![self.value; horizon_days])
    }
}

struct Failing;

impl ForecastAlgorithm for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn predict(&self, _series: &MetricSeries, _horizon_days: usize) -> Result<Vec<f64>, InsightsError> {
        Err(InsightsError::invalid_data("broken model"))
    }
}

fn stub_engine(algorithms: Vec<(Arc<dyn ForecastAlgorithm>, f64)>) -> ForecastEngine {
    let mut engine = ForecastEngine::empty(ForecastConfig::default(), catalog());
    for (algorithm, weight) in algorithms {
        engine.register(algorithm, weight);
    }
    engine
}

#[test]
fn test_forecast_needs_minimum_history() {
    let result = forecaster().forecast(&daily_series("score", &linear(9, 1.0, 1.0)), 7).unwrap();
    assert!(!result.success);
    assert!(result.ensemble.is_empty());
    assert!(result.summary.is_none());
}

#[test]
fn test_zero_horizon_is_rejected() {
    let err = forecaster().forecast(&daily_series("score", &linear(12, 1.0, 1.0)), 0).unwrap_err();
    assert!(matches!(err, InsightsError::InvalidData { .. }));
}

#[test]
fn test_equal_weights_average_the_algorithms() {
    let engine = stub_engine(vec![
        (Arc::new(Constant { name: "a", value: 10.0 }), 0.5),
        (Arc::new(Constant { name: "b", value: 20.0 }), 0.5),
    ]);
    let result = engine.forecast(&daily_series("score", &linear(12, 1.0, 1.0)), 1).unwrap();
    assert_eq!(result.ensemble.len(), 1);
    assert!((result.ensemble[0].value - 15.0).abs() < 1e-9);
}

#[test]
fn test_failed_algorithm_is_excluded_and_weights_renormalised() {
    let engine = stub_engine(vec![
        (Arc::new(Constant { name: "a", value: 10.0 }), 0.4),
        (Arc::new(Constant { name: "b", value: 20.0 }), 0.3),
        (Arc::new(Failing), 0.3),
    ]);
    let result = engine.forecast(&daily_series("score", &linear(12, 1.0, 1.0)), 3).unwrap();
    let expected = (10.0 * 0.4 + 20.0 * 0.3) / 0.7;
    assert!((result.ensemble[2].value - expected).abs() < 1e-9);
    assert_eq!(result.by_algorithm.len(), 2);
    assert!(!result.by_algorithm.contains_key("failing"));
}

#[test]
fn test_single_algorithm_passes_through() {
    let engine = stub_engine(vec![
        (Arc::new(Constant { name: "a", value: 42.0 }), 0.1),
        (Arc::new(Failing), 0.9),
    ]);
    let result = engine.forecast(&daily_series("score", &linear(12, 1.0, 1.0)), 2).unwrap();
    assert!(result.ensemble.iter().all(|p| (p.value - 42.0).abs() < 1e-12));
}

#[test]
fn test_all_algorithms_failing_is_no_forecast() {
    let engine = stub_engine(vec![(Arc::new(Failing), 1.0)]);
    let err = engine.forecast(&daily_series("score", &linear(12, 1.0, 1.0)), 3).unwrap_err();
    assert!(matches!(err, InsightsError::NoForecastAvailable { .. }));
}

#[test]
fn test_default_engine_runs_all_three_algorithms() {
    let engine = forecaster();
    assert_eq!(
        engine.algorithm_names(),
        vec!["linear", "movingAverage", "weightedMovingAverage"]
    );
    let result = engine.forecast(&daily_series("score", &linear(14, 50.0, 1.0)), 5).unwrap();
    assert!(result.success);
    assert_eq!(result.by_algorithm.len(), 3);
    assert!((result.by_algorithm["linear"][0].value - 64.0).abs() < 1e-9);
    // Flat projections sit below a rising line.
    assert!(result.by_algorithm["movingAverage"][0].value < 64.0);
    assert_eq!(result.confidence_intervals.len(), 5);
}

#[test]
fn test_confidence_interval_widens_with_distance() {
    let points: Vec<ForecastPoint> = (1..=5)
        .map(|day| ForecastPoint {
            timestamp: base() + Duration::days(day as i64),
            value: 100.0,
            day,
        })
        .collect();
    let intervals = confidence_intervals(&points, 5.0, 0.95);
    assert!(((intervals[0].upper - intervals[0].center) - 1.96 * 5.0).abs() < 1e-9);
    for pair in intervals.windows(2) {
        assert!(pair[1].upper - pair[1].lower > pair[0].upper - pair[0].lower);
    }
}

#[test]
fn test_z_score_uses_nearest_supported_level() {
    assert_eq!(z_score_for(0.90), 1.645);
    assert_eq!(z_score_for(99.0), 2.576);
    assert_eq!(z_score_for(0.82), 1.28);
    assert_eq!(z_score_for(0.94), 1.96);
}

#[test]
fn test_summary_polarity_follows_metric_table() {
    let engine = forecaster();
    let lcp = engine
        .forecast(&daily_series("largestContentfulPaint", &linear(20, 3000.0, -20.0)), 7)
        .unwrap();
    assert!(lcp.summary.as_ref().unwrap().is_positive_change);

    let score = engine.forecast(&daily_series("score", &linear(20, 90.0, -1.0)), 7).unwrap();
    assert!(!score.summary.as_ref().unwrap().is_positive_change);
}

#[test]
fn test_constant_history_is_highly_stable() {
    let result = forecaster().forecast(&daily_series("score", &[80.0; 15]), 7).unwrap();
    let summary = result.summary.unwrap();
    assert_eq!(summary.stability, ForecastStability::High);
    assert_eq!(summary.percent_change, 0.0);
}

#[test]
fn test_stability_widths_come_from_config() {
    // Relative width 0.2.
    let interval = ConfidenceInterval {
        timestamp: base(),
        lower: 90.0,
        center: 100.0,
        upper: 110.0,
    };
    let defaults = ForecastConfig::default();
    assert_eq!(stability(&interval, &defaults), ForecastStability::Medium);

    let loose = ForecastConfig {
        high_stability_width: 0.25,
        medium_stability_width: 0.5,
        ..ForecastConfig::default()
    };
    assert_eq!(stability(&interval, &loose), ForecastStability::High);

    let strict = ForecastConfig {
        high_stability_width: 0.05,
        medium_stability_width: 0.15,
        ..ForecastConfig::default()
    };
    assert_eq!(stability(&interval, &strict), ForecastStability::Low);
}

#[test]
fn test_forecast_summary_uses_configured_widths() {
    // Alternating noise gives a non-zero interval around a flat forecast.
    let values: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 95.0 } else { 105.0 }).collect();
    let series = daily_series("score", &values);

    let strict = ForecastConfig {
        high_stability_width: 1e-6,
        medium_stability_width: 2e-6,
        ..ForecastConfig::default()
    };
    let result = ForecastEngine::new(strict, catalog()).forecast(&series, 7).unwrap();
    assert_eq!(result.summary.unwrap().stability, ForecastStability::Low);

    let loose = ForecastConfig {
        high_stability_width: 100.0,
        medium_stability_width: 200.0,
        ..ForecastConfig::default()
    };
    let result = ForecastEngine::new(loose, catalog()).forecast(&series, 7).unwrap();
    assert_eq!(result.summary.unwrap().stability, ForecastStability::High);
}

// =============================================================================
// UNIT TESTS - Benchmark Engine
// =============================================================================

#[test]
fn test_site_ranks_second_among_three() {
    let competitors = vec![
        scored("https://a.example", 90.0),
        scored("https://b.example", 70.0),
        scored("https://c.example", 60.0),
    ];
    let comparison = benchmark_engine(10)
        .compare_metric("site", "score", &metric_map(&[("score", 80.0)]), &competitors)
        .unwrap();
    let stats = comparison.stats.unwrap();
    assert_eq!(stats.position, 2);
    assert!((stats.percentile - 75.0).abs() < 1e-9);
    assert_eq!(stats.status, BenchmarkStatus::Good);
    assert!(stats.is_better_than_avg);

    let order: Vec<(usize, bool)> = comparison.rankings.iter().map(|r| (r.rank, r.is_site)).collect();
    assert_eq!(order, vec![(1, false), (2, true), (3, false), (4, false)]);
}

#[test]
fn test_lower_is_better_ranking_sorts_ascending() {
    let competitors = vec![
        competitor("https://a.example", Some(metric_map(&[("largestContentfulPaint", 2500.0)]))),
        competitor("https://b.example", Some(metric_map(&[("largestContentfulPaint", 1800.0)]))),
        competitor("https://c.example", Some(metric_map(&[("largestContentfulPaint", 3000.0)]))),
    ];
    let comparison = benchmark_engine(10)
        .compare_metric(
            "site",
            "largestContentfulPaint",
            &metric_map(&[("largestContentfulPaint", 2000.0)]),
            &competitors,
        )
        .unwrap();
    assert!(!comparison.higher_is_better);
    assert_eq!(comparison.stats.as_ref().unwrap().position, 2);
    assert_eq!(comparison.rankings[0].value, 1800.0);
    assert!(comparison.stats.unwrap().is_better_than_avg);
}

#[test]
fn test_tie_goes_to_the_site() {
    let comparison = benchmark_engine(10)
        .compare_metric("site", "score", &metric_map(&[("score", 90.0)]), &[scored("https://a.example", 90.0)])
        .unwrap();
    let stats = comparison.stats.unwrap();
    assert_eq!(stats.position, 1);
    assert_eq!(stats.percentile, 100.0);
}

#[test]
fn test_no_competitor_data_is_a_successful_comparison() {
    let competitors = vec![competitor("https://a.example", None)];
    let comparison = benchmark_engine(10)
        .compare_metric("site", "score", &metric_map(&[("score", 90.0)]), &competitors)
        .unwrap();
    assert_eq!(comparison.competitor_count, 0);
    assert!(comparison.stats.is_none());
    assert!(comparison.message.is_some());
    assert_eq!(comparison.rankings.len(), 1);
}

#[test]
fn test_metric_missing_on_site_is_an_error() {
    let err = benchmark_engine(10)
        .compare_metric("site", "speedIndex", &metric_map(&[("score", 90.0)]), &[])
        .unwrap_err();
    assert!(matches!(err, InsightsError::MetricNotAvailable { .. }));
}

#[test]
fn test_urls_are_normalised_to_origin() {
    assert_eq!(normalize_url("www.Rival.example/pricing?x=1").unwrap(), "https://www.rival.example");
    assert_eq!(normalize_url("http://rival.example:8080/a").unwrap(), "http://rival.example:8080");
    assert!(matches!(normalize_url("  "), Err(InsightsError::InvalidData { .. })));
}

#[test]
fn test_registration_defaults_and_idempotence() {
    let engine = benchmark_engine(10);
    let created = engine
        .register_competitor(&[], "site", "www.rival.example/blog", &RegisterOptions::default(), base())
        .unwrap();
    assert!(created.is_created());
    let record = created.record().clone();
    assert_eq!(record.url, "https://www.rival.example");
    assert_eq!(record.name, "rival.example");
    assert_eq!(record.version, 1);
    assert!(record.last_updated.is_none());

    let again = engine
        .register_competitor(&[record.clone()], "site", "https://www.rival.example/", &RegisterOptions::default(), base())
        .unwrap();
    assert_eq!(again, Registration::Existing(record));
}

#[test]
fn test_competitor_cap_is_enforced() {
    let engine = benchmark_engine(2);
    let existing = vec![scored("https://a.example", 1.0), scored("https://b.example", 2.0)];
    let err = engine
        .register_competitor(&existing, "site", "c.example", &RegisterOptions::default(), base())
        .unwrap_err();
    assert!(matches!(err, InsightsError::CapacityError { limit: 2 }));

    // Re-registering an existing competitor at the cap still succeeds.
    let existing_again = engine
        .register_competitor(&existing, "site", "a.example", &RegisterOptions::default(), base())
        .unwrap();
    assert!(!existing_again.is_created());
}

#[test]
fn test_outdated_and_refresh() {
    let engine = benchmark_engine(10);
    let fresh = competitor("https://a.example", None);
    assert!(engine.is_outdated(&fresh, 7, base()));

    let refreshed = engine.refresh_metrics(&fresh, metric_map(&[("score", 70.0)]), base());
    assert_eq!(refreshed.version, 2);
    assert_eq!(refreshed.metric("score"), Some(70.0));
    assert!(!engine.is_outdated(&refreshed, 7, base() + Duration::days(3)));
    assert!(engine.is_outdated(&refreshed, 7, base() + Duration::days(8)));
}

#[test]
fn test_competitive_position_comes_from_score() {
    let engine = benchmark_engine(10);
    let competitors: Vec<CompetitorRecord> = [90.0, 85.0, 80.0, 75.0, 70.0]
        .iter()
        .enumerate()
        .map(|(i, v)| scored(&format!("https://c{}.example", i), *v))
        .collect();
    let benchmarks = engine.benchmarks(
        "site",
        &metric_map(&[("score", 50.0)]),
        &competitors,
        &["score".to_string()],
        base(),
    );
    let position = benchmarks.competitive_position.unwrap();
    assert_eq!(position.tier, PositionTier::Lagging);
    assert_eq!(position.rank, 6);
    assert!(benchmarks.outdated_competitors.is_empty());
}

// =============================================================================
// UNIT TESTS - Report Synthesizer
// =============================================================================

fn report_options() -> ReportOptions {
    ReportOptions {
        as_of: Some(base() + Duration::days(30)),
        ..ReportOptions::default()
    }
}

#[test]
fn test_snapshot_count_counts_distinct_timestamps() {
    let mut series = BTreeMap::new();
    series.insert("score".to_string(), daily_series("score", &[1.0, 2.0, 3.0]));
    // Shares the first three days and adds two more.
    series.insert("speedIndex".to_string(), daily_series("speedIndex", &[1.0, 2.0, 3.0, 4.0, 5.0]));
    series.insert("firstContentfulPaint".to_string(), daily_series("firstContentfulPaint", &[]));
    assert_eq!(snapshot_count(&series), 5);
    assert_eq!(snapshot_count(&BTreeMap::new()), 0);
}

#[test]
fn test_report_without_data_fails() {
    let mut series = BTreeMap::new();
    series.insert("score".to_string(), daily_series("score", &[]));
    let err = synthesizer()
        .build_report("site", series, &[], &report_options())
        .unwrap_err();
    assert!(matches!(err, InsightsError::NoHistoricalData { .. }));
}

#[test]
fn test_degrading_core_metric_yields_high_insight_and_recommendation() {
    let mut series = BTreeMap::new();
    series.insert("score".to_string(), daily_series("score", &linear(30, 90.0, -30.0 / 29.0)));
    let report = synthesizer()
        .build_report("site", series, &[], &report_options())
        .unwrap();

    let insights = &report.insights_and_recommendations.insights;
    let degrading = insights
        .iter()
        .find(|i| i.kind == InsightKind::DegradingMetric)
        .expect("degrading insight");
    assert_eq!(degrading.severity, Severity::High);

    let recommendations = &report.insights_and_recommendations.recommendations;
    let negative = insights.iter().filter(|i| i.impact == Impact::Negative).count();
    assert_eq!(recommendations.len(), negative);
    assert_eq!(recommendations[0].severity, Severity::High);
    assert!(!recommendations[0].actions.is_empty());
    assert!(insights.windows(2).all(|w| w[0].severity <= w[1].severity));
    assert_eq!(report.summary.overall_direction, OverallDirection::Degrading);
}

#[test]
fn test_competitive_gap_is_reported() {
    let mut series = BTreeMap::new();
    series.insert("score".to_string(), daily_series("score", &[50.0; 10]));
    let competitors: Vec<CompetitorRecord> = [90.0, 85.0, 80.0, 75.0, 70.0]
        .iter()
        .enumerate()
        .map(|(i, v)| scored(&format!("https://c{}.example", i), *v))
        .collect();

    let report = synthesizer()
        .build_report("site", series, &competitors, &report_options())
        .unwrap();

    let gap = report
        .insights_and_recommendations
        .insights
        .iter()
        .find(|i| i.kind == InsightKind::CompetitiveGap)
        .expect("gap insight");
    assert_eq!(gap.severity, Severity::High);
    assert_eq!(
        report.summary.competitive_position.as_ref().map(|p| p.tier),
        Some(PositionTier::Lagging)
    );
    assert_eq!(report.visualization_data.competitor_rankings["score"].len(), 6);
}

#[test]
fn test_visualisation_is_limited_to_core_metrics() {
    let mut series = BTreeMap::new();
    series.insert("score".to_string(), daily_series("score", &linear(12, 60.0, 1.0)));
    series.insert("customTimer".to_string(), daily_series("customTimer", &linear(12, 10.0, 1.0)));
    let report = synthesizer()
        .build_report("site", series, &[], &report_options())
        .unwrap();

    assert!(report.trend_analysis.contains_key("customTimer"));
    assert!(report.visualization_data.historical.contains_key("score"));
    assert!(!report.visualization_data.historical.contains_key("customTimer"));
    assert!(report.visualization_data.forecasts.contains_key("score"));
}

#[test]
fn test_short_metric_is_kept_but_not_counted() {
    let mut series = BTreeMap::new();
    series.insert("score".to_string(), daily_series("score", &linear(12, 60.0, 1.0)));
    series.insert("speedIndex".to_string(), daily_series("speedIndex", &[3000.0, 2900.0]));
    let report = synthesizer()
        .build_report("site", series, &[], &report_options())
        .unwrap();

    assert!(!report.trend_analysis["speedIndex"].success);
    assert_eq!(report.summary.metrics_analyzed, 1);
    assert!(!report.predictions["speedIndex"].success);
}

#[test]
fn test_top_changes_are_capped_and_ordered() {
    let mut series = BTreeMap::new();
    for (key, jump) in [("speedIndex", 1.5), ("totalBlockingTime", 2.0), ("firstContentfulPaint", 1.2), ("largestContentfulPaint", 3.0)] {
        let mut values = vec![100.0; 10];
        values.extend(vec![100.0 * jump; 10]);
        series.insert(key.to_string(), daily_series(key, &values));
    }
    let report = synthesizer()
        .build_report("site", series, &[], &report_options())
        .unwrap();

    let changes = &report.historical_analysis.top_changes;
    assert_eq!(changes.len(), 3);
    assert_eq!(changes[0].metric_key, "largestContentfulPaint");
    assert!(changes
        .windows(2)
        .all(|w| w[0].change.percent_change.abs() >= w[1].change.percent_change.abs()));
}

// =============================================================================
// UNIT TESTS - Site Insights Engine
// =============================================================================

fn fast_config() -> InsightsConfig {
    let mut config = InsightsConfig::default();
    config.benchmark.refresh_backoff_ms = 0;
    config.benchmark.refresh_attempts = 2;
    config
}

fn make_engine(config: InsightsConfig, provider: Option<MockProvider>) -> (Arc<SiteInsightsEngine>, Arc<InMemoryMetricsStore>) {
    let store = Arc::new(InMemoryMetricsStore::default());
    let mut engine = SiteInsightsEngine::new(config, store.clone()).unwrap();
    if let Some(provider) = provider {
        let provider: Arc<dyn PerformanceProvider + Send + Sync> = Arc::new(provider);
        engine = engine.with_provider(provider);
    }
    (Arc::new(engine), store)
}

async fn seed_history(engine: &SiteInsightsEngine, days: i64) {
    for day in 0..days {
        let metrics = metric_map(&[
            ("score", 60.0 + day as f64),
            ("largestContentfulPaint", 3000.0 - 20.0 * day as f64),
        ]);
        engine
            .store_snapshot("site", metrics, Some(base() + Duration::days(day)))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_invalid_snapshots_are_rejected() {
    let (engine, _) = make_engine(fast_config(), None);
    let empty = engine.store_snapshot("site", MetricMap::new(), None).await.unwrap_err();
    assert!(matches!(empty, InsightsError::InvalidData { .. }));

    let nan = engine
        .store_snapshot("site", metric_map(&[("score", f64::NAN)]), None)
        .await
        .unwrap_err();
    assert!(matches!(nan, InsightsError::InvalidData { .. }));

    let no_site = engine
        .store_snapshot(" ", metric_map(&[("score", 1.0)]), None)
        .await
        .unwrap_err();
    assert!(matches!(no_site, InsightsError::InvalidData { .. }));
}

#[tokio::test]
async fn test_report_for_unknown_site_is_no_history() {
    let (engine, _) = make_engine(fast_config(), None);
    let err = engine.get_report("nobody", report_options()).await.unwrap_err();
    assert!(matches!(err, InsightsError::NoHistoricalData { .. }));
}

#[tokio::test]
async fn test_engine_builds_report_from_store() {
    let (engine, _) = make_engine(fast_config(), None);
    seed_history(&engine, 30).await;

    let report = engine.get_report("site", report_options()).await.unwrap();
    assert_eq!(report.historical_analysis.snapshot_count, 30);
    assert_eq!(report.summary.metrics_analyzed, 2);
    assert_eq!(report.summary.overall_direction, OverallDirection::Improving);
    assert_eq!(report.predictions.len(), 2);
    assert!(report.competitor_benchmarks.is_none());
}

#[tokio::test]
async fn test_engine_and_synthesizer_agree_on_history() {
    let (engine, store) = make_engine(fast_config(), None);
    seed_history(&engine, 25).await;
    // Carries no tracked metric, so neither path counts it.
    engine
        .store_snapshot("site", metric_map(&[("customTimer", 5.0)]), Some(base() + Duration::hours(12)))
        .await
        .unwrap();

    let options = report_options();
    let from_engine = engine.get_report("site", options.clone()).await.unwrap();

    let snapshots = store
        .fetch_range("site", options.period_start(), options.period_end())
        .await
        .unwrap();
    let series: BTreeMap<String, MetricSeries> = options
        .tracked_metrics
        .iter()
        .map(|key| (key.clone(), MetricSeries::from_snapshots("site", key.as_str(), &snapshots)))
        .collect();
    let from_synthesizer = synthesizer().build_report("site", series, &[], &options).unwrap();

    assert_eq!(from_engine.historical_analysis.snapshot_count, 25);
    assert_eq!(from_engine.historical_analysis, from_synthesizer.historical_analysis);
    assert_eq!(from_engine.trend_analysis, from_synthesizer.trend_analysis);
    assert_eq!(from_engine.predictions, from_synthesizer.predictions);
}

#[tokio::test]
async fn test_untracked_metrics_only_is_no_history() {
    let (engine, _) = make_engine(fast_config(), None);
    engine
        .store_snapshot("site", metric_map(&[("customTimer", 5.0)]), Some(base() + Duration::days(1)))
        .await
        .unwrap();
    let err = engine.get_report("site", report_options()).await.unwrap_err();
    assert!(matches!(err, InsightsError::NoHistoricalData { .. }));
}

#[tokio::test]
async fn test_prediction_can_be_disabled() {
    let (engine, _) = make_engine(fast_config(), None);
    seed_history(&engine, 15).await;
    let options = ReportOptions {
        enable_prediction: false,
        ..report_options()
    };
    let report = engine.get_report("site", options).await.unwrap();
    assert!(report.predictions.is_empty());
    assert!(report.visualization_data.forecasts.is_empty());
}

#[tokio::test]
async fn test_duplicate_registration_is_idempotent() {
    let (engine, store) = make_engine(fast_config(), None);
    let first = engine
        .register_competitor("site", "rival.example", RegisterOptions::default())
        .await
        .unwrap();
    let second = engine
        .register_competitor("site", "https://rival.example/about", RegisterOptions::default())
        .await
        .unwrap();

    assert!(first.success && second.success);
    assert_eq!(first.competitor_url, second.competitor_url);
    assert_eq!(store.load_competitors("site").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_engine_enforces_competitor_cap() {
    let mut config = fast_config();
    config.benchmark.max_competitors = 1;
    let (engine, _) = make_engine(config, None);
    engine
        .register_competitor("site", "a.example", RegisterOptions::default())
        .await
        .unwrap();
    let err = engine
        .register_competitor("site", "b.example", RegisterOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, InsightsError::CapacityError { limit: 1 }));
}

#[tokio::test]
async fn test_analyze_immediately_measures_new_competitor() {
    let provider = MockProvider::new().with_metrics(metric_map(&[("score", 77.0)]));
    let (engine, store) = make_engine(fast_config(), Some(provider));
    let options = RegisterOptions {
        analyze_immediately: true,
        ..RegisterOptions::default()
    };
    let response = engine.register_competitor("site", "rival.example", options).await.unwrap();
    assert!(response.success);

    let stored = store.load_competitors("site").await.unwrap();
    assert_eq!(stored[0].version, 2);
    assert_eq!(stored[0].metric("score"), Some(77.0));
}

#[tokio::test]
async fn test_failed_measurement_still_registers() {
    let provider = MockProvider::new();
    let (engine, store) = make_engine(fast_config(), Some(provider));
    let options = RegisterOptions {
        analyze_immediately: true,
        ..RegisterOptions::default()
    };
    let response = engine.register_competitor("site", "rival.example", options).await.unwrap();
    assert!(response.success);
    assert!(response.message.contains("failed"));
    assert_eq!(store.load_competitors("site").await.unwrap()[0].version, 1);
}

#[tokio::test]
async fn test_refresh_failure_keeps_report_alive() {
    let provider = MockProvider::new()
        .with_response("https://rival.example", Err(ProviderError::ServiceUnavailable))
        .with_response("https://rival.example", Err(ProviderError::ServiceUnavailable));
    let (engine, store) = make_engine(fast_config(), Some(provider));
    seed_history(&engine, 20).await;
    store
        .save_competitor(&scored("https://rival.example", 95.0), None)
        .await
        .unwrap();

    let report = engine.get_report("site", report_options()).await.unwrap();
    let benchmarks = report.competitor_benchmarks.unwrap();
    assert_eq!(benchmarks.competitor_count, 1);
    assert_eq!(benchmarks.outdated_competitors, vec!["https://rival.example".to_string()]);
    assert_eq!(benchmarks.comparisons["score"].competitor_count, 1);
}

#[tokio::test]
async fn test_concurrent_refreshes_of_one_competitor_are_serialised() {
    let provider = MockProvider::new().with_metrics(metric_map(&[("score", 64.0)]));
    let (engine, store) = make_engine(fast_config(), Some(provider));
    engine
        .register_competitor("site", "rival.example", RegisterOptions::default())
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        engine.refresh_competitor("site", "rival.example"),
        engine.refresh_competitor("site", "https://rival.example")
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(store.load_competitors("site").await.unwrap()[0].version, 3);
}

#[tokio::test]
async fn test_idle_competitor_locks_are_released() {
    let provider = MockProvider::new().with_metrics(metric_map(&[("score", 64.0)]));
    let mut config = fast_config();
    config.benchmark.max_competitors = 5;
    let (engine, _) = make_engine(config, Some(provider));

    for n in 0..5 {
        let url = format!("rival-{}.example", n);
        engine
            .register_competitor("site", &url, RegisterOptions::default())
            .await
            .unwrap();
        engine.refresh_competitor("site", &url).await.unwrap();
    }
    // Failures release their lock too.
    assert!(engine.refresh_competitor("site", "unknown.example").await.is_err());
    let err = engine
        .register_competitor("site", "rival-5.example", RegisterOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, InsightsError::CapacityError { limit: 5 }));

    let (a, b) = tokio::join!(
        engine.refresh_competitor("site", "rival-0.example"),
        engine.refresh_competitor("site", "rival-0.example")
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(engine.competitor_lock_count().await, 0);
}

#[tokio::test]
async fn test_measurement_is_retried_up_to_the_attempt_limit() {
    let provider = Arc::new(
        MockProvider::new()
            .with_response("https://rival.example", Err(ProviderError::ServiceUnavailable))
            .with_metrics(metric_map(&[("score", 70.0)])),
    );
    let store = Arc::new(InMemoryMetricsStore::default());
    let engine = SiteInsightsEngine::new(fast_config(), store.clone())
        .unwrap()
        .with_provider(provider.clone());
    engine
        .register_competitor("site", "rival.example", RegisterOptions::default())
        .await
        .unwrap();

    let record = engine.refresh_competitor("site", "rival.example").await.unwrap();
    assert_eq!(record.metric("score"), Some(70.0));
    assert_eq!(provider.calls(), 2);

    // With no fallback metrics every attempt fails, and attempts stop at the limit.
    let failing = Arc::new(MockProvider::new());
    let engine = SiteInsightsEngine::new(fast_config(), store)
        .unwrap()
        .with_provider(failing.clone());
    assert!(engine.refresh_competitor("site", "rival.example").await.is_err());
    assert_eq!(failing.calls(), 2);
}

#[tokio::test]
async fn test_refresh_without_provider_is_config_error() {
    let (engine, _) = make_engine(fast_config(), None);
    let err = engine.refresh_competitor("site", "rival.example").await.unwrap_err();
    assert!(matches!(err, InsightsError::ConfigError { .. }));
}

#[tokio::test]
async fn test_engine_compare_uses_latest_site_value() {
    let (engine, store) = make_engine(fast_config(), None);
    let now = Utc::now();
    engine
        .store_snapshot("site", metric_map(&[("score", 50.0)]), Some(now - Duration::days(2)))
        .await
        .unwrap();
    engine
        .store_snapshot("site", metric_map(&[("score", 80.0)]), Some(now - Duration::days(1)))
        .await
        .unwrap();
    for (url, score) in [("https://a.example", 90.0), ("https://b.example", 70.0), ("https://c.example", 60.0)] {
        store.save_competitor(&scored(url, score), None).await.unwrap();
    }

    let comparison = engine.compare_metric("site", "score", 30).await.unwrap();
    assert_eq!(comparison.site_value, 80.0);
    assert_eq!(comparison.stats.unwrap().position, 2);
}

/// Store whose reads take longer than any reasonable report budget.
struct SlowStore {
    inner: InMemoryMetricsStore,
}

#[async_trait]
impl MetricsStore for SlowStore {
    async fn store(&self, snapshot: MetricSnapshot) -> Result<StoreAck, InsightsError> {
        self.inner.store(snapshot).await
    }

    async fn fetch_range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, InsightsError> {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        self.inner.fetch_range(site_id, start, end).await
    }

    async fn load_competitors(&self, site_id: &str) -> Result<Vec<CompetitorRecord>, InsightsError> {
        self.inner.load_competitors(site_id).await
    }

    async fn save_competitor(
        &self,
        record: &CompetitorRecord,
        expected_version: Option<u64>,
    ) -> Result<(), InsightsError> {
        self.inner.save_competitor(record, expected_version).await
    }

    fn backend_name(&self) -> &str {
        "slow"
    }
}

#[tokio::test(start_paused = true)]
async fn test_report_is_bounded_by_timeout() {
    let mut config = fast_config();
    config.report.timeout_seconds = 1;
    let store = Arc::new(SlowStore {
        inner: InMemoryMetricsStore::default(),
    });
    let engine = Arc::new(SiteInsightsEngine::new(config, store).unwrap());

    let err = engine.get_report("site", report_options()).await.unwrap_err();
    assert!(matches!(err, InsightsError::Timeout { seconds: 1, .. }));
}

// =============================================================================
// PROPERTY-BASED TESTS
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_percentile_stays_within_range(
        mut values in prop::collection::vec(-1.0e6f64..1.0e6, 1..50),
        p in 0.0f64..=100.0,
    ) {
        values.sort_by(|a, b| a.total_cmp(b));
        let result = crate::insights::calculator::percentile(&values, p).unwrap();
        prop_assert!(result >= values[0] - 1e-9);
        prop_assert!(result <= values[values.len() - 1] + 1e-9);
    }

    #[test]
    fn prop_ensemble_lies_between_algorithms(
        a in -1000.0f64..1000.0,
        b in -1000.0f64..1000.0,
        wa in 0.0f64..1.0,
        wb in 0.0f64..1.0,
        horizon in 1usize..10,
    ) {
        let engine = stub_engine(vec![
            (Arc::new(Constant { name: "a", value: a }), wa),
            (Arc::new(Constant { name: "b", value: b }), wb),
        ]);
        let result = engine.forecast(&daily_series("score", &linear(12, 1.0, 1.0)), horizon).unwrap();
        for point in &result.ensemble {
            prop_assert!(point.value >= a.min(b) - 1e-9);
            prop_assert!(point.value <= a.max(b) + 1e-9);
        }
    }

    #[test]
    fn prop_interval_width_strictly_increases(
        std_dev in 0.01f64..1000.0,
        horizon in 2usize..30,
        center in -1000.0f64..1000.0,
    ) {
        let points: Vec<ForecastPoint> = (1..=horizon)
            .map(|day| ForecastPoint { timestamp: base() + Duration::days(day as i64), value: center, day })
            .collect();
        let intervals = confidence_intervals(&points, std_dev, 0.95);
        for pair in intervals.windows(2) {
            prop_assert!(pair[1].upper - pair[1].lower > pair[0].upper - pair[0].lower);
        }
    }

    #[test]
    fn prop_ranking_bounds(
        site in 0.0f64..100.0,
        others in prop::collection::vec(0.0f64..100.0, 1..12),
    ) {
        let competitors: Vec<CompetitorRecord> = others
            .iter()
            .enumerate()
            .map(|(i, v)| scored(&format!("https://c{}.example", i), *v))
            .collect();
        let comparison = benchmark_engine(20)
            .compare_metric("site", "score", &metric_map(&[("score", site)]), &competitors)
            .unwrap();
        let stats = comparison.stats.unwrap();
        prop_assert!(stats.position >= 1 && stats.position <= others.len() + 1);
        prop_assert!(stats.percentile > 0.0 && stats.percentile <= 100.0);
        prop_assert_eq!(comparison.rankings.len(), others.len() + 1);
        prop_assert_eq!(comparison.rankings.iter().filter(|r| r.is_site).count(), 1);
    }

    #[test]
    fn prop_direction_respects_polarity(slope in 0.01f64..50.0) {
        let analyzer = analyzer();
        let rising_score = analyzer.analyze(&daily_series("score", &linear(8, 10.0, slope))).unwrap();
        let rising_lcp = analyzer.analyze(&daily_series("largestContentfulPaint", &linear(8, 10.0, slope))).unwrap();
        prop_assert_eq!(rising_score.direction(), Some(TrendDirection::Improving));
        prop_assert_eq!(rising_lcp.direction(), Some(TrendDirection::Degrading));
    }
}
