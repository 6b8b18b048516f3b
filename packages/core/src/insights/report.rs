//! Report Synthesizer
//!
//! Merges trend analyses, forecasts and competitor benchmarks into a single
//! [`Report`]: a summary, ranked historical highlights, insights paired with
//! recommendations, and visualisation-ready series for the core metrics.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::insights::{
    benchmark::BenchmarkEngine,
    catalog::{MetricCatalog, CORE_METRICS},
    config::ReportConfig,
    error::InsightsError,
    forecast::ForecastEngine,
    trend::TrendAnalyzer,
    types::*,
};

/// Caller-facing options for a report request.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub tracking_period_days: u32,
    pub tracked_metrics: Vec<String>,
    pub enable_prediction: bool,
    pub prediction_horizon_days: usize,
    /// Re-measure outdated competitors before benchmarking (best-effort).
    pub refresh_competitors: bool,
    /// End of the analysed window; defaults to now.
    pub as_of: Option<DateTime<Utc>>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            tracking_period_days: 30,
            tracked_metrics: CORE_METRICS.iter().map(|k| k.to_string()).collect(),
            enable_prediction: true,
            prediction_horizon_days: 7,
            refresh_competitors: true,
            as_of: None,
        }
    }
}

impl ReportOptions {
    pub fn period_end(&self) -> DateTime<Utc> {
        self.as_of.unwrap_or_else(Utc::now)
    }

    pub fn period_start(&self) -> DateTime<Utc> {
        self.period_end() - Duration::days(i64::from(self.tracking_period_days))
    }

    /// Forecast horizon, or `None` when prediction is disabled.
    pub fn forecast_horizon(&self) -> Option<usize> {
        self.enable_prediction.then_some(self.prediction_horizon_days)
    }
}

/// Already-computed per-metric results, ready to be merged.
#[derive(Debug, Clone, Default)]
pub struct AnalysisBundle {
    pub series: BTreeMap<String, MetricSeries>,
    pub trends: BTreeMap<String, TrendResult>,
    pub forecasts: BTreeMap<String, ForecastResult>,
    pub benchmarks: Option<CompetitorBenchmarks>,
    pub snapshot_count: usize,
}

/// Trend and optional forecast for one metric.
#[derive(Debug)]
pub struct MetricOutcome {
    pub metric_key: String,
    pub trend: Result<TrendResult, InsightsError>,
    pub forecast: Option<Result<ForecastResult, InsightsError>>,
}

/// Analyse one series and, when `horizon_days` is set, forecast it.
/// Pure and CPU-bound; callers may run it on a blocking thread.
pub fn analyze_metric(
    analyzer: &TrendAnalyzer,
    forecaster: &ForecastEngine,
    metric_key: &str,
    series: &MetricSeries,
    horizon_days: Option<usize>,
) -> MetricOutcome {
    MetricOutcome {
        metric_key: metric_key.to_string(),
        trend: analyzer.analyze(series),
        forecast: horizon_days.map(|days| forecaster.forecast(series, days)),
    }
}

/// Number of distinct snapshot timestamps across the series, i.e. the
/// snapshots that carried at least one of the analysed metrics.
pub fn snapshot_count(series: &BTreeMap<String, MetricSeries>) -> usize {
    series
        .values()
        .flat_map(|s| s.points().iter().map(|p| p.timestamp))
        .collect::<BTreeSet<_>>()
        .len()
}

/// Latest value of every non-empty series: the site's current metrics.
pub fn latest_metrics(series: &BTreeMap<String, MetricSeries>) -> MetricMap {
    series
        .iter()
        .filter_map(|(key, s)| s.last().map(|p| (key.clone(), p.value)))
        .collect()
}

/// Builds reports from series and competitor data
#[derive(Debug, Clone)]
pub struct ReportSynthesizer {
    config: ReportConfig,
    catalog: Arc<MetricCatalog>,
    analyzer: Arc<TrendAnalyzer>,
    forecaster: Arc<ForecastEngine>,
    benchmark: BenchmarkEngine,
}

impl ReportSynthesizer {
    pub fn new(
        config: ReportConfig,
        catalog: Arc<MetricCatalog>,
        analyzer: Arc<TrendAnalyzer>,
        forecaster: Arc<ForecastEngine>,
        benchmark: BenchmarkEngine,
    ) -> Self {
        Self {
            config,
            catalog,
            analyzer,
            forecaster,
            benchmark,
        }
    }

    /// Analyse, forecast and benchmark every series in turn, then merge.
    ///
    /// A metric whose analysis or forecast fails is logged and left out;
    /// the report only fails when there is no data at all.
    pub fn build_report(
        &self,
        site_id: &str,
        series: BTreeMap<String, MetricSeries>,
        competitors: &[CompetitorRecord],
        options: &ReportOptions,
    ) -> Result<Report, InsightsError> {
        let series: BTreeMap<String, MetricSeries> =
            series.into_iter().filter(|(_, s)| !s.is_empty()).collect();
        if series.is_empty() {
            return Err(InsightsError::NoHistoricalData {
                site_id: site_id.to_string(),
            });
        }

        let horizon = options.forecast_horizon();
        let outcomes: Vec<MetricOutcome> = series
            .iter()
            .map(|(key, s)| analyze_metric(&self.analyzer, &self.forecaster, key, s, horizon))
            .collect();

        Ok(self.assemble(site_id, series, outcomes, competitors, options, |key, stage, err| {
            tracing::warn!(metric = key, stage, "Analysis failed, omitting metric: {}", err)
        }))
    }

    /// Collect per-metric outcomes, benchmark against `competitors` and
    /// synthesize. Failed outcomes are passed to `on_failure` and omitted.
    pub fn assemble<I, F>(
        &self,
        site_id: &str,
        series: BTreeMap<String, MetricSeries>,
        outcomes: I,
        competitors: &[CompetitorRecord],
        options: &ReportOptions,
        mut on_failure: F,
    ) -> Report
    where
        I: IntoIterator<Item = MetricOutcome>,
        F: FnMut(&str, &str, &InsightsError),
    {
        let mut bundle = AnalysisBundle {
            snapshot_count: snapshot_count(&series),
            ..AnalysisBundle::default()
        };

        for outcome in outcomes {
            match outcome.trend {
                Ok(result) => {
                    bundle.trends.insert(outcome.metric_key.clone(), result);
                }
                Err(err) => on_failure(&outcome.metric_key, "trend", &err),
            }
            match outcome.forecast {
                Some(Ok(result)) => {
                    bundle.forecasts.insert(outcome.metric_key.clone(), result);
                }
                Some(Err(err)) => on_failure(&outcome.metric_key, "forecast", &err),
                None => {}
            }
        }

        if !competitors.is_empty() {
            bundle.benchmarks = Some(self.benchmark.benchmarks(
                site_id,
                &latest_metrics(&series),
                competitors,
                &options.tracked_metrics,
                options.period_end(),
            ));
        }

        bundle.series = series;
        self.synthesize(site_id, bundle, options)
    }

    /// Merge pre-computed results into a report. Pure; no analysis runs here.
    pub fn synthesize(&self, site_id: &str, bundle: AnalysisBundle, options: &ReportOptions) -> Report {
        let overall_trend = self.analyzer.overall_trend(bundle.trends.values());
        let top_changes = self.top_changes(&bundle.trends);
        let top_anomalies = self.top_anomalies(&bundle.trends);
        let seasonality_patterns = self.seasonality_patterns(&bundle.trends);

        let competitive_position = bundle
            .benchmarks
            .as_ref()
            .and_then(|b| b.competitive_position.clone());

        let insights = self.generate_insights(&bundle, &top_changes);
        let recommendations = self.generate_recommendations(&insights);
        let visualization_data = self.visualization_data(&bundle);

        let first_snapshot = bundle
            .series
            .values()
            .filter_map(|s| s.first().map(|p| p.timestamp))
            .min();
        let last_snapshot = bundle
            .series
            .values()
            .filter_map(|s| s.last().map(|p| p.timestamp))
            .max();

        let metrics_analyzed = bundle.trends.values().filter(|t| t.success).count();
        let high_severity_count = insights.iter().filter(|i| i.severity == Severity::High).count();

        let summary = ReportSummary {
            site_id: site_id.to_string(),
            tracking_period_days: options.tracking_period_days,
            period_start: options.period_start(),
            period_end: options.period_end(),
            metrics_analyzed,
            overall_direction: overall_trend.direction,
            competitive_position,
            insight_count: insights.len(),
            high_severity_count,
            headline: headline(&overall_trend, high_severity_count),
        };

        Report {
            site_id: site_id.to_string(),
            generated_at: Utc::now(),
            summary,
            historical_analysis: HistoricalAnalysis {
                snapshot_count: bundle.snapshot_count,
                first_snapshot,
                last_snapshot,
                overall_trend,
                top_changes,
                top_anomalies,
                seasonality_patterns,
            },
            trend_analysis: bundle.trends,
            competitor_benchmarks: bundle.benchmarks,
            predictions: bundle.forecasts,
            insights_and_recommendations: InsightsAndRecommendations {
                insights,
                recommendations,
            },
            visualization_data,
        }
    }

    /// Largest significant changes across all metrics, by magnitude.
    pub fn top_changes(&self, trends: &BTreeMap<String, TrendResult>) -> Vec<MetricChange> {
        let mut changes: Vec<MetricChange> = trends
            .values()
            .filter_map(|t| t.analysis.as_ref().map(|a| (t, a)))
            .flat_map(|(t, a)| {
                a.significant_changes.iter().map(move |change| MetricChange {
                    metric_key: t.metric_key.clone(),
                    display_name: t.display_name.clone(),
                    change: change.clone(),
                })
            })
            .collect();
        changes.sort_by(|a, b| {
            b.change
                .percent_change
                .abs()
                .total_cmp(&a.change.percent_change.abs())
        });
        changes.truncate(self.config.top_changes);
        changes
    }

    /// Most extreme anomalies across all metrics, by absolute z-score.
    pub fn top_anomalies(&self, trends: &BTreeMap<String, TrendResult>) -> Vec<MetricAnomaly> {
        let mut anomalies: Vec<MetricAnomaly> = trends
            .values()
            .filter_map(|t| t.analysis.as_ref().map(|a| (t, a)))
            .flat_map(|(t, a)| {
                a.anomalies.iter().map(move |anomaly| MetricAnomaly {
                    metric_key: t.metric_key.clone(),
                    display_name: t.display_name.clone(),
                    anomaly: anomaly.clone(),
                })
            })
            .collect();
        anomalies.sort_by(|a, b| b.anomaly.z_score.abs().total_cmp(&a.anomaly.z_score.abs()));
        anomalies.truncate(self.config.top_anomalies);
        anomalies
    }

    fn seasonality_patterns(&self, trends: &BTreeMap<String, TrendResult>) -> Vec<SeasonalityPattern> {
        trends
            .values()
            .filter_map(|t| {
                let seasonality = t.analysis.as_ref()?.seasonality.clone()?;
                Some(SeasonalityPattern {
                    metric_key: t.metric_key.clone(),
                    display_name: t.display_name.clone(),
                    seasonality,
                })
            })
            .collect()
    }

    /// Insights from trends, large changes, competitor gaps and forecasts,
    /// ordered by severity.
    pub fn generate_insights(&self, bundle: &AnalysisBundle, top_changes: &[MetricChange]) -> Vec<Insight> {
        let mut insights = Vec::new();
        let large = self.config.large_change_threshold;

        for trend in bundle.trends.values() {
            if !self.catalog.is_core(&trend.metric_key) {
                continue;
            }
            let Some(analysis) = trend.analysis.as_ref() else {
                continue;
            };
            let change = analysis.trend.percent_change;
            match analysis.trend.direction {
                TrendDirection::Degrading => insights.push(Insight {
                    kind: InsightKind::DegradingMetric,
                    impact: Impact::Negative,
                    severity: if change.abs() >= large { Severity::High } else { Severity::Medium },
                    metric_key: trend.metric_key.clone(),
                    title: format!("{} is degrading", trend.display_name),
                    description: format!(
                        "{} moved {:+.1}% over the tracking period (R² {:.2}).",
                        trend.display_name, change, analysis.trend.r_squared
                    ),
                }),
                TrendDirection::Improving => insights.push(Insight {
                    kind: InsightKind::ImprovingMetric,
                    impact: Impact::Positive,
                    severity: Severity::Low,
                    metric_key: trend.metric_key.clone(),
                    title: format!("{} is improving", trend.display_name),
                    description: format!(
                        "{} moved {:+.1}% over the tracking period.",
                        trend.display_name, change
                    ),
                }),
                TrendDirection::Stable => {}
            }
        }

        for item in top_changes {
            let pct = item.change.percent_change;
            if pct.abs() < large {
                continue;
            }
            let rising = item.change.direction == ChangeDirection::Increase;
            let worse = rising != self.catalog.higher_is_better(&item.metric_key);
            insights.push(Insight {
                kind: InsightKind::SignificantChange,
                impact: if worse { Impact::Negative } else { Impact::Positive },
                severity: match (worse, pct.abs() >= 2.0 * large) {
                    (true, true) => Severity::High,
                    (true, false) => Severity::Medium,
                    (false, _) => Severity::Low,
                },
                metric_key: item.metric_key.clone(),
                title: format!("Sudden change in {}", item.display_name),
                description: format!(
                    "{} changed {:+.1}% between {} and {} ({:.2} → {:.2}).",
                    item.display_name,
                    pct,
                    item.change.from_timestamp.format("%Y-%m-%d"),
                    item.change.to_timestamp.format("%Y-%m-%d"),
                    item.change.from_value,
                    item.change.to_value
                ),
            });
        }

        if let Some(benchmarks) = bundle.benchmarks.as_ref() {
            for comparison in benchmarks.comparisons.values() {
                let Some(stats) = comparison.stats.as_ref() else {
                    continue;
                };
                let (kind, impact, severity) = match stats.status {
                    BenchmarkStatus::Poor => (InsightKind::CompetitiveGap, Impact::Negative, Severity::High),
                    BenchmarkStatus::BelowAverage => {
                        (InsightKind::CompetitiveGap, Impact::Negative, Severity::Medium)
                    }
                    BenchmarkStatus::Excellent => {
                        (InsightKind::CompetitiveStrength, Impact::Positive, Severity::Low)
                    }
                    _ => continue,
                };
                let title = if impact == Impact::Negative {
                    format!("{} trails competitors", comparison.display_name)
                } else {
                    format!("{} leads competitors", comparison.display_name)
                };
                insights.push(Insight {
                    kind,
                    impact,
                    severity,
                    metric_key: comparison.metric_key.clone(),
                    title,
                    description: format!(
                        "Ranked {} of {} ({:.0}th percentile), {:+.1}% from the competitor average.",
                        stats.position,
                        comparison.competitor_count + 1,
                        stats.percentile,
                        stats.percent_diff_from_avg
                    ),
                });
            }
        }

        for forecast in bundle.forecasts.values() {
            let Some(summary) = forecast.summary.as_ref() else {
                continue;
            };
            if summary.is_positive_change
                || summary.percent_change.abs() < self.config.predicted_change_threshold
            {
                continue;
            }
            insights.push(Insight {
                kind: InsightKind::PredictedDegradation,
                impact: Impact::Negative,
                severity: if summary.percent_change.abs() >= large {
                    Severity::High
                } else {
                    Severity::Medium
                },
                metric_key: forecast.metric_key.clone(),
                title: format!("{} is forecast to degrade", forecast.display_name),
                description: format!(
                    "Expected to move {:+.1}% over the next {} days ({:?} stability).",
                    summary.percent_change, forecast.horizon_days, summary.stability
                ),
            });
        }

        insights.sort_by_key(|i| i.severity);
        insights
    }

    /// One recommendation per negative insight, with the metric's canned actions.
    pub fn generate_recommendations(&self, insights: &[Insight]) -> Vec<Recommendation> {
        let mut recommendations: Vec<Recommendation> = insights
            .iter()
            .filter(|i| i.impact == Impact::Negative)
            .map(|insight| {
                let name = self.catalog.display_name(&insight.metric_key);
                let title = match insight.kind {
                    InsightKind::CompetitiveGap => format!("Close the {} gap with competitors", name),
                    InsightKind::PredictedDegradation => format!("Prevent the forecast {} regression", name),
                    _ => format!("Improve {}", name),
                };
                Recommendation {
                    kind: insight.kind,
                    severity: insight.severity,
                    metric_key: insight.metric_key.clone(),
                    title,
                    actions: self.catalog.recommended_actions(&insight.metric_key),
                }
            })
            .collect();
        recommendations.sort_by_key(|r| r.severity);
        recommendations
    }

    /// Series, rankings and forecast bands for the core metrics only.
    pub fn visualization_data(&self, bundle: &AnalysisBundle) -> VisualizationData {
        let core = |key: &str| self.catalog.is_core(key);

        let historical = bundle
            .series
            .iter()
            .filter(|(key, _)| core(key.as_str()))
            .map(|(key, s)| (key.clone(), s.points().to_vec()))
            .collect();

        let competitor_rankings = bundle
            .benchmarks
            .as_ref()
            .map(|b| {
                b.comparisons
                    .iter()
                    .filter(|(key, _)| core(key.as_str()))
                    .map(|(key, c)| (key.clone(), c.rankings.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let forecasts = bundle
            .forecasts
            .iter()
            .filter(|(key, f)| core(key.as_str()) && f.success)
            .map(|(key, f)| {
                (
                    key.clone(),
                    ForecastBand {
                        display_name: f.display_name.clone(),
                        points: f.confidence_intervals.clone(),
                    },
                )
            })
            .collect();

        VisualizationData {
            historical,
            competitor_rankings,
            forecasts,
        }
    }
}

fn headline(overall: &OverallTrend, high_severity: usize) -> String {
    let base = match overall.direction {
        OverallDirection::Improving => format!(
            "Performance is improving: {} of {} metrics trending better",
            overall.improving, overall.analyzed
        ),
        OverallDirection::Degrading => format!(
            "Performance is degrading: {} of {} metrics trending worse",
            overall.degrading, overall.analyzed
        ),
        OverallDirection::Stable if overall.analyzed == 0 => {
            "Not enough data to determine a trend".to_string()
        }
        OverallDirection::Stable => format!("Performance is stable across {} metrics", overall.analyzed),
        OverallDirection::Mixed => format!(
            "Mixed results: {} improving, {} degrading, {} stable",
            overall.improving, overall.degrading, overall.stable
        ),
    };
    if high_severity > 0 {
        format!("{} ({} high-severity issues)", base, high_severity)
    } else {
        base
    }
}
