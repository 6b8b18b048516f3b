//! Core data types for site insights

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw metric values keyed by metric name (e.g. `largestContentfulPaint`).
pub type MetricMap = BTreeMap<String, f64>;

/// One timestamped measurement of all tracked metrics for a site.
///
/// Identified by `(site_id, timestamp)`; never mutated after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub site_id: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: MetricMap,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl MetricSnapshot {
    pub fn new(site_id: impl Into<String>, timestamp: DateTime<Utc>, metrics: MetricMap) -> Self {
        Self {
            site_id: site_id.into(),
            timestamp,
            metrics,
            source: "measurement".to_string(),
            tags: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }
}

/// Acknowledgement returned once a snapshot has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreAck {
    pub site_id: String,
    pub timestamp: DateTime<Utc>,
    pub metric_count: usize,
}

/// Aggregation interval for snapshot queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl std::str::FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(format!("Invalid interval: {}", other)),
        }
    }
}

/// A single `(timestamp, value)` observation of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Time-ordered values of one metric for one site.
///
/// Timestamps are strictly increasing; constructors sort and drop
/// duplicates (the later insertion wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub site_id: String,
    pub metric_key: String,
    points: Vec<SeriesPoint>,
}

impl MetricSeries {
    pub fn new(
        site_id: impl Into<String>,
        metric_key: impl Into<String>,
        mut points: Vec<SeriesPoint>,
    ) -> Self {
        // Stable sort keeps insertion order among equal timestamps, so the
        // last duplicate is the one retained below.
        points.sort_by_key(|p| p.timestamp);
        let mut deduped: Vec<SeriesPoint> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => deduped.push(point),
            }
        }

        Self {
            site_id: site_id.into(),
            metric_key: metric_key.into(),
            points: deduped,
        }
    }

    /// Build the series for `metric_key` from snapshots, skipping snapshots
    /// that lack the key.
    pub fn from_snapshots(
        site_id: impl Into<String>,
        metric_key: impl Into<String>,
        snapshots: &[MetricSnapshot],
    ) -> Self {
        let metric_key = metric_key.into();
        let points = snapshots
            .iter()
            .filter_map(|s| {
                s.metric(&metric_key).map(|value| SeriesPoint {
                    timestamp: s.timestamp,
                    value,
                })
            })
            .collect();
        Self::new(site_id, metric_key, points)
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&SeriesPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&SeriesPoint> {
        self.points.last()
    }
}

// =============================================================================
// Trend analysis
// =============================================================================

/// Direction of a single metric, interpreted through its polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Degrading,
    Stable,
}

/// Direction across all analysed metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallDirection {
    Improving,
    Degrading,
    Stable,
    Mixed,
}

/// Descriptive statistics of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStatistics {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub percentiles: Percentiles,
    pub first_value: f64,
    pub last_value: f64,
    pub total_change: f64,
    pub percent_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

/// Ordinary-least-squares fit of value against days elapsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearTrend {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub direction: TrendDirection,
    pub percent_change: f64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDirection {
    Increase,
    Decrease,
}

/// A jump between consecutive smoothed values above the configured threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificantChange {
    pub from_timestamp: DateTime<Utc>,
    pub to_timestamp: DateTime<Utc>,
    pub from_value: f64,
    pub to_value: f64,
    pub percent_change: f64,
    pub direction: ChangeDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityConfidence {
    High,
    Medium,
}

/// Weekly pattern; day indices run Sunday = 0 through Saturday = 6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seasonality {
    pub day_averages: [f64; 7],
    pub relative_variation: f64,
    pub max_day: usize,
    pub min_day: usize,
    pub max_day_name: String,
    pub min_day_name: String,
    pub confidence: SeasonalityConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyDirection {
    High,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub z_score: f64,
    pub direction: AnomalyDirection,
    pub deviation_percent: f64,
}

/// One projected value, `day` counting from 1 after the last observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub day: usize,
}

/// Full analysis of one series; absent when there was too little data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub statistics: SeriesStatistics,
    pub trend: LinearTrend,
    pub recent_trend: Option<LinearTrend>,
    pub significant_changes: Vec<SignificantChange>,
    pub seasonality: Option<Seasonality>,
    pub anomalies: Vec<Anomaly>,
    pub forecast: Vec<ForecastPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub metric_key: String,
    pub display_name: String,
    pub success: bool,
    pub data_points: usize,
    pub message: Option<String>,
    pub analysis: Option<TrendAnalysis>,
}

impl TrendResult {
    pub fn direction(&self) -> Option<TrendDirection> {
        self.analysis.as_ref().map(|a| a.trend.direction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallTrend {
    pub direction: OverallDirection,
    pub improving: usize,
    pub degrading: usize,
    pub stable: usize,
    pub analyzed: usize,
}

// =============================================================================
// Forecasting
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub timestamp: DateTime<Utc>,
    pub lower: f64,
    pub center: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastStability {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub last_observed: f64,
    pub final_forecast: f64,
    pub percent_change: f64,
    pub is_positive_change: bool,
    pub stability: ForecastStability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub metric_key: String,
    pub display_name: String,
    pub success: bool,
    pub message: Option<String>,
    pub horizon_days: usize,
    pub ensemble: Vec<ForecastPoint>,
    pub by_algorithm: BTreeMap<String, Vec<ForecastPoint>>,
    pub confidence_intervals: Vec<ConfidenceInterval>,
    pub summary: Option<ForecastSummary>,
}

// =============================================================================
// Benchmarking
// =============================================================================

/// A competitor tracked for one site. One record per `(site_id, url)`.
///
/// `version` starts at 1 and is bumped on every metric refresh; stores
/// reject writes carrying a stale version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorRecord {
    pub site_id: String,
    pub url: String,
    pub name: String,
    pub added_at: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
    pub metrics: Option<MetricMap>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
    pub version: u64,
}

impl CompetitorRecord {
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.as_ref().and_then(|m| m.get(key).copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BenchmarkStatus {
    Excellent,
    Good,
    Average,
    BelowAverage,
    Poor,
}

/// One row of a ranking table (the site itself included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub name: String,
    pub url: Option<String>,
    pub value: f64,
    pub is_site: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonStats {
    pub position: usize,
    pub percentile: f64,
    pub status: BenchmarkStatus,
    pub competitor_average: f64,
    pub diff_from_avg: f64,
    pub percent_diff_from_avg: f64,
    pub is_better_than_avg: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    pub site_id: String,
    pub metric_key: String,
    pub display_name: String,
    pub site_value: f64,
    pub higher_is_better: bool,
    pub competitor_count: usize,
    pub rankings: Vec<RankingEntry>,
    pub stats: Option<ComparisonStats>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PositionTier {
    Leader,
    StrongPerformer,
    Average,
    BelowAverage,
    Lagging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitivePosition {
    pub tier: PositionTier,
    pub rank: usize,
    pub percentile: f64,
    pub competitor_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorBenchmarks {
    pub competitor_count: usize,
    pub outdated_competitors: Vec<String>,
    pub comparisons: BTreeMap<String, MetricComparison>,
    pub competitive_position: Option<CompetitivePosition>,
}

/// Outcome of a competitor registration request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub success: bool,
    pub competitor_url: String,
    pub message: String,
}

// =============================================================================
// Reports
// =============================================================================

/// `High` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    DegradingMetric,
    ImprovingMetric,
    SignificantChange,
    CompetitiveGap,
    CompetitiveStrength,
    PredictedDegradation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub impact: Impact,
    pub severity: Severity,
    pub metric_key: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: InsightKind,
    pub severity: Severity,
    pub metric_key: String,
    pub title: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsAndRecommendations {
    pub insights: Vec<Insight>,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricChange {
    pub metric_key: String,
    pub display_name: String,
    pub change: SignificantChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAnomaly {
    pub metric_key: String,
    pub display_name: String,
    pub anomaly: Anomaly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalityPattern {
    pub metric_key: String,
    pub display_name: String,
    pub seasonality: Seasonality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalAnalysis {
    pub snapshot_count: usize,
    pub first_snapshot: Option<DateTime<Utc>>,
    pub last_snapshot: Option<DateTime<Utc>>,
    pub overall_trend: OverallTrend,
    pub top_changes: Vec<MetricChange>,
    pub top_anomalies: Vec<MetricAnomaly>,
    pub seasonality_patterns: Vec<SeasonalityPattern>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub site_id: String,
    pub tracking_period_days: u32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub metrics_analyzed: usize,
    pub overall_direction: OverallDirection,
    pub competitive_position: Option<CompetitivePosition>,
    pub insight_count: usize,
    pub high_severity_count: usize,
    pub headline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastBand {
    pub display_name: String,
    pub points: Vec<ConfidenceInterval>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationData {
    pub historical: BTreeMap<String, Vec<SeriesPoint>>,
    pub competitor_rankings: BTreeMap<String, Vec<RankingEntry>>,
    pub forecasts: BTreeMap<String, ForecastBand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub site_id: String,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub historical_analysis: HistoricalAnalysis,
    pub trend_analysis: BTreeMap<String, TrendResult>,
    pub competitor_benchmarks: Option<CompetitorBenchmarks>,
    pub predictions: BTreeMap<String, ForecastResult>,
    pub insights_and_recommendations: InsightsAndRecommendations,
    pub visualization_data: VisualizationData,
}
