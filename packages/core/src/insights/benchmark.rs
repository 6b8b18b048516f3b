//! Competitor Benchmark Engine
//!
//! Registration rules for competitor records and the ranking of a site
//! against its competitors for one metric. The engine holds no records
//! itself; callers pass in the current list and persist what comes back.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use url::Url;

use crate::insights::{
    calculator,
    catalog::{MetricCatalog, POSITION_METRIC},
    config::BenchmarkConfig,
    error::InsightsError,
    types::*,
};

/// Options accepted when registering a competitor.
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub name: Option<String>,
    pub analyze_immediately: bool,
    pub tags: Vec<String>,
    pub notes: String,
}

/// Result of a registration attempt. Registering an existing competitor
/// is not an error; the stored record is handed back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Created(CompetitorRecord),
    Existing(CompetitorRecord),
}

impl Registration {
    pub fn record(&self) -> &CompetitorRecord {
        match self {
            Registration::Created(record) | Registration::Existing(record) => record,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Registration::Created(_))
    }
}

/// Reduce a URL to its origin (`scheme://host[:port]`). URLs without a
/// scheme are assumed to be `https`.
pub fn normalize_url(raw: &str) -> Result<String, InsightsError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InsightsError::invalid_data("competitor URL is empty"));
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let parsed = Url::parse(&with_scheme)
        .map_err(|err| InsightsError::invalid_data(format!("invalid competitor URL {}: {}", raw, err)))?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return Err(InsightsError::invalid_data(format!("competitor URL {} has no origin", raw)));
    }
    Ok(origin.ascii_serialization())
}

/// Percentile bucket used for per-metric comparisons.
pub fn status_for(percentile: f64) -> BenchmarkStatus {
    if percentile >= 80.0 {
        BenchmarkStatus::Excellent
    } else if percentile >= 60.0 {
        BenchmarkStatus::Good
    } else if percentile >= 40.0 {
        BenchmarkStatus::Average
    } else if percentile >= 20.0 {
        BenchmarkStatus::BelowAverage
    } else {
        BenchmarkStatus::Poor
    }
}

/// Percentile bucket used for the site's overall position.
pub fn tier_for(percentile: f64) -> PositionTier {
    if percentile >= 80.0 {
        PositionTier::Leader
    } else if percentile >= 60.0 {
        PositionTier::StrongPerformer
    } else if percentile >= 40.0 {
        PositionTier::Average
    } else if percentile >= 20.0 {
        PositionTier::BelowAverage
    } else {
        PositionTier::Lagging
    }
}

/// Competitor registration and ranking
#[derive(Debug, Clone)]
pub struct BenchmarkEngine {
    config: BenchmarkConfig,
    catalog: Arc<MetricCatalog>,
}

impl BenchmarkEngine {
    pub fn new(config: BenchmarkConfig, catalog: Arc<MetricCatalog>) -> Self {
        Self { config, catalog }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Register `url` as a competitor of `site_id`, given the site's
    /// current competitor list.
    pub fn register_competitor(
        &self,
        existing: &[CompetitorRecord],
        site_id: &str,
        url: &str,
        options: &RegisterOptions,
        now: DateTime<Utc>,
    ) -> Result<Registration, InsightsError> {
        if site_id.trim().is_empty() {
            return Err(InsightsError::invalid_data("site id is empty"));
        }
        let normalized = normalize_url(url)?;

        let for_site: Vec<&CompetitorRecord> =
            existing.iter().filter(|c| c.site_id == site_id).collect();
        if let Some(record) = for_site.iter().find(|c| c.url == normalized) {
            return Ok(Registration::Existing((*record).clone()));
        }
        if for_site.len() >= self.config.max_competitors {
            return Err(InsightsError::CapacityError {
                limit: self.config.max_competitors,
            });
        }

        let name = options
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_name(&normalized));

        Ok(Registration::Created(CompetitorRecord {
            site_id: site_id.to_string(),
            url: normalized,
            name,
            added_at: now,
            last_updated: None,
            metrics: None,
            tags: options.tags.clone(),
            notes: options.notes.clone(),
            version: 1,
        }))
    }

    /// New version of `record` carrying freshly measured metrics.
    pub fn refresh_metrics(
        &self,
        record: &CompetitorRecord,
        metrics: MetricMap,
        now: DateTime<Utc>,
    ) -> CompetitorRecord {
        CompetitorRecord {
            metrics: Some(metrics),
            last_updated: Some(now),
            version: record.version + 1,
            ..record.clone()
        }
    }

    /// `true` when the record was never measured or its metrics are older
    /// than `max_age_days`.
    pub fn is_outdated(&self, record: &CompetitorRecord, max_age_days: i64, now: DateTime<Utc>) -> bool {
        match record.last_updated {
            None => true,
            Some(updated) => now - updated > Duration::days(max_age_days),
        }
    }

    /// Rank the site against every competitor that has `metric_key`.
    pub fn compare_metric(
        &self,
        site_id: &str,
        metric_key: &str,
        site_metrics: &MetricMap,
        competitors: &[CompetitorRecord],
    ) -> Result<MetricComparison, InsightsError> {
        let site_value = site_metrics
            .get(metric_key)
            .copied()
            .filter(|v| v.is_finite())
            .ok_or_else(|| InsightsError::metric_not_available(metric_key))?;
        let higher_is_better = self.catalog.higher_is_better(metric_key);
        let display_name = self.catalog.display_name(metric_key);

        let mut valid: Vec<(&CompetitorRecord, f64)> = competitors
            .iter()
            .filter_map(|c| c.metric(metric_key).filter(|v| v.is_finite()).map(|v| (c, v)))
            .collect();

        let site_entry = |rank: usize| RankingEntry {
            rank,
            name: site_id.to_string(),
            url: None,
            value: site_value,
            is_site: true,
        };

        if valid.is_empty() {
            return Ok(MetricComparison {
                site_id: site_id.to_string(),
                metric_key: metric_key.to_string(),
                display_name,
                site_value,
                higher_is_better,
                competitor_count: 0,
                rankings: vec![site_entry(1)],
                stats: None,
                message: Some(format!("No competitors with {} data", metric_key)),
            });
        }

        valid.sort_by(|a, b| {
            if higher_is_better {
                b.1.total_cmp(&a.1)
            } else {
                a.1.total_cmp(&b.1)
            }
        });

        // Index at which the site slots into the best-first ordering; ties
        // go to the site.
        let insertion_index = valid
            .iter()
            .position(|(_, v)| {
                if higher_is_better {
                    site_value >= *v
                } else {
                    site_value <= *v
                }
            })
            .unwrap_or(valid.len());

        let n = valid.len() as f64;
        let percentile = (n + 1.0 - insertion_index as f64) / (n + 1.0) * 100.0;

        let mut rankings: Vec<RankingEntry> = Vec::with_capacity(valid.len() + 1);
        for (index, (record, value)) in valid.iter().enumerate() {
            if index == insertion_index {
                rankings.push(site_entry(rankings.len() + 1));
            }
            rankings.push(RankingEntry {
                rank: rankings.len() + 1,
                name: record.name.clone(),
                url: Some(record.url.clone()),
                value: *value,
                is_site: false,
            });
        }
        if insertion_index == valid.len() {
            rankings.push(site_entry(rankings.len() + 1));
        }

        let values: Vec<f64> = valid.iter().map(|(_, v)| *v).collect();
        let competitor_average = calculator::mean(&values).unwrap_or(0.0);
        let diff_from_avg = site_value - competitor_average;

        Ok(MetricComparison {
            site_id: site_id.to_string(),
            metric_key: metric_key.to_string(),
            display_name,
            site_value,
            higher_is_better,
            competitor_count: valid.len(),
            rankings,
            stats: Some(ComparisonStats {
                position: insertion_index + 1,
                percentile,
                status: status_for(percentile),
                competitor_average,
                diff_from_avg,
                percent_diff_from_avg: calculator::percent_change(competitor_average, site_value),
                is_better_than_avg: if higher_is_better {
                    diff_from_avg > 0.0
                } else {
                    diff_from_avg < 0.0
                },
            }),
            message: None,
        })
    }

    /// Compare every metric in `metric_keys` the site has a value for.
    pub fn compare_all(
        &self,
        site_id: &str,
        site_metrics: &MetricMap,
        competitors: &[CompetitorRecord],
        metric_keys: &[String],
    ) -> BTreeMap<String, MetricComparison> {
        metric_keys
            .iter()
            .filter_map(|key| match self.compare_metric(site_id, key, site_metrics, competitors) {
                Ok(comparison) => Some((key.clone(), comparison)),
                Err(err) => {
                    tracing::debug!(metric = %key, "Skipping comparison: {}", err);
                    None
                }
            })
            .collect()
    }

    /// Overall standing, derived from the position metric's comparison.
    pub fn competitive_position(
        &self,
        comparisons: &BTreeMap<String, MetricComparison>,
    ) -> Option<CompetitivePosition> {
        let comparison = comparisons.get(POSITION_METRIC)?;
        let stats = comparison.stats.as_ref()?;
        Some(CompetitivePosition {
            tier: tier_for(stats.percentile),
            rank: stats.position,
            percentile: stats.percentile,
            competitor_count: comparison.competitor_count,
        })
    }

    /// Full benchmark section for a report.
    pub fn benchmarks(
        &self,
        site_id: &str,
        site_metrics: &MetricMap,
        competitors: &[CompetitorRecord],
        metric_keys: &[String],
        now: DateTime<Utc>,
    ) -> CompetitorBenchmarks {
        let comparisons = self.compare_all(site_id, site_metrics, competitors, metric_keys);
        let competitive_position = self.competitive_position(&comparisons);
        let outdated_competitors = competitors
            .iter()
            .filter(|c| self.is_outdated(c, self.config.outdated_after_days, now))
            .map(|c| c.url.clone())
            .collect();

        CompetitorBenchmarks {
            competitor_count: competitors.len(),
            outdated_competitors,
            comparisons,
            competitive_position,
        }
    }
}

fn default_name(origin: &str) -> String {
    Url::parse(origin)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| origin.to_string())
}
