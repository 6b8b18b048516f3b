//! Metric snapshot storage.
//!
//! [`MetricsStore`] is the only I/O boundary of the insights pipeline.
//! Backends implement raw range reads, snapshot writes and competitor
//! persistence; interval aggregation and series extraction are shared
//! default methods so every backend behaves identically.
//!
//! [`InMemoryMetricsStore`] keeps a bounded window of snapshots per site.
//! Once a site holds more than `capacity` snapshots the oldest one is
//! evicted.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use tokio::sync::RwLock;

use crate::insights::error::InsightsError;
use crate::insights::types::{
    CompetitorRecord, Interval, MetricMap, MetricSeries, MetricSnapshot, StoreAck,
};

/// Default maximum number of snapshots retained in memory per site.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Persistence for metric snapshots and competitor records.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Persist a snapshot. A snapshot with the same `(site_id, timestamp)`
    /// replaces the earlier one.
    async fn store(&self, snapshot: MetricSnapshot) -> Result<StoreAck, InsightsError>;

    /// Raw snapshots with `start <= timestamp <= end`, oldest first.
    /// Unknown sites yield an empty list.
    async fn fetch_range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, InsightsError>;

    /// Every competitor registered for `site_id`.
    async fn load_competitors(&self, site_id: &str) -> Result<Vec<CompetitorRecord>, InsightsError>;

    /// Insert or update a competitor record. The write only succeeds when
    /// the stored version equals `expected_version` (`None` meaning "not
    /// stored yet").
    async fn save_competitor(
        &self,
        record: &CompetitorRecord,
        expected_version: Option<u64>,
    ) -> Result<(), InsightsError>;

    fn backend_name(&self) -> &str;

    /// Snapshots in range, aggregated to `interval`.
    async fn query(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<MetricSnapshot>, InsightsError> {
        let snapshots = self.fetch_range(site_id, start, end).await?;
        Ok(aggregate(snapshots, interval))
    }

    /// Series of one metric; snapshots lacking the key are skipped.
    async fn series_for(
        &self,
        site_id: &str,
        metric_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MetricSeries, InsightsError> {
        let snapshots = self.fetch_range(site_id, start, end).await?;
        Ok(MetricSeries::from_snapshots(site_id, metric_key, &snapshots))
    }
}

/// Shared optimistic-concurrency rule for `save_competitor`.
pub(crate) fn check_version(
    url: &str,
    stored: Option<u64>,
    expected: Option<u64>,
) -> Result<(), InsightsError> {
    if stored == expected {
        Ok(())
    } else {
        Err(InsightsError::VersionConflict {
            url: url.to_string(),
            expected,
            found: stored,
        })
    }
}

/// Group chronologically sorted snapshots by ISO week or calendar month.
///
/// Within a group each metric is the mean of the snapshots that carry it;
/// the timestamp, source and tags come from the group's latest snapshot.
/// `Daily` returns the snapshots unchanged.
pub fn aggregate(snapshots: Vec<MetricSnapshot>, interval: Interval) -> Vec<MetricSnapshot> {
    if interval == Interval::Daily {
        return snapshots;
    }
    let bucket = |s: &MetricSnapshot| -> (i32, u32) {
        match interval {
            Interval::Weekly => {
                let week = s.timestamp.iso_week();
                (week.year(), week.week())
            }
            _ => (s.timestamp.year(), s.timestamp.month()),
        }
    };

    let mut groups: Vec<Vec<MetricSnapshot>> = Vec::new();
    let mut current_key = None;
    for snapshot in snapshots {
        let key = bucket(&snapshot);
        if current_key != Some(key) {
            groups.push(Vec::new());
            current_key = Some(key);
        }
        if let Some(group) = groups.last_mut() {
            group.push(snapshot);
        }
    }

    groups.into_iter().filter_map(merge_group).collect()
}

fn merge_group(group: Vec<MetricSnapshot>) -> Option<MetricSnapshot> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for snapshot in &group {
        for (key, value) in &snapshot.metrics {
            let entry = sums.entry(key.clone()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    let metrics: MetricMap = sums
        .into_iter()
        .map(|(key, (sum, count))| (key, sum / count as f64))
        .collect();

    let latest = group.into_iter().last()?;
    Some(MetricSnapshot { metrics, ..latest })
}

/// Capacity-bounded in-memory store.
#[derive(Debug)]
pub struct InMemoryMetricsStore {
    snapshots: RwLock<HashMap<String, VecDeque<MetricSnapshot>>>,
    competitors: RwLock<HashMap<String, Vec<CompetitorRecord>>>,
    capacity: usize,
}

impl InMemoryMetricsStore {
    /// Create a new store keeping at most `capacity` snapshots per site.
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            competitors: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of snapshots currently held for `site_id`.
    pub async fn len(&self, site_id: &str) -> usize {
        self.snapshots
            .read()
            .await
            .get(site_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Remove all snapshots and competitors.
    pub async fn clear(&self) {
        self.snapshots.write().await.clear();
        self.competitors.write().await.clear();
    }
}

impl Default for InMemoryMetricsStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn store(&self, snapshot: MetricSnapshot) -> Result<StoreAck, InsightsError> {
        let ack = StoreAck {
            site_id: snapshot.site_id.clone(),
            timestamp: snapshot.timestamp,
            metric_count: snapshot.metrics.len(),
        };

        let mut sites = self.snapshots.write().await;
        let data = sites.entry(snapshot.site_id.clone()).or_default();
        match data.binary_search_by_key(&snapshot.timestamp, |s| s.timestamp) {
            Ok(index) => data[index] = snapshot,
            Err(index) => {
                data.insert(index, snapshot);
                if data.len() > self.capacity {
                    data.pop_front();
                }
            }
        }
        Ok(ack)
    }

    async fn fetch_range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, InsightsError> {
        let sites = self.snapshots.read().await;
        Ok(sites
            .get(site_id)
            .map(|data| {
                data.iter()
                    .filter(|s| s.timestamp >= start && s.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn load_competitors(&self, site_id: &str) -> Result<Vec<CompetitorRecord>, InsightsError> {
        Ok(self
            .competitors
            .read()
            .await
            .get(site_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_competitor(
        &self,
        record: &CompetitorRecord,
        expected_version: Option<u64>,
    ) -> Result<(), InsightsError> {
        let mut all = self.competitors.write().await;
        let records = all.entry(record.site_id.clone()).or_default();
        let existing = records.iter().position(|c| c.url == record.url);
        check_version(&record.url, existing.map(|i| records[i].version), expected_version)?;
        match existing {
            Some(index) => records[index] = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
