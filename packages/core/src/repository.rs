//! SQLite-backed metric store.
//!
//! Snapshots live in `metric_snapshots` keyed by `(site_id, timestamp)`;
//! competitor records live in `competitors` keyed by `(site_id, url)`.
//! Timestamps are stored as fixed-width RFC 3339 strings (millisecond
//! precision, `Z` suffix) so that string comparison matches time order.
//! Metric maps and tag lists are stored as JSON text.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::insights::error::InsightsError;
use crate::insights::types::{CompetitorRecord, MetricMap, MetricSnapshot, StoreAck};
use crate::store::MetricsStore;

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, InsightsError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| InsightsError::storage_error(format!("bad stored timestamp {}: {}", raw, err)))
}

fn snapshot_from_row(row: &SqliteRow) -> Result<MetricSnapshot, InsightsError> {
    let site_id: String = row.try_get("site_id")?;
    let timestamp: String = row.try_get("timestamp")?;
    let metrics: String = row.try_get("metrics")?;
    let source: String = row.try_get("source")?;
    let tags: String = row.try_get("tags")?;

    Ok(MetricSnapshot {
        site_id,
        timestamp: parse_timestamp(&timestamp)?,
        metrics: serde_json::from_str(&metrics)?,
        source,
        tags: serde_json::from_str(&tags)?,
    })
}

fn competitor_from_row(row: &SqliteRow) -> Result<CompetitorRecord, InsightsError> {
    let added_at: String = row.try_get("added_at")?;
    let last_updated: Option<String> = row.try_get("last_updated")?;
    let metrics: Option<String> = row.try_get("metrics")?;
    let tags: String = row.try_get("tags")?;
    let version: i64 = row.try_get("version")?;

    Ok(CompetitorRecord {
        site_id: row.try_get("site_id")?,
        url: row.try_get("url")?,
        name: row.try_get("name")?,
        added_at: parse_timestamp(&added_at)?,
        last_updated: last_updated.as_deref().map(parse_timestamp).transpose()?,
        metrics: metrics
            .as_deref()
            .map(serde_json::from_str::<MetricMap>)
            .transpose()?,
        tags: serde_json::from_str(&tags)?,
        notes: row.try_get("notes")?,
        version: version as u64,
    })
}

/// Metric store persisting to SQLite through a shared pool.
pub struct SqliteMetricsRepository {
    pool: SqlitePool,
}

impl SqliteMetricsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn stored_version(&self, site_id: &str, url: &str) -> Result<Option<u64>, InsightsError> {
        let row = sqlx::query("SELECT version FROM competitors WHERE site_id = ? AND url = ?")
            .bind(site_id)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let version: i64 = row.try_get("version")?;
                Ok(Some(version as u64))
            }
            None => Ok(None),
        }
    }

    /// Delete snapshots older than `cutoff`. Returns the number removed.
    pub async fn prune_older_than(&self, site_id: &str, cutoff: DateTime<Utc>) -> Result<u64, InsightsError> {
        let result = sqlx::query("DELETE FROM metric_snapshots WHERE site_id = ? AND timestamp < ?")
            .bind(site_id)
            .bind(format_timestamp(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MetricsStore for SqliteMetricsRepository {
    async fn store(&self, snapshot: MetricSnapshot) -> Result<StoreAck, InsightsError> {
        sqlx::query(
            "INSERT OR REPLACE INTO metric_snapshots (site_id, timestamp, metrics, source, tags)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.site_id)
        .bind(format_timestamp(snapshot.timestamp))
        .bind(serde_json::to_string(&snapshot.metrics)?)
        .bind(&snapshot.source)
        .bind(serde_json::to_string(&snapshot.tags)?)
        .execute(&self.pool)
        .await?;

        Ok(StoreAck {
            metric_count: snapshot.metrics.len(),
            site_id: snapshot.site_id,
            timestamp: snapshot.timestamp,
        })
    }

    async fn fetch_range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, InsightsError> {
        let rows = sqlx::query(
            "SELECT site_id, timestamp, metrics, source, tags
             FROM metric_snapshots
             WHERE site_id = ? AND timestamp >= ? AND timestamp <= ?
             ORDER BY timestamp ASC",
        )
        .bind(site_id)
        .bind(format_timestamp(start))
        .bind(format_timestamp(end))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }

    async fn load_competitors(&self, site_id: &str) -> Result<Vec<CompetitorRecord>, InsightsError> {
        let rows = sqlx::query(
            "SELECT site_id, url, name, added_at, last_updated, metrics, tags, notes, version
             FROM competitors
             WHERE site_id = ?
             ORDER BY added_at ASC, url ASC",
        )
        .bind(site_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(competitor_from_row).collect()
    }

    async fn save_competitor(
        &self,
        record: &CompetitorRecord,
        expected_version: Option<u64>,
    ) -> Result<(), InsightsError> {
        let metrics = record.metrics.as_ref().map(serde_json::to_string).transpose()?;
        let tags = serde_json::to_string(&record.tags)?;
        let last_updated = record.last_updated.map(format_timestamp);

        let affected = match expected_version {
            None => sqlx::query(
                "INSERT OR IGNORE INTO competitors
                 (site_id, url, name, added_at, last_updated, metrics, tags, notes, version)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.site_id)
            .bind(&record.url)
            .bind(&record.name)
            .bind(format_timestamp(record.added_at))
            .bind(&last_updated)
            .bind(&metrics)
            .bind(&tags)
            .bind(&record.notes)
            .bind(record.version as i64)
            .execute(&self.pool)
            .await?
            .rows_affected(),
            Some(expected) => sqlx::query(
                "UPDATE competitors
                 SET name = ?, last_updated = ?, metrics = ?, tags = ?, notes = ?, version = ?
                 WHERE site_id = ? AND url = ? AND version = ?",
            )
            .bind(&record.name)
            .bind(&last_updated)
            .bind(&metrics)
            .bind(&tags)
            .bind(&record.notes)
            .bind(record.version as i64)
            .bind(&record.site_id)
            .bind(&record.url)
            .bind(expected as i64)
            .execute(&self.pool)
            .await?
            .rows_affected(),
        };

        if affected == 0 {
            // Zero rows written: the stored version differs from the expected one.
            let stored = self.stored_version(&record.site_id, &record.url).await?;
            return Err(InsightsError::VersionConflict {
                url: record.url.clone(),
                expected: expected_version,
                found: stored,
            });
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "sqlite"
    }
}
