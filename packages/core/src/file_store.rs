//! File-backed metric store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<site>/metrics-2024-03-04.json   one document per (site, day)
//! <root>/<site>/competitors.json
//! ```
//!
//! `<site>` is the escaped site id from [`site_dir_name`]. Each day
//! document is a JSON array of snapshots sorted by timestamp.
//! Date-range reads only open the files whose names fall inside the range.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::insights::error::InsightsError;
use crate::insights::types::{CompetitorRecord, MetricSnapshot, StoreAck};
use crate::store::{check_version, MetricsStore};

const METRICS_PREFIX: &str = "metrics-";
const METRICS_SUFFIX: &str = ".json";
const COMPETITORS_FILE: &str = "competitors.json";

/// Store writing one JSON document per site and day.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    // Serializes read-modify-write cycles on the day and competitor documents.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn site_dir(&self, site_id: &str) -> PathBuf {
        self.root.join(site_dir_name(site_id))
    }

    fn day_file(&self, site_id: &str, date: NaiveDate) -> PathBuf {
        self.site_dir(site_id)
            .join(format!("{}{}{}", METRICS_PREFIX, date.format("%Y-%m-%d"), METRICS_SUFFIX))
    }
}

/// Directory name for a site id.
///
/// ASCII alphanumerics, `-` and non-leading `.` are kept; every other byte
/// becomes `_xx` (lowercase hex), so distinct ids never share a directory
/// and no id maps to `.`, `..` or a path separator. The empty id is `_`.
pub fn site_dir_name(site_id: &str) -> String {
    if site_id.is_empty() {
        return "_".to_string();
    }
    let mut name = String::with_capacity(site_id.len());
    for (index, byte) in site_id.bytes().enumerate() {
        let literal = byte.is_ascii_alphanumeric() || byte == b'-' || (byte == b'.' && index > 0);
        if literal {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("_{:02x}", byte));
        }
    }
    name
}

/// Date encoded in a day document's filename.
fn date_from_filename(name: &str) -> Option<NaiveDate> {
    let date = name.strip_prefix(METRICS_PREFIX)?.strip_suffix(METRICS_SUFFIX)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, InsightsError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(InsightsError::storage_error(format!(
            "cannot read {}: {}",
            path.display(),
            err
        ))),
    }
}

/// Write through a temporary file so readers never see a partial document.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), InsightsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl MetricsStore for JsonFileStore {
    async fn store(&self, snapshot: MetricSnapshot) -> Result<StoreAck, InsightsError> {
        let ack = StoreAck {
            site_id: snapshot.site_id.clone(),
            timestamp: snapshot.timestamp,
            metric_count: snapshot.metrics.len(),
        };
        let path = self.day_file(&snapshot.site_id, snapshot.timestamp.date_naive());

        let _guard = self.write_lock.lock().await;
        let mut day: Vec<MetricSnapshot> = read_json(&path).await?;
        match day.binary_search_by_key(&snapshot.timestamp, |s| s.timestamp) {
            Ok(index) => day[index] = snapshot,
            Err(index) => day.insert(index, snapshot),
        }
        write_json(&path, &day).await?;

        tracing::debug!(path = %path.display(), "Snapshot written");
        Ok(ack)
    }

    async fn fetch_range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, InsightsError> {
        let dir = self.site_dir(site_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let (first_day, last_day) = (start.date_naive(), end.date_naive());
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(date) = name.to_str().and_then(date_from_filename) else {
                continue;
            };
            if date >= first_day && date <= last_day {
                files.push(entry.path());
            }
        }

        let mut snapshots = Vec::new();
        for path in files {
            let day: Vec<MetricSnapshot> = read_json(&path).await?;
            snapshots.extend(
                day.into_iter()
                    .filter(|s| s.timestamp >= start && s.timestamp <= end),
            );
        }
        snapshots.sort_by_key(|s| s.timestamp);
        Ok(snapshots)
    }

    async fn load_competitors(&self, site_id: &str) -> Result<Vec<CompetitorRecord>, InsightsError> {
        read_json(&self.site_dir(site_id).join(COMPETITORS_FILE)).await
    }

    async fn save_competitor(
        &self,
        record: &CompetitorRecord,
        expected_version: Option<u64>,
    ) -> Result<(), InsightsError> {
        let path = self.site_dir(&record.site_id).join(COMPETITORS_FILE);

        let _guard = self.write_lock.lock().await;
        let mut records: Vec<CompetitorRecord> = read_json(&path).await?;
        let existing = records.iter().position(|c| c.url == record.url);
        check_version(&record.url, existing.map(|i| records[i].version), expected_version)?;
        match existing {
            Some(index) => records[index] = record.clone(),
            None => records.push(record.clone()),
        }
        write_json(&path, &records).await
    }

    fn backend_name(&self) -> &str {
        "file"
    }
}
