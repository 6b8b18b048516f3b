use std::env;
use std::path::PathBuf;

/// Where snapshots and competitor records are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    File,
    Sqlite,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(StorageBackend::File),
            "sqlite" => Ok(StorageBackend::Sqlite),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("Invalid STORAGE_BACKEND: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub data_dir: PathBuf,
    pub database_url: String,
    pub max_competitors: usize,
    pub report_timeout_seconds: u64,
    pub measurement_interval_seconds: u64,
    pub analysis_config_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; absent keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage_backend = lookup("STORAGE_BACKEND")
            .unwrap_or_else(|| "file".to_string())
            .parse::<StorageBackend>()?;

        let data_dir = PathBuf::from(lookup("DATA_DIR").unwrap_or_else(|| "./data".to_string()));

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://seo-trends.db".to_string());

        let max_competitors = parse_number(&lookup, "MAX_COMPETITORS", 10usize)?;
        if max_competitors == 0 {
            return Err("MAX_COMPETITORS must be positive".to_string());
        }

        let report_timeout_seconds = parse_number(&lookup, "REPORT_TIMEOUT_SECONDS", 30u64)?;
        let measurement_interval_seconds =
            parse_number(&lookup, "MEASUREMENT_INTERVAL_SECONDS", 86_400u64)?;
        if measurement_interval_seconds == 0 {
            return Err("MEASUREMENT_INTERVAL_SECONDS must be positive".to_string());
        }

        let analysis_config_path = lookup("ANALYSIS_CONFIG_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            storage_backend,
            data_dir,
            database_url,
            max_competitors,
            report_timeout_seconds,
            measurement_interval_seconds,
            analysis_config_path,
        })
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, String>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| format!("{} must be a valid number", key)),
    }
}
