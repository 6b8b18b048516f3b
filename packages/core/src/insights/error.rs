//! Error types for site insights operations

use thiserror::Error;

/// Errors that can occur while storing, analysing or reporting on metrics
#[derive(Error, Debug)]
pub enum InsightsError {
    #[error("Insufficient data for {operation}: need {required} points, got {actual}")]
    InsufficientData {
        operation: String,
        required: usize,
        actual: usize,
    },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Metric not available: {metric}")]
    MetricNotAvailable { metric: String },

    #[error("Competitor limit reached: at most {limit} competitors per site")]
    CapacityError { limit: usize },

    #[error("No forecast available for {metric}: every algorithm failed")]
    NoForecastAvailable { metric: String },

    #[error("No historical data for site {site_id}")]
    NoHistoricalData { site_id: String },

    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Competitor {url} changed concurrently (expected version {expected:?}, found {found:?})")]
    VersionConflict {
        url: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("Operation timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Measurement provider error: {source}")]
    ProviderError {
        #[from]
        source: ProviderError,
    },
}

/// Errors from the external performance-measurement collaborator
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Measurement failed: {message}")]
    MeasurementFailed { message: String },

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl InsightsError {
    pub fn insufficient_data(operation: impl Into<String>, required: usize, actual: usize) -> Self {
        Self::InsufficientData {
            operation: operation.into(),
            required,
            actual,
        }
    }

    pub fn storage_error(message: impl Into<String>) -> Self {
        Self::StorageError { message: message.into() }
    }

    pub fn metric_not_available(metric: impl Into<String>) -> Self {
        Self::MetricNotAvailable { metric: metric.into() }
    }

    pub fn no_forecast_available(metric: impl Into<String>) -> Self {
        Self::NoForecastAvailable { metric: metric.into() }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData { message: message.into() }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }

    /// `true` for failures of the storage layer itself (as opposed to
    /// analysis outcomes), which callers must propagate.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::StorageError { .. })
    }
}

impl From<std::io::Error> for InsightsError {
    fn from(err: std::io::Error) -> Self {
        Self::storage_error(err.to_string())
    }
}

impl From<serde_json::Error> for InsightsError {
    fn from(err: serde_json::Error) -> Self {
        Self::storage_error(format!("serialization failed: {}", err))
    }
}

impl From<sqlx::Error> for InsightsError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage_error(format!("database failure: {}", err))
    }
}

/// Result alias used across the insights module.
pub type InsightsResult<T> = Result<T, InsightsError>;
