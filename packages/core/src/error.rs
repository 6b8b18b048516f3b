use std::error::Error;
use std::fmt;

use crate::insights::InsightsError;

/// Unified application error for the binary.
///
/// Configuration, storage, analysis and input parsing failures all end up
/// here so `main` can report them the same way.
#[derive(Debug)]
pub enum AppError {
    Config(String),
    Storage(String),
    Analysis(String),
    Parse(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "Config error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Analysis(msg) => write!(f, "Analysis error: {}", msg),
            AppError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl Error for AppError {}

impl From<InsightsError> for AppError {
    fn from(err: InsightsError) -> Self {
        match err {
            InsightsError::StorageError { .. } => AppError::Storage(err.to_string()),
            InsightsError::ConfigError { .. } => AppError::Config(err.to_string()),
            InsightsError::InvalidData { .. } => AppError::Parse(err.to_string()),
            other => AppError::Analysis(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}
