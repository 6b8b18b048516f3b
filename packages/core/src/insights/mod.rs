//! Site Insights Module
//!
//! This module turns stored performance snapshots into trend analyses,
//! ensemble forecasts, competitor rankings and synthesized reports.

pub mod benchmark;
pub mod calculator;
pub mod catalog;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod provider;
pub mod report;
pub mod trend;
pub mod types;

#[cfg(test)]
mod tests;

pub use benchmark::{BenchmarkEngine, RegisterOptions, Registration};
pub use catalog::MetricCatalog;
pub use config::InsightsConfig;
pub use engine::SiteInsightsEngine;
pub use error::{InsightsError, ProviderError};
pub use forecast::{ForecastAlgorithm, ForecastEngine};
pub use provider::PerformanceProvider;
pub use report::{ReportOptions, ReportSynthesizer};
pub use trend::TrendAnalyzer;
pub use types::*;
