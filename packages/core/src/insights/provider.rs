//! Performance Measurement Provider Interface
//!
//! Abstraction over whatever actually measures a page (a lab runner, a
//! field-data API). The insights pipeline only normalises and stores what
//! a provider returns.

use async_trait::async_trait;

use crate::insights::{error::ProviderError, types::MetricMap};

/// Trait for measurement sources, keeping the pipeline independent of them
#[async_trait]
pub trait PerformanceProvider {
    /// Measure `url` and return its raw metric map
    async fn measure(&self, url: &str) -> Result<MetricMap, ProviderError>;

    /// Name of this provider for logging
    fn provider_name(&self) -> &str;

    /// Source label recorded on stored snapshots
    fn source_label(&self) -> String {
        self.provider_name().to_string()
    }
}

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;
