//! Measurement scheduler.
//!
//! Drives the periodic measurement loop: each tick measures every tracked
//! site through the engine's provider, stores the resulting snapshot, and
//! refreshes competitors whose metrics have gone stale, so reports always
//! have recent data to work with.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio::time;

use crate::insights::{MetricSnapshot, SiteInsightsEngine};

/// A site measured on every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSite {
    pub site_id: String,
    pub url: String,
}

/// Outcome of a single tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub measured: usize,
    pub failed: usize,
    pub competitors_refreshed: usize,
}

/// Run the measurement loop.
///
/// On each tick:
/// 1. Measure every tracked site with the engine's provider
/// 2. Store each measurement as a snapshot
/// 3. Refresh that site's outdated competitors
///
/// Errors are logged and the loop continues; a single failed measurement
/// never takes down the scheduler.
///
/// Runs until `Ctrl+C` (SIGINT) is received.
pub async fn run_measurement_loop(
    engine: Arc<SiteInsightsEngine>,
    sites: Vec<TrackedSite>,
    interval_seconds: u64,
) {
    if engine.provider().is_none() {
        tracing::error!("No measurement provider configured; scheduler not started");
        return;
    }

    let mut interval = time::interval(Duration::from_secs(interval_seconds.max(1)));

    tracing::info!(
        "Measurement loop started (interval: {}s, sites: {})",
        interval_seconds,
        sites.len()
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let summary = poll_once(&engine, &sites).await;
                tracing::info!(
                    measured = summary.measured,
                    failed = summary.failed,
                    competitors_refreshed = summary.competitors_refreshed,
                    "Measurement tick complete"
                );
            }

            _ = signal::ctrl_c() => {
                tracing::info!("Shutdown signal received. Stopping measurements.");
                break;
            }
        }
    }

    tracing::info!("Measurement loop stopped cleanly");
}

/// Execute a single measurement cycle. Extracted for testability.
pub async fn poll_once(engine: &Arc<SiteInsightsEngine>, sites: &[TrackedSite]) -> PollSummary {
    let mut summary = PollSummary::default();
    let source = engine
        .provider()
        .map(|p| p.source_label())
        .unwrap_or_else(|| "measurement".to_string());

    for site in sites {
        let metrics = match engine.measure(&site.url).await {
            Ok(metrics) => metrics,
            Err(err) => {
                tracing::error!(site_id = %site.site_id, "Measurement failed, skipping site this tick: {}", err);
                summary.failed += 1;
                continue;
            }
        };

        let snapshot = MetricSnapshot::new(site.site_id.as_str(), Utc::now(), metrics).with_source(source.as_str());
        match engine.ingest(snapshot).await {
            Ok(_) => summary.measured += 1,
            Err(err) => {
                tracing::error!(site_id = %site.site_id, "Storing measurement failed: {}", err);
                summary.failed += 1;
                continue;
            }
        }

        match engine.refresh_outdated_competitors(&site.site_id).await {
            Ok(count) => summary.competitors_refreshed += count,
            Err(err) => tracing::warn!(site_id = %site.site_id, "Competitor refresh skipped: {}", err),
        }
    }

    summary
}
