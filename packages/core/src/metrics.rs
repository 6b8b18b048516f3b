//! Prometheus metrics registry for the SEO trend tracker.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and hand it to
//! the insights engine; the scheduler and report path update it.
//!
//! [`AppMetrics::render`] produces the Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry};

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Snapshots accepted by the store.
    pub snapshots_stored_total: Counter,
    /// Reports built successfully.
    pub reports_built_total: Counter,
    /// Report requests that failed outright (no data, store error, timeout).
    pub report_failures_total: Counter,
    /// Per-metric failures during report building, labelled by stage
    /// (`trend` or `forecast`).
    pub analysis_failures_total: CounterVec,
    /// Successful competitor metric refreshes.
    pub competitor_refreshes_total: Counter,
    /// Competitor refreshes that gave up after retries.
    pub competitor_refresh_failures_total: Counter,
    /// Wall-clock time to build one report, in seconds.
    pub report_build_duration: Histogram,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let snapshots_stored_total = Counter::with_opts(Opts::new(
            "seo_trend_tracker_snapshots_stored_total",
            "Metric snapshots stored",
        ))?;

        let reports_built_total = Counter::with_opts(Opts::new(
            "seo_trend_tracker_reports_built_total",
            "Reports built successfully",
        ))?;

        let report_failures_total = Counter::with_opts(Opts::new(
            "seo_trend_tracker_report_failures_total",
            "Report requests that failed",
        ))?;

        let analysis_failures_total = CounterVec::new(
            Opts::new(
                "seo_trend_tracker_analysis_failures_total",
                "Per-metric analysis failures by stage",
            ),
            &["stage"],
        )?;

        let competitor_refreshes_total = Counter::with_opts(Opts::new(
            "seo_trend_tracker_competitor_refreshes_total",
            "Competitor metric refreshes",
        ))?;

        let competitor_refresh_failures_total = Counter::with_opts(Opts::new(
            "seo_trend_tracker_competitor_refresh_failures_total",
            "Competitor metric refreshes that failed",
        ))?;

        let report_build_duration = Histogram::with_opts(
            HistogramOpts::new(
                "seo_trend_tracker_report_build_duration_seconds",
                "Report build latency in seconds",
            )
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;

        registry.register(Box::new(snapshots_stored_total.clone()))?;
        registry.register(Box::new(reports_built_total.clone()))?;
        registry.register(Box::new(report_failures_total.clone()))?;
        registry.register(Box::new(analysis_failures_total.clone()))?;
        registry.register(Box::new(competitor_refreshes_total.clone()))?;
        registry.register(Box::new(competitor_refresh_failures_total.clone()))?;
        registry.register(Box::new(report_build_duration.clone()))?;

        Ok(Self {
            snapshots_stored_total,
            reports_built_total,
            report_failures_total,
            analysis_failures_total,
            competitor_refreshes_total,
            competitor_refresh_failures_total,
            report_build_duration,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}

impl std::fmt::Debug for AppMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppMetrics")
            .field("reports_built_total", &self.reports_built_total.get())
            .finish_non_exhaustive()
    }
}
