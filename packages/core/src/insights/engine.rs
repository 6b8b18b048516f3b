//! Site Insights Engine - Central orchestrator for metric ingestion,
//! competitor tracking and report building
//!
//! The engine owns one instance of each analytical component plus the
//! store and (optionally) a measurement provider. Analysis runs per metric
//! on the blocking pool; store reads are fanned out and joined before
//! synthesis.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::insights::{
    benchmark::{normalize_url, BenchmarkEngine, RegisterOptions, Registration},
    catalog::MetricCatalog,
    config::InsightsConfig,
    error::{InsightsError, ProviderError},
    forecast::ForecastEngine,
    provider::PerformanceProvider,
    report::{analyze_metric, ReportOptions, ReportSynthesizer},
    trend::TrendAnalyzer,
    types::*,
};
use crate::metrics::AppMetrics;
use crate::store::MetricsStore;

type CompetitorKey = (String, String);

/// Reject snapshots the analysis cannot use.
pub fn validate_snapshot(snapshot: &MetricSnapshot) -> Result<(), InsightsError> {
    if snapshot.site_id.trim().is_empty() {
        return Err(InsightsError::invalid_data("site id is empty"));
    }
    if snapshot.metrics.is_empty() {
        return Err(InsightsError::invalid_data("snapshot has no metrics"));
    }
    if let Some((key, value)) = snapshot.metrics.iter().find(|(_, v)| !v.is_finite()) {
        return Err(InsightsError::invalid_data(format!(
            "metric {} has non-finite value {}",
            key, value
        )));
    }
    Ok(())
}

/// Random extra delay of up to half the base backoff.
fn jitter_ms(base_ms: u64) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    let mut rng = rand::thread_rng();
    rng.gen_range(0..=base_ms / 2)
}

/// Central insights engine tying store, analysis and competitors together
pub struct SiteInsightsEngine {
    config: InsightsConfig,
    catalog: Arc<MetricCatalog>,
    store: Arc<dyn MetricsStore>,
    analyzer: Arc<TrendAnalyzer>,
    forecaster: Arc<ForecastEngine>,
    benchmark: BenchmarkEngine,
    synthesizer: ReportSynthesizer,
    provider: Option<Arc<dyn PerformanceProvider + Send + Sync>>,
    metrics: Option<Arc<AppMetrics>>,
    // One async lock per (site, competitor url); serializes read-modify-write.
    competitor_locks: Mutex<HashMap<CompetitorKey, Arc<Mutex<()>>>>,
}

impl SiteInsightsEngine {
    /// Create an engine over `store` with the standard metric catalog.
    pub fn new(config: InsightsConfig, store: Arc<dyn MetricsStore>) -> Result<Self, InsightsError> {
        Self::with_catalog(config, store, Arc::new(MetricCatalog::standard()))
    }

    pub fn with_catalog(
        config: InsightsConfig,
        store: Arc<dyn MetricsStore>,
        catalog: Arc<MetricCatalog>,
    ) -> Result<Self, InsightsError> {
        config.validate()?;

        let analyzer = Arc::new(TrendAnalyzer::new(config.trend.clone(), catalog.clone()));
        let forecaster = Arc::new(ForecastEngine::new(config.forecast.clone(), catalog.clone()));
        let benchmark = BenchmarkEngine::new(config.benchmark.clone(), catalog.clone());
        let synthesizer = ReportSynthesizer::new(
            config.report.clone(),
            catalog.clone(),
            analyzer.clone(),
            forecaster.clone(),
            benchmark.clone(),
        );

        tracing::debug!(backend = store.backend_name(), "Insights engine created");

        Ok(Self {
            config,
            catalog,
            store,
            analyzer,
            forecaster,
            benchmark,
            synthesizer,
            provider: None,
            metrics: None,
            competitor_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Attach the measurement collaborator used for competitor refreshes.
    pub fn with_provider(mut self, provider: Arc<dyn PerformanceProvider + Send + Sync>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &InsightsConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<MetricCatalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn MetricsStore> {
        &self.store
    }

    pub fn provider(&self) -> Option<&Arc<dyn PerformanceProvider + Send + Sync>> {
        self.provider.as_ref()
    }

    /// Store one measurement; `timestamp` defaults to now.
    pub async fn store_snapshot(
        &self,
        site_id: &str,
        metrics: MetricMap,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<StoreAck, InsightsError> {
        let snapshot = MetricSnapshot::new(site_id, timestamp.unwrap_or_else(Utc::now), metrics);
        self.ingest(snapshot).await
    }

    /// Validate and persist a fully formed snapshot.
    pub async fn ingest(&self, snapshot: MetricSnapshot) -> Result<StoreAck, InsightsError> {
        validate_snapshot(&snapshot)?;
        let ack = self.store.store(snapshot).await?;
        if let Some(metrics) = &self.metrics {
            metrics.snapshots_stored_total.inc();
        }
        tracing::debug!(
            site_id = %ack.site_id,
            metric_count = ack.metric_count,
            "Snapshot stored"
        );
        Ok(ack)
    }

    pub async fn list_competitors(&self, site_id: &str) -> Result<Vec<CompetitorRecord>, InsightsError> {
        self.store.load_competitors(site_id).await
    }

    async fn competitor_lock(&self, site_id: &str, url: &str) -> Arc<Mutex<()>> {
        let mut locks = self.competitor_locks.lock().await;
        locks
            .entry((site_id.to_string(), url.to_string()))
            .or_default()
            .clone()
    }

    /// Drop our handle and forget every lock nobody else holds. Handles are
    /// only cloned under the map lock, so a count of one means idle.
    async fn release_competitor_lock(&self, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self.competitor_locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    pub(crate) async fn competitor_lock_count(&self) -> usize {
        self.competitor_locks.lock().await.len()
    }

    /// Register a competitor. Registering a URL twice succeeds and leaves
    /// the stored record untouched.
    pub async fn register_competitor(
        &self,
        site_id: &str,
        url: &str,
        options: RegisterOptions,
    ) -> Result<RegistrationResponse, InsightsError> {
        let normalized = normalize_url(url)?;
        // Site-wide key: the capacity check spans every competitor of the site.
        let lock = self.competitor_lock(site_id, "").await;

        let registration = {
            let _guard = lock.lock().await;
            async {
                let existing = self.store.load_competitors(site_id).await?;
                let registration =
                    self.benchmark
                        .register_competitor(&existing, site_id, &normalized, &options, Utc::now())?;
                if let Registration::Created(record) = &registration {
                    self.store.save_competitor(record, None).await?;
                }
                Ok::<_, InsightsError>(registration)
            }
            .await
        };
        self.release_competitor_lock(lock).await;
        let registration = registration?;

        let record = registration.record();
        if !registration.is_created() {
            tracing::info!(site_id, url = %record.url, "Competitor already registered");
            return Ok(RegistrationResponse {
                success: true,
                competitor_url: record.url.clone(),
                message: format!("{} is already registered", record.url),
            });
        }

        tracing::info!(site_id, url = %record.url, name = %record.name, "Competitor registered");

        let mut message = format!("Registered {}", record.url);
        if options.analyze_immediately {
            match self.refresh_competitor(site_id, &record.url).await {
                Ok(_) => message.push_str(" and measured it"),
                Err(err) => {
                    tracing::warn!(site_id, url = %record.url, "Initial competitor measurement failed: {}", err);
                    message.push_str("; initial measurement failed, will retry on next refresh");
                }
            }
        }

        Ok(RegistrationResponse {
            success: true,
            competitor_url: record.url.clone(),
            message,
        })
    }

    /// Measure a registered competitor and persist the new version.
    pub async fn refresh_competitor(&self, site_id: &str, url: &str) -> Result<CompetitorRecord, InsightsError> {
        let provider = self
            .provider
            .clone()
            .ok_or_else(|| InsightsError::config_error("no measurement provider configured"))?;
        let normalized = normalize_url(url)?;
        let lock = self.competitor_lock(site_id, &normalized).await;
        let guard = lock.lock().await;

        let result = async {
            let current = self
                .store
                .load_competitors(site_id)
                .await?
                .into_iter()
                .find(|c| c.url == normalized)
                .ok_or_else(|| {
                    InsightsError::invalid_data(format!("{} is not a registered competitor of {}", normalized, site_id))
                })?;

            let measured = self.measure_with_retry(provider.as_ref(), &normalized).await?;
            let metrics: MetricMap = measured.into_iter().filter(|(_, v)| v.is_finite()).collect();
            if metrics.is_empty() {
                return Err(InsightsError::invalid_data(format!(
                    "measurement of {} returned no usable metrics",
                    normalized
                )));
            }

            let updated = self.benchmark.refresh_metrics(&current, metrics, Utc::now());
            self.store.save_competitor(&updated, Some(current.version)).await?;
            Ok(updated)
        }
        .await;
        drop(guard);
        self.release_competitor_lock(lock).await;

        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(_) => metrics.competitor_refreshes_total.inc(),
                Err(_) => metrics.competitor_refresh_failures_total.inc(),
            }
        }
        if let Ok(record) = &result {
            tracing::info!(site_id, url = %record.url, version = record.version, "Competitor refreshed");
        }
        result
    }

    /// Measure `url` with the configured provider, retrying transient failures.
    pub async fn measure(&self, url: &str) -> Result<MetricMap, InsightsError> {
        let provider = self
            .provider
            .clone()
            .ok_or_else(|| InsightsError::config_error("no measurement provider configured"))?;
        Ok(self.measure_with_retry(provider.as_ref(), url).await?)
    }

    /// Call the provider, retrying with exponential backoff plus jitter.
    async fn measure_with_retry(
        &self,
        provider: &(dyn PerformanceProvider + Send + Sync),
        url: &str,
    ) -> Result<MetricMap, ProviderError> {
        let attempts = self.config.benchmark.refresh_attempts.max(1);
        let base_ms = self.config.benchmark.refresh_backoff_ms;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match provider.measure(url).await {
                Ok(metrics) => return Ok(metrics),
                Err(err) if attempt >= attempts => return Err(err),
                Err(err) => {
                    let backoff = base_ms.saturating_mul(1 << (attempt - 1).min(16));
                    let jitter = jitter_ms(base_ms);
                    tracing::warn!(
                        provider = provider.provider_name(),
                        url,
                        attempt,
                        "Measurement failed, retrying in {}ms: {}",
                        backoff + jitter,
                        err
                    );
                    tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
                }
            }
        }
    }

    /// Refresh every outdated competitor of `site_id` concurrently.
    ///
    /// Best-effort: failures are logged and counted, never returned.
    /// Returns the number of competitors refreshed successfully.
    pub async fn refresh_outdated_competitors(self: &Arc<Self>, site_id: &str) -> Result<usize, InsightsError> {
        if self.provider.is_none() {
            return Ok(0);
        }
        let now = Utc::now();
        let max_age = self.config.benchmark.outdated_after_days;
        let outdated: Vec<String> = self
            .store
            .load_competitors(site_id)
            .await?
            .into_iter()
            .filter(|c| self.benchmark.is_outdated(c, max_age, now))
            .map(|c| c.url)
            .collect();

        if outdated.is_empty() {
            return Ok(0);
        }
        tracing::info!(site_id, count = outdated.len(), "Refreshing outdated competitors");

        let mut tasks = JoinSet::new();
        for url in outdated {
            let engine = Arc::clone(self);
            let site_id = site_id.to_string();
            tasks.spawn(async move {
                let result = engine.refresh_competitor(&site_id, &url).await;
                (url, result)
            });
        }

        let mut refreshed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => refreshed += 1,
                Ok((url, Err(err))) => {
                    tracing::warn!(site_id, url = %url, "Competitor refresh failed, keeping stale data: {}", err)
                }
                Err(err) => tracing::error!(site_id, "Competitor refresh task panicked: {}", err),
            }
        }
        Ok(refreshed)
    }

    /// Build a full report for `site_id`, bounded by the configured timeout.
    pub async fn get_report(self: &Arc<Self>, site_id: &str, options: ReportOptions) -> Result<Report, InsightsError> {
        let seconds = self.config.report.timeout_seconds;
        let started = Instant::now();

        let result = match tokio::time::timeout(Duration::from_secs(seconds), self.build_report(site_id, options)).await {
            Ok(result) => result,
            Err(_) => Err(InsightsError::Timeout {
                operation: format!("report for {}", site_id),
                seconds,
            }),
        };

        if let Some(metrics) = &self.metrics {
            metrics.report_build_duration.observe(started.elapsed().as_secs_f64());
            match &result {
                Ok(_) => metrics.reports_built_total.inc(),
                Err(_) => metrics.report_failures_total.inc(),
            }
        }
        match &result {
            Ok(report) => tracing::info!(
                site_id,
                metrics = report.summary.metrics_analyzed,
                direction = ?report.summary.overall_direction,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Report built"
            ),
            Err(err) => tracing::error!(site_id, "Report failed: {}", err),
        }
        result
    }

    async fn build_report(self: &Arc<Self>, site_id: &str, mut options: ReportOptions) -> Result<Report, InsightsError> {
        // Pin the window so every stage sees the same end time.
        options.as_of = Some(options.period_end());

        if options.refresh_competitors && self.provider.is_some() {
            let seconds = self.config.report.competitor_refresh_timeout_seconds;
            match tokio::time::timeout(Duration::from_secs(seconds), self.refresh_outdated_competitors(site_id)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => tracing::warn!(site_id, "Competitor refresh skipped: {}", err),
                Err(_) => tracing::warn!(site_id, seconds, "Competitor refresh timed out, using stale data"),
            }
        }

        let (snapshots, competitors) = tokio::try_join!(
            self.store.query(site_id, options.period_start(), options.period_end(), Interval::Daily),
            self.store.load_competitors(site_id),
        )?;

        let series: BTreeMap<String, MetricSeries> = options
            .tracked_metrics
            .iter()
            .map(|key| (key.clone(), MetricSeries::from_snapshots(site_id, key.as_str(), &snapshots)))
            .filter(|(_, s)| !s.is_empty())
            .collect();
        if series.is_empty() {
            return Err(InsightsError::NoHistoricalData {
                site_id: site_id.to_string(),
            });
        }

        let mut tasks = JoinSet::new();
        for (key, s) in &series {
            let analyzer = self.analyzer.clone();
            let forecaster = self.forecaster.clone();
            let key = key.clone();
            let s = s.clone();
            let horizon = options.forecast_horizon();
            tasks.spawn_blocking(move || analyze_metric(&analyzer, &forecaster, &key, &s, horizon));
        }

        let mut outcomes = Vec::with_capacity(series.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => tracing::error!(site_id, "Analysis task panicked: {}", err),
            }
        }

        Ok(self.synthesizer.assemble(
            site_id,
            series,
            outcomes,
            &competitors,
            &options,
            |key, stage, err| self.analysis_failed(site_id, key, stage, err),
        ))
    }

    fn analysis_failed(&self, site_id: &str, metric_key: &str, stage: &str, err: &InsightsError) {
        tracing::warn!(site_id, metric = metric_key, stage, "Analysis failed, omitting metric: {}", err);
        if let Some(metrics) = &self.metrics {
            metrics.analysis_failures_total.with_label_values(&[stage]).inc();
        }
    }

    /// Rank the site's latest value of `metric_key` (within the last
    /// `lookback_days`) against its stored competitors.
    pub async fn compare_metric(
        &self,
        site_id: &str,
        metric_key: &str,
        lookback_days: u32,
    ) -> Result<MetricComparison, InsightsError> {
        let end = Utc::now();
        let start = end - chrono::Duration::days(i64::from(lookback_days));
        let (snapshots, competitors) = tokio::try_join!(
            self.store.fetch_range(site_id, start, end),
            self.store.load_competitors(site_id),
        )?;

        let mut site_metrics = MetricMap::new();
        for snapshot in &snapshots {
            site_metrics.extend(snapshot.metrics.iter().map(|(k, v)| (k.clone(), *v)));
        }
        self.benchmark
            .compare_metric(site_id, metric_key, &site_metrics, &competitors)
    }
}

impl std::fmt::Debug for SiteInsightsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteInsightsEngine")
            .field("backend", &self.store.backend_name())
            .field("provider", &self.provider.as_ref().map(|p| p.provider_name().to_string()))
            .field("forecaster", &self.forecaster)
            .finish_non_exhaustive()
    }
}
