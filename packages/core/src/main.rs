use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;

use seo_trend_tracker::cli::{Cli, Command, CompetitorCommand, IngestArgs, ReportArgs};
use seo_trend_tracker::config::{Config, StorageBackend};
use seo_trend_tracker::db::create_pool;
use seo_trend_tracker::error::AppError;
use seo_trend_tracker::file_store::JsonFileStore;
use seo_trend_tracker::insights::{
    InsightsConfig, MetricMap, MetricSnapshot, RegisterOptions, ReportOptions, SiteInsightsEngine,
};
use seo_trend_tracker::logging::init_logging;
use seo_trend_tracker::metrics::AppMetrics;
use seo_trend_tracker::repository::SqliteMetricsRepository;
use seo_trend_tracker::store::{InMemoryMetricsStore, MetricsStore, DEFAULT_CAPACITY};

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    if let Err(err) = run(Cli::parse()).await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let mut config = Config::from_env().map_err(AppError::Config)?;
    if let Some(backend) = cli.backend {
        config.storage_backend = backend.into();
    }
    if let Some(data_dir) = cli.data_dir.clone() {
        config.data_dir = data_dir;
    }
    if let Some(database_url) = cli.database_url.clone() {
        config.database_url = database_url;
    }
    tracing::debug!("Service started with config: {:?}", config);

    let insights_config = load_insights_config(&config)?;
    let store = open_store(&config).await?;
    let metrics = Arc::new(AppMetrics::new().map_err(|err| AppError::Config(err.to_string()))?);
    let engine = Arc::new(SiteInsightsEngine::new(insights_config, store)?.with_metrics(metrics));

    match cli.command {
        Command::Ingest(args) => ingest(&engine, args).await,
        Command::Report(args) => report(&engine, args).await,
        Command::Competitor(command) => competitor(&engine, command).await,
    }
}

fn load_insights_config(config: &Config) -> Result<InsightsConfig, AppError> {
    let mut insights = match &config.analysis_config_path {
        Some(path) => InsightsConfig::from_json_file(path)?,
        None => InsightsConfig::default(),
    };
    insights.benchmark.max_competitors = config.max_competitors;
    insights.report.timeout_seconds = config.report_timeout_seconds;
    Ok(insights)
}

async fn open_store(config: &Config) -> Result<Arc<dyn MetricsStore>, AppError> {
    let store: Arc<dyn MetricsStore> = match config.storage_backend {
        StorageBackend::File => Arc::new(JsonFileStore::new(config.data_dir.clone())),
        StorageBackend::Sqlite => {
            let pool = create_pool(&config.database_url).await?;
            Arc::new(SqliteMetricsRepository::new(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("Memory backend selected; nothing survives this process");
            Arc::new(InMemoryMetricsStore::new(DEFAULT_CAPACITY))
        }
    };
    tracing::info!(backend = store.backend_name(), "Store ready");
    Ok(store)
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<(), AppError> {
    let body = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", body);
    Ok(())
}

fn read_metric_map(inline: Option<&str>, file: Option<&Path>) -> Result<MetricMap, AppError> {
    let raw = match (inline, file) {
        (Some(raw), _) => raw.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|err| AppError::Parse(format!("cannot read {}: {}", path.display(), err)))?,
        (None, None) => return Err(AppError::Parse("no metrics given".to_string())),
    };
    Ok(serde_json::from_str(&raw)?)
}

async fn ingest(engine: &Arc<SiteInsightsEngine>, args: IngestArgs) -> Result<(), AppError> {
    let metrics = read_metric_map(args.metrics.as_deref(), args.file.as_deref())?;
    let snapshot = MetricSnapshot::new(
        args.site.as_str(),
        args.timestamp.unwrap_or_else(chrono::Utc::now),
        metrics,
    )
    .with_source(args.source);
    let ack = engine.ingest(snapshot).await?;
    print_json(&ack, false)
}

async fn report(engine: &Arc<SiteInsightsEngine>, args: ReportArgs) -> Result<(), AppError> {
    let mut options = ReportOptions {
        tracking_period_days: args.days,
        enable_prediction: !args.no_prediction,
        prediction_horizon_days: args.horizon,
        ..ReportOptions::default()
    };
    if !args.metrics.is_empty() {
        options.tracked_metrics = args.metrics;
    }
    let report = engine.get_report(&args.site, options).await?;
    print_json(&report, args.pretty)
}

async fn competitor(engine: &Arc<SiteInsightsEngine>, command: CompetitorCommand) -> Result<(), AppError> {
    match command {
        CompetitorCommand::Add {
            site,
            url,
            name,
            tags,
            notes,
        } => {
            let options = RegisterOptions {
                name,
                analyze_immediately: engine.provider().is_some(),
                tags,
                notes,
            };
            let response = engine.register_competitor(&site, &url, options).await?;
            print_json(&response, false)
        }
        CompetitorCommand::List { site } => {
            let competitors = engine.list_competitors(&site).await?;
            print_json(&competitors, true)
        }
        CompetitorCommand::Compare { site, metric, days } => {
            let comparison = engine.compare_metric(&site, &metric, days).await?;
            print_json(&comparison, true)
        }
    }
}
