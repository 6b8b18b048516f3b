use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::StorageBackend;

/// SEO Trend Tracker CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "seo-trend-tracker",
    version,
    about = "Trend analysis, forecasting and competitor benchmarking for site performance metrics"
)]
pub struct Cli {
    /// Storage backend (overrides STORAGE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Data directory for the file backend (overrides DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// SQLite URL for the sqlite backend (overrides DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BackendArg {
    File,
    Sqlite,
    Memory,
}

impl From<BackendArg> for StorageBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::File => StorageBackend::File,
            BackendArg::Sqlite => StorageBackend::Sqlite,
            BackendArg::Memory => StorageBackend::Memory,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store one snapshot from a JSON object of metric values
    Ingest(IngestArgs),
    /// Build a report and print it as JSON
    Report(ReportArgs),
    /// Manage and compare competitors
    #[command(subcommand)]
    Competitor(CompetitorCommand),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[arg(long)]
    pub site: String,

    /// Metric map, e.g. '{"score": 91, "largestContentfulPaint": 2100}'
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub metrics: Option<String>,

    /// Read the metric map from a JSON file instead
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// RFC 3339 timestamp; defaults to now
    #[arg(long)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Source label recorded on the snapshot
    #[arg(long, default_value = "manual")]
    pub source: String,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[arg(long)]
    pub site: String,

    /// Tracking period in days
    #[arg(long, default_value_t = 30)]
    pub days: u32,

    /// Comma-separated metric keys; defaults to the core metrics
    #[arg(long, value_delimiter = ',')]
    pub metrics: Vec<String>,

    /// Skip forecasting
    #[arg(long)]
    pub no_prediction: bool,

    /// Forecast horizon in days
    #[arg(long, default_value_t = 7)]
    pub horizon: usize,

    /// Pretty-print the JSON output
    #[arg(long)]
    pub pretty: bool,
}

#[derive(Debug, Subcommand)]
pub enum CompetitorCommand {
    /// Register a competitor URL for a site
    Add {
        #[arg(long)]
        site: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// List a site's competitors
    List {
        #[arg(long)]
        site: String,
    },
    /// Rank the site against its competitors on one metric
    Compare {
        #[arg(long)]
        site: String,
        #[arg(long)]
        metric: String,
        /// How far back to look for the site's latest value
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}
