//! Backfill - replay archived events into a bulk-ingestion endpoint

use anyhow::{Context, Result};
use backfill_common::logging::{init_logging, LogConfig, LogLevel};
use backfill_ingest::client::IngestClient;
use backfill_ingest::config::{self, ImportConfig};
use backfill_ingest::pipeline::Importer;
use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "backfill")]
#[command(author, version, about = "Replay gzip JSON-lines archives into a bulk-ingestion API")]
struct Cli {
    /// Directory searched recursively for archives
    directory: PathBuf,

    /// Ingestion API key
    #[arg(long, env = config::API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    /// Bulk-ingestion endpoint URL
    #[arg(long, env = "BACKFILL_ENDPOINT", default_value = config::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Ledger of completed archives
    #[arg(long, env = "BACKFILL_PROGRESS_FILE", default_value = config::DEFAULT_PROGRESS_FILE)]
    progress_file: PathBuf,

    /// Maximum events per request
    #[arg(long, default_value_t = NonZeroUsize::new(config::DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN))]
    batch_size: NonZeroUsize,

    /// Minimum milliseconds between requests
    #[arg(long, default_value_t = config::DEFAULT_RATE_INTERVAL_MS)]
    interval_ms: u64,

    /// Request timeout in seconds
    #[arg(long, env = "BACKFILL_TIMEOUT_SECS", default_value_t = config::DEFAULT_REQUEST_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Archive file extension
    #[arg(long, default_value = config::DEFAULT_EXTENSION)]
    extension: String,

    /// Value sent as options.min_id_length
    #[arg(long, default_value_t = 0)]
    min_id_length: u32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn import_config(&self) -> backfill_common::Result<ImportConfig> {
        let api_key = self
            .api_key
            .clone()
            .ok_or(backfill_common::BackfillError::MissingCredential(config::API_KEY_ENV))?;

        Ok(ImportConfig::new(api_key)?
            .with_endpoint(self.endpoint.clone())
            .with_progress_path(self.progress_file.clone())
            .with_batch_size(self.batch_size)
            .with_rate_interval(Duration::from_millis(self.interval_ms))
            .with_request_timeout(Duration::from_secs(self.timeout_secs))
            .with_extension(self.extension.clone())
            .with_min_id_length(self.min_id_length))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("backfill")
        .build();

    // Environment variables take precedence over CLI defaults
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        },
    };

    match run(&cli).await {
        Ok(true) => {},
        Ok(false) => process::exit(1),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Import aborted");
            process::exit(1);
        },
    }
}

/// Returns whether every pending archive was delivered
async fn run(cli: &Cli) -> Result<bool> {
    // Missing credential aborts before any filesystem or network work
    let config = cli.import_config()?;
    info!(?config, dir = %cli.directory.display(), "Starting import");

    let client = IngestClient::new(&config)?;
    info!(endpoint = client.endpoint(), "Delivering to endpoint");
    let mut importer = Importer::new(config, client);
    let summary = importer
        .run(&cli.directory)
        .await
        .with_context(|| format!("Import of {} failed", cli.directory.display()))?;

    info!(
        completed = summary.completed_files,
        skipped = summary.skipped,
        submitted = summary.submitted,
        failed = summary.failed,
        "Import finished"
    );

    Ok(summary.is_success())
}
