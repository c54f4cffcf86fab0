//! Import configuration
//!
//! Built once at startup and handed to the importer by value. Nothing in the
//! pipeline reads the environment on its own.

use backfill_common::{BackfillError, Result};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Import Defaults
// ============================================================================

/// Environment variable holding the ingestion API key.
pub const API_KEY_ENV: &str = "API_KEY";

/// Default bulk-ingestion endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api2.amplitude.com/batch";

/// Default ledger of completed archives, relative to the working directory.
pub const DEFAULT_PROGRESS_FILE: &str = "progress.txt";

/// Maximum events per request accepted by the endpoint.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Minimum spacing between two requests, in milliseconds.
pub const DEFAULT_RATE_INTERVAL_MS: u64 = 1000;

/// Per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// File extension of the archives to import.
pub const DEFAULT_EXTENSION: &str = "gz";

/// Settings for one import run
#[derive(Clone)]
pub struct ImportConfig {
    /// Pre-shared key sent in every request body
    pub api_key: String,

    pub endpoint: String,

    /// Append-only ledger of completed archives
    pub progress_path: PathBuf,

    pub batch_size: NonZeroUsize,

    /// Minimum time between the end of one request and the start of the next
    pub rate_interval: Duration,

    pub request_timeout: Duration,

    /// Archive extension without the leading dot
    pub extension: String,

    /// Forwarded to the endpoint as `options.min_id_length`
    pub min_id_length: u32,
}

impl ImportConfig {
    /// Create a config with default settings for the given API key
    ///
    /// A blank key is treated the same as a missing one.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(BackfillError::MissingCredential(API_KEY_ENV));
        }

        Ok(Self {
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            progress_path: PathBuf::from(DEFAULT_PROGRESS_FILE),
            batch_size: default_batch_size(),
            rate_interval: Duration::from_millis(DEFAULT_RATE_INTERVAL_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            extension: DEFAULT_EXTENSION.to_string(),
            min_id_length: 0,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_progress_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.progress_path = path.into();
        self
    }

    pub fn with_batch_size(mut self, size: NonZeroUsize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_rate_interval(mut self, interval: Duration) -> Self {
        self.rate_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Accepts the extension with or without a leading dot
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn with_min_id_length(mut self, min_id_length: u32) -> Self {
        self.min_id_length = min_id_length;
        self
    }
}

// Keeps the key out of debug output and logs.
impl std::fmt::Debug for ImportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("progress_path", &self.progress_path)
            .field("batch_size", &self.batch_size)
            .field("rate_interval", &self.rate_interval)
            .field("request_timeout", &self.request_timeout)
            .field("extension", &self.extension)
            .field("min_id_length", &self.min_id_length)
            .finish()
    }
}

fn default_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN)
}
