//! Backfill Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Replays archived, gzip-compressed newline-delimited JSON events into a
//! bulk-ingestion HTTP endpoint, one file at a time, under a fixed request
//! rate, and remembers which archives have been fully delivered.
//!
//! # Pipeline
//!
//! - [`discover`]: recursive scan of the archive directory
//! - [`progress`]: append-only ledger of completed archives
//! - [`reader`]: gunzip + per-line JSON parsing
//! - [`batch`]: fixed-size partitioning
//! - [`rate_limit`]: minimum interval between requests
//! - [`client`]: one HTTP request per batch
//! - [`pipeline`]: the importer that drives all of the above
//!
//! # Example
//!
//! ```no_run
//! use backfill_ingest::{client::IngestClient, config::ImportConfig, pipeline::Importer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ImportConfig::new("secret-key")?;
//!     let client = IngestClient::new(&config)?;
//!     let summary = Importer::new(config, client).run("./archive").await?;
//!     println!("submitted {} events", summary.submitted);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod client;
pub mod config;
pub mod discover;
pub mod pipeline;
pub mod progress;
pub mod rate_limit;
pub mod reader;

pub use backfill_common::{BackfillError, Result};

/// One decoded event record. The schema belongs to the ingestion endpoint.
pub type Event = serde_json::Value;
