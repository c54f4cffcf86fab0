//! Bulk-ingestion HTTP client
//!
//! One POST per batch. The response is classified into a [`DeliveryOutcome`]
//! instead of an error so the importer decides how a rejected batch affects
//! the run. Nothing is retried here.

use crate::config::ImportConfig;
use crate::Event;
use async_trait::async_trait;
use backfill_common::{BackfillError, Result};
use reqwest::{Client, StatusCode};
use serde::Serialize;

/// Result of sending one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint answered HTTP 200
    Success,
    Failure(DeliveryFailure),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success)
    }
}

/// Why a batch was not accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// HTTP status, or `None` when no response arrived
    pub status: Option<u16>,

    /// Reason phrase, or the transport error text
    pub message: String,

    /// Response body, empty for transport errors
    pub body: String,
}

impl DeliveryFailure {
    pub fn transport(err: &reqwest::Error) -> Self {
        Self {
            status: None,
            message: err.to_string(),
            body: String::new(),
        }
    }
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} - {}", status, self.message),
            None => write!(f, "no response - {}", self.message),
        }
    }
}

/// Destination for event batches (dependency injection)
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Send one batch and report whether it was accepted
    async fn deliver(&self, events: &[Event]) -> DeliveryOutcome;
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    api_key: &'a str,
    events: &'a [Event],
    options: UploadOptions,
}

#[derive(Serialize)]
struct UploadOptions {
    min_id_length: u32,
}

/// HTTP implementation of [`BatchSink`]
pub struct IngestClient {
    client: Client,
    endpoint: String,
    api_key: String,
    min_id_length: u32,
}

impl IngestClient {
    /// Create a client for the configured endpoint
    pub fn new(config: &ImportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackfillError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            min_id_length: config.min_id_length,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, events: &[Event]) -> std::result::Result<DeliveryOutcome, reqwest::Error> {
        let request = UploadRequest {
            api_key: &self.api_key,
            events,
            options: UploadOptions {
                min_id_length: self.min_id_length,
            },
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(DeliveryOutcome::Success);
        }

        // A body that cannot be read should not hide the status code
        let body = response.text().await.unwrap_or_default();
        Ok(DeliveryOutcome::Failure(DeliveryFailure {
            status: Some(status.as_u16()),
            message: status.canonical_reason().unwrap_or("Unknown Status").to_string(),
            body,
        }))
    }
}

#[async_trait]
impl BatchSink for IngestClient {
    async fn deliver(&self, events: &[Event]) -> DeliveryOutcome {
        match self.post(events).await {
            Ok(outcome) => outcome,
            Err(e) => DeliveryOutcome::Failure(DeliveryFailure::transport(&e)),
        }
    }
}
