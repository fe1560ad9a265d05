//! HTTP client for the archive store's query service.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use extract_common::time::{iso_ms, TimeRange};
use extract_common::{ExtractionError, ExtractionResult};

use crate::backend::{ArchiveBackend, ObsMessage};

/// Archive store client speaking the query service's HTTP API.
pub struct HttpArchive {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    size: u64,
}

impl HttpArchive {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn query_body(datasets: &[String], matcher: &str, range: TimeRange) -> serde_json::Value {
        serde_json::json!({
            "datasets": datasets,
            "matcher": matcher,
            "from": range.from.format(iso_ms::FORMAT).to_string(),
            "to": range.to.format(iso_ms::FORMAT).to_string(),
        })
    }
}

#[async_trait]
impl ArchiveBackend for HttpArchive {
    async fn estimate_size(
        &self,
        datasets: &[String],
        matcher: &str,
        range: TimeRange,
    ) -> ExtractionResult<u64> {
        let response = self
            .client
            .post(format!("{}/summary", self.base_url))
            .json(&Self::query_body(datasets, matcher, range))
            .send()
            .await
            .map_err(|e| ExtractionError::Backend(format!("Archive summary failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ExtractionError::Backend(format!(
                "Archive summary returned {}",
                response.status()
            )));
        }

        let summary: SummaryResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Backend(format!("Archive summary parse failed: {}", e)))?;

        Ok(summary.size)
    }

    async fn extract_to_file(
        &self,
        datasets: &[String],
        matcher: &str,
        range: TimeRange,
        dest: &Path,
    ) -> ExtractionResult<u64> {
        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .json(&Self::query_body(datasets, matcher, range))
            .send()
            .await
            .map_err(|e| ExtractionError::Backend(format!("Archive query failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ExtractionError::Backend(format!(
                "Archive query returned {}",
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| ExtractionError::Backend(format!("Archive stream failed: {}", e)))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        debug!(bytes = written, dest = %dest.display(), "Archive extraction complete");

        Ok(written)
    }

    async fn fetch_messages(
        &self,
        datasets: &[String],
        matcher: &str,
        range: TimeRange,
    ) -> ExtractionResult<Vec<ObsMessage>> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .json(&Self::query_body(datasets, matcher, range))
            .send()
            .await
            .map_err(|e| ExtractionError::Backend(format!("Archive query failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ExtractionError::Backend(format!(
                "Archive query returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ExtractionError::Backend(format!("Archive message parse failed: {}", e)))
    }
}
