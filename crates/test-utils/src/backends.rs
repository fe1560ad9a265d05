//! In-memory archive backend for hermetic tests.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use extract_common::time::TimeRange;
use extract_common::ExtractionResult;
use federation::backend::{ArchiveBackend, ObsMessage};

/// Canned archive store: serves a fixed binary payload and a fixed message
/// list, and remembers the matchers it was queried with.
#[derive(Default)]
pub struct InMemoryArchive {
    payload: Vec<u8>,
    messages: Vec<ObsMessage>,
    seen_matchers: Mutex<Vec<String>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_messages(mut self, messages: Vec<ObsMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Matchers received so far, in query order.
    pub fn seen_matchers(&self) -> Vec<String> {
        self.seen_matchers.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveBackend for InMemoryArchive {
    async fn estimate_size(
        &self,
        _datasets: &[String],
        matcher: &str,
        _range: TimeRange,
    ) -> ExtractionResult<u64> {
        self.seen_matchers.lock().unwrap().push(matcher.to_string());
        Ok(self.payload.len() as u64)
    }

    async fn extract_to_file(
        &self,
        _datasets: &[String],
        matcher: &str,
        _range: TimeRange,
        dest: &Path,
    ) -> ExtractionResult<u64> {
        self.seen_matchers.lock().unwrap().push(matcher.to_string());

        if self.payload.is_empty() {
            return Ok(0);
        }

        tokio::fs::write(dest, &self.payload).await?;
        Ok(self.payload.len() as u64)
    }

    async fn fetch_messages(
        &self,
        _datasets: &[String],
        matcher: &str,
        range: TimeRange,
    ) -> ExtractionResult<Vec<ObsMessage>> {
        self.seen_matchers.lock().unwrap().push(matcher.to_string());

        Ok(self
            .messages
            .iter()
            .filter(|m| range.contains(&m.reftime))
            .cloned()
            .collect())
    }
}
