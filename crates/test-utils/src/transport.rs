//! In-memory transport registry for hermetic tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use extract_common::ExtractionResult;
use storage::queue::{ExtractionJob, PeriodicTransport, TransportEntry};
use storage::records::TriggerSpec;

/// HashMap-backed drop-in for the redis transport registry.
#[derive(Default)]
pub struct InMemoryTransport {
    entries: Mutex<HashMap<Uuid, TransportEntry>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PeriodicTransport for InMemoryTransport {
    async fn register(
        &self,
        schedule_id: Uuid,
        trigger: &TriggerSpec,
        payload: &ExtractionJob,
    ) -> ExtractionResult<()> {
        self.entries.lock().unwrap().insert(
            schedule_id,
            TransportEntry {
                schedule_id,
                trigger: *trigger,
                payload: payload.clone(),
                registered_at: Utc::now(),
                last_fired: None,
            },
        );

        Ok(())
    }

    async fn cancel(&self, schedule_id: Uuid) -> ExtractionResult<()> {
        self.entries.lock().unwrap().remove(&schedule_id);
        Ok(())
    }

    async fn is_registered(&self, schedule_id: Uuid) -> ExtractionResult<bool> {
        Ok(self.entries.lock().unwrap().contains_key(&schedule_id))
    }

    async fn list(&self) -> ExtractionResult<Vec<TransportEntry>> {
        Ok(self.entries.lock().unwrap().values().cloned().collect())
    }

    async fn mark_fired(&self, schedule_id: Uuid, at: DateTime<Utc>) -> ExtractionResult<()> {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(&schedule_id) {
            entry.last_fired = Some(at);
        }

        Ok(())
    }
}
