//! Schedule lifecycle operations.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

use extract_common::{ExtractionError, ExtractionResult};
use storage::queue::{ExtractionJob, PeriodicTransport, TransportEntry};
use storage::records::{Records, ScheduleRecord, TriggerSpec};

use crate::crontab;

/// Owns the lifecycle of recurring job definitions: persistence plus the
/// transport-level periodic job that mirrors each non-event-only schedule.
pub struct ScheduleManager<'a> {
    records: &'a Records,
    transport: Arc<dyn PeriodicTransport>,
}

impl<'a> ScheduleManager<'a> {
    pub fn new(records: &'a Records, transport: Arc<dyn PeriodicTransport>) -> Self {
        Self { records, transport }
    }

    /// Create a schedule. The trigger is periodic XOR crontab (the enum
    /// admits exactly one); on-data-ready may combine with either or stand
    /// alone as an additional early-fire condition. Unless the schedule is
    /// purely event-triggered, a transport job carrying the full argument
    /// bundle plus the schedule id is registered.
    pub async fn create(
        &self,
        user_id: Uuid,
        name: impl Into<String>,
        mut args: ExtractionJob,
        trigger: Option<TriggerSpec>,
        on_data_ready: bool,
        time_delta: Duration,
        opendata: bool,
    ) -> ExtractionResult<ScheduleRecord> {
        if trigger.is_none() && !on_data_ready {
            return Err(ExtractionError::InvalidFilters(
                "A schedule needs a periodic, crontab or data-ready trigger".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        args.schedule_id = Some(id);
        args.opendata = opendata;

        let record = ScheduleRecord {
            id,
            user_id,
            name: name.into(),
            args,
            trigger,
            enabled: true,
            on_data_ready,
            time_delta,
            opendata,
            created_at: Utc::now(),
        };

        self.records.create_schedule(&record).await?;

        if let Some(trigger) = &record.trigger {
            self.transport.register(id, trigger, &record.args).await?;
        }

        info!(schedule = %id, on_data_ready = on_data_ready, "Created schedule");
        Ok(record)
    }

    /// Re-enable a disabled schedule, recreating its transport job from the
    /// persisted argument bundle. Enabling an already-enabled schedule is a
    /// conflict, not a no-op.
    pub async fn enable(&self, id: Uuid) -> ExtractionResult<()> {
        let record = self.require(id).await?;

        let active = match record.trigger {
            Some(_) => self.transport.is_registered(id).await?,
            None => record.enabled,
        };
        if active {
            return Err(ExtractionError::Conflict(format!(
                "Schedule {} is already enabled",
                id
            )));
        }

        if let Some(trigger) = &record.trigger {
            self.transport.register(id, trigger, &record.args).await?;
        }
        self.records.set_schedule_enabled(id, true).await?;

        info!(schedule = %id, "Enabled schedule");
        Ok(())
    }

    /// Disable a schedule, cancelling its transport job. Disabling an
    /// already-disabled schedule is a conflict, not a no-op.
    pub async fn disable(&self, id: Uuid) -> ExtractionResult<()> {
        let record = self.require(id).await?;
        let registered = self.transport.is_registered(id).await?;

        if !record.enabled && !registered {
            return Err(ExtractionError::Conflict(format!(
                "Schedule {} is already disabled",
                id
            )));
        }

        if registered {
            self.transport.cancel(id).await?;
        }
        self.records.set_schedule_enabled(id, false).await?;

        info!(schedule = %id, "Disabled schedule");
        Ok(())
    }

    /// Delete a schedule: cancel its transport job (if any), then drop the
    /// record.
    pub async fn delete(&self, id: Uuid) -> ExtractionResult<()> {
        self.require(id).await?;
        self.transport.cancel(id).await?;
        self.records.delete_schedule(id).await?;

        info!(schedule = %id, "Deleted schedule");
        Ok(())
    }

    async fn require(&self, id: Uuid) -> ExtractionResult<ScheduleRecord> {
        self.records
            .get_schedule(id)
            .await?
            .ok_or_else(|| ExtractionError::ScheduleNotFound(id.to_string()))
    }
}

/// Whether a registered transport entry is due to fire at `now`, relative
/// to its last firing (or registration).
pub fn is_due(entry: &TransportEntry, now: DateTime<Utc>) -> bool {
    let anchor = entry.last_fired.unwrap_or(entry.registered_at);

    match &entry.trigger {
        TriggerSpec::Periodic { every, unit } => {
            let period = unit.duration() * (*every).max(1) as i32;
            now - anchor >= period
        }
        TriggerSpec::Crontab(spec) => crontab::fires_between(spec, anchor, now),
    }
}
