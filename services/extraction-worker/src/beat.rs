//! Schedule beat loop.
//!
//! Periodically scans the transport registry, re-derives the window for
//! each due schedule, creates the request record and enqueues the job.
//! Also enqueues the daily retention cleanup.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use extract_common::time::{Reftime, TimeRange};
use extract_common::ExtractionResult;
use scheduling::{advance_window, is_due};
use storage::queue::{ExtractionJob, JobKind, JobQueue, PeriodicTransport};
use storage::records::{Records, RequestRecord, TriggerSpec};

pub struct Beat {
    transport: Arc<dyn PeriodicTransport>,
    records: Arc<Records>,
    queue: Arc<Mutex<JobQueue>>,
    last_cleanup: Option<DateTime<Utc>>,
}

impl Beat {
    pub fn new(
        transport: Arc<dyn PeriodicTransport>,
        records: Arc<Records>,
        queue: Arc<Mutex<JobQueue>>,
    ) -> Self {
        Self {
            transport,
            records,
            queue,
            last_cleanup: None,
        }
    }

    /// Run until shutdown, ticking every `interval_secs`.
    pub async fn run_forever(
        mut self,
        interval_secs: u64,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            if let Err(e) = self.tick(Utc::now()).await {
                warn!(error = %e, "Beat tick failed");
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutting down beat loop");
                    break;
                }
                _ = tokio::time::sleep(std::time::Duration::from_secs(interval_secs)) => {}
            }
        }

        Ok(())
    }

    /// One pass over the registry.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> ExtractionResult<()> {
        for entry in self.transport.list().await? {
            if !is_due(&entry, now) {
                continue;
            }

            let schedule = match self.records.get_schedule(entry.schedule_id).await? {
                Some(schedule) if schedule.enabled => schedule,
                Some(_) => {
                    debug!(schedule = %entry.schedule_id, "Registered schedule is disabled, skipping");
                    continue;
                }
                None => {
                    warn!(schedule = %entry.schedule_id, "Orphan transport entry, cancelling");
                    self.transport.cancel(entry.schedule_id).await?;
                    continue;
                }
            };

            let window = match entry.trigger {
                TriggerSpec::Periodic { every, unit } => advance_window(
                    schedule.args.reftime.to.unwrap_or(schedule.created_at),
                    schedule.time_delta,
                    schedule.created_at,
                    every,
                    unit,
                    now,
                ),
                // Crontab firings window back from the firing instant.
                TriggerSpec::Crontab(_) => TimeRange::new(now - schedule.time_delta, now),
            };

            let mut job = schedule.args.clone();
            job.reftime = Reftime::from_range(window);
            job.schedule_id = Some(schedule.id);
            job.data_ready = false;

            let record = RequestRecord::new(schedule.user_id, schedule.name.clone(), job.clone());
            job.request_id = Some(record.id);

            self.records.create_request(&record).await?;
            self.queue.lock().await.enqueue(&job).await?;
            self.transport.mark_fired(entry.schedule_id, now).await?;

            info!(
                schedule = %schedule.id,
                request = %record.id,
                window = %window,
                "Enqueued scheduled extraction"
            );
        }

        if self
            .last_cleanup
            .map_or(true, |last| now - last >= Duration::days(1))
        {
            let cleanup = ExtractionJob {
                kind: JobKind::RetentionCleanup,
                ..ExtractionJob::new(Uuid::nil(), Vec::new(), Reftime::default())
            };
            self.queue.lock().await.enqueue(&cleanup).await?;
            self.last_cleanup = Some(now);
            debug!("Enqueued retention cleanup");
        }

        Ok(())
    }
}
