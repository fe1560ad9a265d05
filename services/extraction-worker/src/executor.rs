//! The unit of work a worker runs for one queued job.
//!
//! Drives planning, extraction, quota checks and post-processing, and owns
//! the request status machine: every terminal `Err` from the pipeline is
//! converted to a persisted FAILURE exactly here. Status transitions are
//! committed individually, so a worker crash mid-extraction leaves the
//! request in STARTED; reconciling those is an external operational
//! concern.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use extract_common::dataset::Dataset;
use extract_common::{ExtractionError, ExtractionResult, FederationConfig};
use federation::planner::{self, QueryIntent};
use federation::{FederatedExtractor, FilterSet};
use postprocess::{Pipeline, StageOutput, ToolsConfig};
use quota::QuotaChecker;
use scheduling::ScheduleManager;
use storage::catalog::{BackendKind, Catalog};
use storage::queue::{ExtractionJob, JobKind, PeriodicTransport};
use storage::records::{FileOutputRecord, Records, RequestRecord};

use crate::notify::Notifier;

/// Everything one job execution needs, shared across the worker pool.
pub struct ExecutorContext {
    pub config: FederationConfig,
    pub tools: ToolsConfig,
    pub catalog: Catalog,
    pub records: Records,
    pub extractor: FederatedExtractor,
    pub transport: Arc<dyn PeriodicTransport>,
    pub notifier: Notifier,
}

/// Executes queued jobs against the shared context.
pub struct TaskExecutor {
    ctx: Arc<ExecutorContext>,
}

impl TaskExecutor {
    pub fn new(ctx: Arc<ExecutorContext>) -> Self {
        Self { ctx }
    }

    /// Dispatch one claimed job by kind.
    pub async fn execute(&self, task_id: &str, job: ExtractionJob) -> ExtractionResult<()> {
        match job.kind {
            JobKind::DataExtraction => self.execute_extraction(task_id, job).await,
            JobKind::RetentionCleanup => self.run_retention_cleanup().await,
        }
    }

    #[instrument(skip(self, job), fields(user = %job.user_id))]
    async fn execute_extraction(&self, task_id: &str, job: ExtractionJob) -> ExtractionResult<()> {
        let records = &self.ctx.records;

        // Scheduler-created jobs reference an existing record; fresh
        // submissions create their own.
        let record = match job.request_id {
            Some(id) => match records.get_request(id).await? {
                Some(record) => record,
                None => {
                    warn!(request = %id, "Request record vanished before execution, dropping job");
                    return Ok(());
                }
            },
            None => {
                let record = RequestRecord::new(job.user_id, request_name(&job), job.clone());
                records.create_request(&record).await?;
                record
            }
        };

        // Duplicate event-triggered firing: the record never becomes
        // user-visible, it is deleted rather than failed.
        if job.data_ready {
            if let Some(schedule_id) = job.schedule_id {
                if records
                    .schedule_has_success_for(schedule_id, &job.reftime)
                    .await?
                {
                    info!(
                        request = %record.id,
                        schedule = %schedule_id,
                        "Duplicate data-ready run, deleting suppressed record"
                    );
                    records.delete_request(record.id).await?;
                    return Ok(());
                }
            }
        }

        records.mark_started(record.id, task_id).await?;
        info!(request = %record.id, task = task_id, "Extraction started");

        let outcome = self.run_extraction(&record, &job).await;

        // Temporary artifacts go away on every terminal transition.
        let tmp_dir = self.ctx.config.request_tmp_dir(record.id);
        if tmp_dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&tmp_dir).await {
                warn!(request = %record.id, error = %e, "Failed to remove temporary directory");
            }
        }

        match outcome {
            Ok(output) => {
                records.create_file_output(&output).await?;
                records.mark_success(record.id).await?;
                info!(request = %record.id, filename = %output.filename, size = output.size, "Extraction succeeded");

                let record = records.get_request(record.id).await?.unwrap_or(record);
                self.ctx.notifier.notify(&record, Some(&output)).await;
            }
            Err(err) => {
                let message = self.failure_message(&job, &err).await;
                records.mark_failure(record.id, &message).await?;
                info!(request = %record.id, error = %message, "Extraction failed");

                let record = records.get_request(record.id).await?.unwrap_or(record);
                self.ctx.notifier.notify(&record, None).await;
            }
        }

        Ok(())
    }

    /// Plan → extract → post-process → quota-check, returning the
    /// persisted output reference. Any error is terminal for this run.
    async fn run_extraction(
        &self,
        record: &RequestRecord,
        job: &ExtractionJob,
    ) -> ExtractionResult<FileOutputRecord> {
        let config = &self.ctx.config;
        let datasets = self.resolve_datasets(job).await?;

        let plan = planner::plan(
            &datasets,
            &job.reftime,
            QueryIntent::Extract,
            config,
            Utc::now(),
        )?;
        let filters = FilterSet::from_request(&job.filters);

        let user_dir = config.user_dir(job.user_id);
        let quota = QuotaChecker::new(config);

        // Pre-flight: exact for archive-backed plans; observation-backed
        // extraction is checked post-flight on the real file instead.
        if let Some(estimate) = self
            .ctx
            .extractor
            .estimate_size(&datasets, &plan, &filters)
            .await?
        {
            quota.check(&user_dir, estimate, job.opendata)?;
        }

        let tmp_dir = config.request_tmp_dir(record.id);
        tokio::fs::create_dir_all(&tmp_dir).await?;

        let raw_format = match datasets[0].backend {
            BackendKind::Archive => datasets[0].format,
            BackendKind::Observation => extract_common::DataFormat::Bufr,
        };
        let raw_path = tmp_dir.join(format!("extracted.{}", raw_format.extension()));

        self.ctx
            .extractor
            .extract(&datasets, &plan, &filters, job.only_reliable, &raw_path)
            .await?;

        let pipeline = Pipeline::new(&self.ctx.tools);
        let final_output = pipeline
            .run(
                &job.postprocessors,
                StageOutput::new(raw_path, raw_format),
                job.output_format,
                &tmp_dir,
            )
            .await?;

        let size = tokio::fs::metadata(&final_output.path).await?.len();
        quota.check(&user_dir, size, job.opendata)?;

        // Only now does anything land in the user's output directory.
        tokio::fs::create_dir_all(&user_dir).await?;
        let filename = format!("{}.{}", record.id, final_output.format.extension());
        tokio::fs::copy(&final_output.path, user_dir.join(&filename)).await?;

        Ok(FileOutputRecord {
            id: Uuid::new_v4(),
            user_id: job.user_id,
            request_id: record.id,
            filename,
            size,
        })
    }

    async fn resolve_datasets(&self, job: &ExtractionJob) -> ExtractionResult<Vec<Dataset>> {
        if job.datasets.is_empty() {
            return Err(ExtractionError::InvalidFilters(
                "No datasets requested".to_string(),
            ));
        }

        let mut datasets = Vec::with_capacity(job.datasets.len());
        for name in &job.datasets {
            let dataset = self.ctx.catalog.require_dataset(name).await?;
            if !self.ctx.catalog.user_allowed(job.user_id, &dataset).await? {
                return Err(ExtractionError::AccessDenied(name.clone()));
            }
            datasets.push(dataset);
        }

        Ok(datasets)
    }

    /// Build the persisted failure message; a quota violation on a
    /// recurring non-event-triggered run also pauses the owning schedule
    /// and says so.
    async fn failure_message(&self, job: &ExtractionJob, err: &ExtractionError) -> String {
        let mut message = err.user_message();

        if err.disables_schedule() && !job.data_ready {
            if let Some(schedule_id) = job.schedule_id {
                match self.disable_schedule(schedule_id).await {
                    Ok(name) => {
                        message.push_str(&format!(
                            " The schedule \"{}\" has been disabled; re-enable it once \
                             space is available.",
                            name
                        ));
                    }
                    Err(e) => {
                        warn!(schedule = %schedule_id, error = %e, "Failed to disable schedule after quota violation");
                    }
                }
            }
        }

        message
    }

    async fn disable_schedule(&self, schedule_id: Uuid) -> ExtractionResult<String> {
        let record = self
            .ctx
            .records
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| ExtractionError::ScheduleNotFound(schedule_id.to_string()))?;

        let manager = ScheduleManager::new(&self.ctx.records, self.ctx.transport.clone());
        match manager.disable(schedule_id).await {
            // A concurrent run of the same schedule may have paused it first.
            Ok(()) | Err(ExtractionError::Conflict(_)) => {}
            Err(e) => return Err(e),
        }

        info!(schedule = %schedule_id, "Disabled schedule after quota violation");
        Ok(record.name)
    }

    /// Drop terminal requests (and their output files) past the retention
    /// window.
    async fn run_retention_cleanup(&self) -> ExtractionResult<()> {
        let cutoff = Utc::now() - Duration::days(self.ctx.config.request_retention_days);
        let expired = self
            .ctx
            .records
            .terminal_requests_older_than(cutoff)
            .await?;

        let mut removed = 0usize;
        for request in expired {
            if let Some(output) = self
                .ctx
                .records
                .file_output_for_request(request.id)
                .await?
            {
                let path = self.ctx.config.user_dir(request.user_id).join(&output.filename);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove expired output file");
                }
            }

            self.ctx.records.delete_request(request.id).await?;
            removed += 1;
        }

        info!(removed = removed, "Retention cleanup complete");
        Ok(())
    }
}

fn request_name(job: &ExtractionJob) -> String {
    format!("{} {}", job.datasets.join("+"), job.reftime.key())
}
