//! Request, schedule and file-output record persistence using SQLite with
//! sqlx.
//!
//! The engine drives these records through a small create/get/update/delete
//! API; transitions are committed individually, so a worker crash can leave
//! a request in STARTED (reconciliation is an external concern).

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::debug;
use uuid::Uuid;

use extract_common::time::Reftime;
use extract_common::{ExtractionError, ExtractionResult};

use crate::queue::ExtractionJob;

/// Extraction request status state machine: CREATED → STARTED →
/// {SUCCESS | FAILURE}, terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Created,
    Started,
    Success,
    Failure,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "STARTED" => Self::Started,
            "SUCCESS" => Self::Success,
            "FAILURE" => Self::Failure,
            _ => Self::Created,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Unit of a periodic schedule's interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl PeriodUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "minutes" => Self::Minutes,
            "hours" => Self::Hours,
            "weeks" => Self::Weeks,
            _ => Self::Days,
        }
    }

    /// Length of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            Self::Minutes => Duration::minutes(1),
            Self::Hours => Duration::hours(1),
            Self::Days => Duration::days(1),
            Self::Weeks => Duration::weeks(1),
        }
    }
}

/// Crontab shape: each field is a single value or absent (wildcard).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrontabSpec {
    pub minute: Option<u32>,
    pub hour: Option<u32>,
    pub day_of_week: Option<u32>,
    pub day_of_month: Option<u32>,
    pub month_of_year: Option<u32>,
}

/// Recurrence trigger of a schedule. Exactly one of these may be present;
/// the separate on-data-ready flag may combine with either or stand alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    Periodic { every: u32, unit: PeriodUnit },
    Crontab(CrontabSpec),
}

/// A persisted extraction request.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub args: ExtractionJob,
    pub status: RequestStatus,
    pub task_id: Option<String>,
    pub submission_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub schedule_id: Option<Uuid>,
}

impl RequestRecord {
    /// Fresh CREATED record for a submitted argument bundle.
    pub fn new(user_id: Uuid, name: impl Into<String>, args: ExtractionJob) -> Self {
        let schedule_id = args.schedule_id;
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            args,
            status: RequestStatus::Created,
            task_id: None,
            submission_date: Utc::now(),
            end_date: None,
            error_message: None,
            schedule_id,
        }
    }
}

/// A persisted schedule definition.
#[derive(Debug, Clone)]
pub struct ScheduleRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub args: ExtractionJob,
    pub trigger: Option<TriggerSpec>,
    pub enabled: bool,
    pub on_data_ready: bool,
    /// Duration of one requested window; windows are re-derived from this
    /// on every firing.
    pub time_delta: Duration,
    pub opendata: bool,
    pub created_at: DateTime<Utc>,
}

/// A persisted output file reference; exactly one per successful request.
#[derive(Debug, Clone)]
pub struct FileOutputRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub request_id: Uuid,
    pub filename: String,
    pub size: u64,
}

/// Per-status request counts for monitoring.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestStats {
    pub created: u64,
    pub started: u64,
    pub success: u64,
    pub failure: u64,
}

/// Manages record persistence.
pub struct Records {
    pool: SqlitePool,
}

impl Records {
    /// Open or create the records database at the given path.
    pub async fn open(path: &Path) -> ExtractionResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| ExtractionError::Database(format!("Records open failed: {}", e)))?;

        let records = Self { pool };
        records.migrate().await?;
        Ok(records)
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> ExtractionResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| ExtractionError::Database(format!("Records open failed: {}", e)))?;

        let records = Self { pool };
        records.migrate().await?;
        Ok(records)
    }

    async fn migrate(&self) -> ExtractionResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(&self.pool).await.map_err(|e| {
                    ExtractionError::Database(format!("Records migration failed: {}", e))
                })?;
            }
        }

        Ok(())
    }

    // === Requests ===

    pub async fn create_request(&self, record: &RequestRecord) -> ExtractionResult<()> {
        sqlx::query(
            r#"
            INSERT INTO requests
                (id, user_id, name, args, status, task_id, submission_date,
                 end_date, error_message, schedule_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.user_id.to_string())
        .bind(&record.name)
        .bind(serde_json::to_string(&record.args)?)
        .bind(record.status.as_str())
        .bind(&record.task_id)
        .bind(record.submission_date.to_rfc3339())
        .bind(record.end_date.map(|d| d.to_rfc3339()))
        .bind(&record.error_message)
        .bind(record.schedule_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("Request insert failed: {}", e)))?;

        debug!(request = %record.id, "Created request record");
        Ok(())
    }

    pub async fn get_request(&self, id: Uuid) -> ExtractionResult<Option<RequestRecord>> {
        let row: Option<RequestRow> = sqlx::query_as(
            "SELECT id, user_id, name, args, status, task_id, submission_date, \
             end_date, error_message, schedule_id FROM requests WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("Request query failed: {}", e)))?;

        row.map(RequestRecord::try_from).transpose()
    }

    /// CREATED → STARTED, recording the transport task id.
    pub async fn mark_started(&self, id: Uuid, task_id: &str) -> ExtractionResult<()> {
        sqlx::query("UPDATE requests SET status = 'STARTED', task_id = ? WHERE id = ?")
            .bind(task_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ExtractionError::Database(format!("Request update failed: {}", e)))?;

        Ok(())
    }

    /// Terminal SUCCESS transition.
    pub async fn mark_success(&self, id: Uuid) -> ExtractionResult<()> {
        sqlx::query(
            "UPDATE requests SET status = 'SUCCESS', end_date = ?, error_message = NULL \
             WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("Request update failed: {}", e)))?;

        Ok(())
    }

    /// Terminal FAILURE transition with the user-visible message.
    pub async fn mark_failure(&self, id: Uuid, error: &str) -> ExtractionResult<()> {
        sqlx::query(
            "UPDATE requests SET status = 'FAILURE', end_date = ?, error_message = ? \
             WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("Request update failed: {}", e)))?;

        Ok(())
    }

    /// Delete a request and its file-output reference.
    pub async fn delete_request(&self, id: Uuid) -> ExtractionResult<()> {
        sqlx::query("DELETE FROM file_outputs WHERE request_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ExtractionError::Database(format!("File output delete failed: {}", e)))?;

        sqlx::query("DELETE FROM requests WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ExtractionError::Database(format!("Request delete failed: {}", e)))?;

        Ok(())
    }

    /// Whether this schedule already produced a SUCCESS for the exact
    /// reference time window. Guards against duplicate upstream events.
    pub async fn schedule_has_success_for(
        &self,
        schedule_id: Uuid,
        reftime: &Reftime,
    ) -> ExtractionResult<bool> {
        let from = reftime
            .from
            .map(|d| d.format(extract_common::time::iso_ms::FORMAT).to_string());
        let to = reftime
            .to
            .map(|d| d.format(extract_common::time::iso_ms::FORMAT).to_string());

        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM requests \
             WHERE schedule_id = ? AND status = 'SUCCESS' \
             AND json_extract(args, '$.reftime.from') IS ? \
             AND json_extract(args, '$.reftime.to') IS ?",
        )
        .bind(schedule_id.to_string())
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("Request query failed: {}", e)))?;

        Ok(count.0 > 0)
    }

    /// End date of the schedule's most recent successful firing.
    pub async fn last_success_date(
        &self,
        schedule_id: Uuid,
    ) -> ExtractionResult<Option<DateTime<Utc>>> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT MAX(end_date) FROM requests WHERE schedule_id = ? AND status = 'SUCCESS'",
        )
        .bind(schedule_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("Request query failed: {}", e)))?;

        Ok(row
            .and_then(|(date,)| date)
            .and_then(|date| DateTime::parse_from_rfc3339(&date).ok())
            .map(|date| date.with_timezone(&Utc)))
    }

    /// Terminal requests submitted before the cutoff, for retention cleanup.
    pub async fn terminal_requests_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> ExtractionResult<Vec<RequestRecord>> {
        let rows: Vec<RequestRow> = sqlx::query_as(
            "SELECT id, user_id, name, args, status, task_id, submission_date, \
             end_date, error_message, schedule_id FROM requests \
             WHERE status IN ('SUCCESS', 'FAILURE') AND submission_date < ? \
             ORDER BY submission_date ASC",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("Request query failed: {}", e)))?;

        rows.into_iter().map(RequestRecord::try_from).collect()
    }

    /// Per-status request counts.
    pub async fn request_stats(&self) -> ExtractionResult<RequestStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM requests GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| ExtractionError::Database(format!("Request query failed: {}", e)))?;

        let mut stats = RequestStats::default();
        for (status, count) in rows {
            match RequestStatus::from_str(&status) {
                RequestStatus::Created => stats.created = count as u64,
                RequestStatus::Started => stats.started = count as u64,
                RequestStatus::Success => stats.success = count as u64,
                RequestStatus::Failure => stats.failure = count as u64,
            }
        }

        Ok(stats)
    }

    // === Schedules ===

    pub async fn create_schedule(&self, record: &ScheduleRecord) -> ExtractionResult<()> {
        let (kind, every, unit, cron) = trigger_columns(record.trigger.as_ref());

        sqlx::query(
            r#"
            INSERT INTO schedules
                (id, user_id, name, args, trigger_kind, periodic_every, periodic_unit,
                 cron_minute, cron_hour, cron_day_of_week, cron_day_of_month,
                 cron_month_of_year, is_enabled, on_data_ready, time_delta_seconds,
                 opendata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.user_id.to_string())
        .bind(&record.name)
        .bind(serde_json::to_string(&record.args)?)
        .bind(kind)
        .bind(every)
        .bind(unit)
        .bind(cron.minute.map(|v| v as i64))
        .bind(cron.hour.map(|v| v as i64))
        .bind(cron.day_of_week.map(|v| v as i64))
        .bind(cron.day_of_month.map(|v| v as i64))
        .bind(cron.month_of_year.map(|v| v as i64))
        .bind(record.enabled)
        .bind(record.on_data_ready)
        .bind(record.time_delta.num_seconds())
        .bind(record.opendata)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("Schedule insert failed: {}", e)))?;

        debug!(schedule = %record.id, "Created schedule record");
        Ok(())
    }

    pub async fn get_schedule(&self, id: Uuid) -> ExtractionResult<Option<ScheduleRecord>> {
        let row: Option<ScheduleRow> = sqlx::query_as(
            "SELECT id, user_id, name, args, trigger_kind, periodic_every, periodic_unit, \
             cron_minute, cron_hour, cron_day_of_week, cron_day_of_month, cron_month_of_year, \
             is_enabled, on_data_ready, time_delta_seconds, opendata, created_at \
             FROM schedules WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("Schedule query failed: {}", e)))?;

        row.map(ScheduleRecord::try_from).transpose()
    }

    pub async fn set_schedule_enabled(&self, id: Uuid, enabled: bool) -> ExtractionResult<()> {
        sqlx::query("UPDATE schedules SET is_enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ExtractionError::Database(format!("Schedule update failed: {}", e)))?;

        Ok(())
    }

    pub async fn delete_schedule(&self, id: Uuid) -> ExtractionResult<()> {
        sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ExtractionError::Database(format!("Schedule delete failed: {}", e)))?;

        Ok(())
    }

    /// All enabled schedules carrying the on-data-ready flag.
    pub async fn list_data_ready_schedules(&self) -> ExtractionResult<Vec<ScheduleRecord>> {
        let rows: Vec<ScheduleRow> = sqlx::query_as(
            "SELECT id, user_id, name, args, trigger_kind, periodic_every, periodic_unit, \
             cron_minute, cron_hour, cron_day_of_week, cron_day_of_month, cron_month_of_year, \
             is_enabled, on_data_ready, time_delta_seconds, opendata, created_at \
             FROM schedules WHERE is_enabled = 1 AND on_data_ready = 1 \
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("Schedule query failed: {}", e)))?;

        rows.into_iter().map(ScheduleRecord::try_from).collect()
    }

    // === File outputs ===

    /// Record the output file of a successful extraction. The unique
    /// request-id constraint enforces at most one per request.
    pub async fn create_file_output(&self, record: &FileOutputRecord) -> ExtractionResult<()> {
        sqlx::query(
            "INSERT INTO file_outputs (id, user_id, request_id, filename, size) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.user_id.to_string())
        .bind(record.request_id.to_string())
        .bind(&record.filename)
        .bind(record.size as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("File output insert failed: {}", e)))?;

        Ok(())
    }

    pub async fn file_output_for_request(
        &self,
        request_id: Uuid,
    ) -> ExtractionResult<Option<FileOutputRecord>> {
        let row: Option<(String, String, String, String, i64)> = sqlx::query_as(
            "SELECT id, user_id, request_id, filename, size FROM file_outputs \
             WHERE request_id = ?",
        )
        .bind(request_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ExtractionError::Database(format!("File output query failed: {}", e)))?;

        Ok(row.map(|(id, user_id, request_id, filename, size)| FileOutputRecord {
            id: parse_uuid(&id),
            user_id: parse_uuid(&user_id),
            request_id: parse_uuid(&request_id),
            filename,
            size: size as u64,
        }))
    }

    /// Total persisted output bytes for a user (display; the quota check
    /// itself scans the filesystem).
    pub async fn user_output_bytes(&self, user_id: Uuid) -> ExtractionResult<u64> {
        let total: (i64,) =
            sqlx::query_as("SELECT COALESCE(SUM(size), 0) FROM file_outputs WHERE user_id = ?")
                .bind(user_id.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| ExtractionError::Database(format!("File output query failed: {}", e)))?;

        Ok(total.0 as u64)
    }
}

// === Row types ===

#[derive(FromRow)]
struct RequestRow {
    id: String,
    user_id: String,
    name: String,
    args: String,
    status: String,
    task_id: Option<String>,
    submission_date: String,
    end_date: Option<String>,
    error_message: Option<String>,
    schedule_id: Option<String>,
}

impl TryFrom<RequestRow> for RequestRecord {
    type Error = ExtractionError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(RequestRecord {
            id: parse_uuid(&row.id),
            user_id: parse_uuid(&row.user_id),
            name: row.name,
            args: serde_json::from_str(&row.args)?,
            status: RequestStatus::from_str(&row.status),
            task_id: row.task_id,
            submission_date: parse_date(&row.submission_date),
            end_date: row.end_date.as_deref().map(parse_date),
            error_message: row.error_message,
            schedule_id: row.schedule_id.as_deref().map(parse_uuid),
        })
    }
}

#[derive(FromRow)]
struct ScheduleRow {
    id: String,
    user_id: String,
    name: String,
    args: String,
    trigger_kind: Option<String>,
    periodic_every: Option<i64>,
    periodic_unit: Option<String>,
    cron_minute: Option<i64>,
    cron_hour: Option<i64>,
    cron_day_of_week: Option<i64>,
    cron_day_of_month: Option<i64>,
    cron_month_of_year: Option<i64>,
    is_enabled: bool,
    on_data_ready: bool,
    time_delta_seconds: i64,
    opendata: bool,
    created_at: String,
}

impl TryFrom<ScheduleRow> for ScheduleRecord {
    type Error = ExtractionError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        let trigger = match row.trigger_kind.as_deref() {
            Some("periodic") => Some(TriggerSpec::Periodic {
                every: row.periodic_every.unwrap_or(1) as u32,
                unit: PeriodUnit::from_str(row.periodic_unit.as_deref().unwrap_or("days")),
            }),
            Some("crontab") => Some(TriggerSpec::Crontab(CrontabSpec {
                minute: row.cron_minute.map(|v| v as u32),
                hour: row.cron_hour.map(|v| v as u32),
                day_of_week: row.cron_day_of_week.map(|v| v as u32),
                day_of_month: row.cron_day_of_month.map(|v| v as u32),
                month_of_year: row.cron_month_of_year.map(|v| v as u32),
            })),
            _ => None,
        };

        Ok(ScheduleRecord {
            id: parse_uuid(&row.id),
            user_id: parse_uuid(&row.user_id),
            name: row.name,
            args: serde_json::from_str(&row.args)?,
            trigger,
            enabled: row.is_enabled,
            on_data_ready: row.on_data_ready,
            time_delta: Duration::seconds(row.time_delta_seconds),
            opendata: row.opendata,
            created_at: parse_date(&row.created_at),
        })
    }
}

fn trigger_columns(
    trigger: Option<&TriggerSpec>,
) -> (Option<&'static str>, Option<i64>, Option<&'static str>, CrontabSpec) {
    match trigger {
        Some(TriggerSpec::Periodic { every, unit }) => (
            Some("periodic"),
            Some(*every as i64),
            Some(unit.as_str()),
            CrontabSpec::default(),
        ),
        Some(TriggerSpec::Crontab(cron)) => (Some("crontab"), None, None, *cron),
        None => (None, None, None, CrontabSpec::default()),
    }
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_date(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS requests (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    args TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'CREATED',
    task_id TEXT,
    submission_date TEXT NOT NULL,
    end_date TEXT,
    error_message TEXT,
    schedule_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_requests_user ON requests(user_id);
CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status);
CREATE INDEX IF NOT EXISTS idx_requests_schedule ON requests(schedule_id);

CREATE TABLE IF NOT EXISTS schedules (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    args TEXT NOT NULL,
    trigger_kind TEXT,
    periodic_every INTEGER,
    periodic_unit TEXT,
    cron_minute INTEGER,
    cron_hour INTEGER,
    cron_day_of_week INTEGER,
    cron_day_of_month INTEGER,
    cron_month_of_year INTEGER,
    is_enabled INTEGER NOT NULL DEFAULT 1,
    on_data_ready INTEGER NOT NULL DEFAULT 0,
    time_delta_seconds INTEGER NOT NULL,
    opendata INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_schedules_user ON schedules(user_id);
CREATE INDEX IF NOT EXISTS idx_schedules_data_ready ON schedules(on_data_ready, is_enabled);

CREATE TABLE IF NOT EXISTS file_outputs (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    request_id TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    size INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_file_outputs_user ON file_outputs(user_id)
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ExtractionJob, JobKind};
    use chrono::TimeZone;

    fn sample_job(reftime: Reftime, schedule_id: Option<Uuid>) -> ExtractionJob {
        ExtractionJob {
            kind: JobKind::DataExtraction,
            user_id: Uuid::new_v4(),
            datasets: vec!["icon-eu".to_string()],
            reftime,
            filters: Default::default(),
            postprocessors: vec![],
            output_format: None,
            request_id: None,
            only_reliable: false,
            push_queue: None,
            schedule_id,
            data_ready: false,
            opendata: false,
        }
    }

    fn sample_reftime() -> Reftime {
        Reftime::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 1, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_request_lifecycle() {
        let records = Records::open_memory().await.unwrap();
        let user = Uuid::new_v4();

        let request = RequestRecord::new(user, "my extraction", sample_job(sample_reftime(), None));
        records.create_request(&request).await.unwrap();

        records.mark_started(request.id, "task-1").await.unwrap();
        let fetched = records.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RequestStatus::Started);
        assert_eq!(fetched.task_id.as_deref(), Some("task-1"));

        records.mark_success(request.id).await.unwrap();
        let fetched = records.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RequestStatus::Success);
        assert!(fetched.end_date.is_some());
        assert!(fetched.status.is_terminal());

        records.delete_request(request.id).await.unwrap();
        assert!(records.get_request(request.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_keeps_message_verbatim() {
        let records = Records::open_memory().await.unwrap();
        let request = RequestRecord::new(
            Uuid::new_v4(),
            "doomed",
            sample_job(sample_reftime(), None),
        );
        records.create_request(&request).await.unwrap();

        records
            .mark_failure(request.id, "The query produced an empty result")
            .await
            .unwrap();

        let fetched = records.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RequestStatus::Failure);
        assert_eq!(
            fetched.error_message.as_deref(),
            Some("The query produced an empty result")
        );
    }

    #[tokio::test]
    async fn test_duplicate_success_detection_by_reftime() {
        let records = Records::open_memory().await.unwrap();
        let schedule_id = Uuid::new_v4();
        let reftime = sample_reftime();

        let request = RequestRecord::new(
            Uuid::new_v4(),
            "fired",
            sample_job(reftime, Some(schedule_id)),
        );
        records.create_request(&request).await.unwrap();

        assert!(!records
            .schedule_has_success_for(schedule_id, &reftime)
            .await
            .unwrap());

        records.mark_success(request.id).await.unwrap();
        assert!(records
            .schedule_has_success_for(schedule_id, &reftime)
            .await
            .unwrap());

        // A different window is not a duplicate.
        let other = Reftime::new(
            Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 16, 1, 0, 0).unwrap(),
        );
        assert!(!records
            .schedule_has_success_for(schedule_id, &other)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_schedule_round_trip() {
        let records = Records::open_memory().await.unwrap();
        let schedule = ScheduleRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "every two days".to_string(),
            args: sample_job(sample_reftime(), None),
            trigger: Some(TriggerSpec::Periodic {
                every: 2,
                unit: PeriodUnit::Days,
            }),
            enabled: true,
            on_data_ready: false,
            time_delta: Duration::hours(1),
            opendata: false,
            created_at: Utc::now(),
        };

        records.create_schedule(&schedule).await.unwrap();
        let fetched = records.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(
            fetched.trigger,
            Some(TriggerSpec::Periodic {
                every: 2,
                unit: PeriodUnit::Days
            })
        );
        assert_eq!(fetched.time_delta, Duration::hours(1));

        records.set_schedule_enabled(schedule.id, false).await.unwrap();
        assert!(!records.get_schedule(schedule.id).await.unwrap().unwrap().enabled);

        records.delete_schedule(schedule.id).await.unwrap();
        assert!(records.get_schedule(schedule.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_data_ready_listing_filters_disabled() {
        let records = Records::open_memory().await.unwrap();

        let mut ready = ScheduleRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "on ready".to_string(),
            args: sample_job(sample_reftime(), None),
            trigger: None,
            enabled: true,
            on_data_ready: true,
            time_delta: Duration::hours(1),
            opendata: false,
            created_at: Utc::now(),
        };
        records.create_schedule(&ready).await.unwrap();

        ready.id = Uuid::new_v4();
        ready.enabled = false;
        records.create_schedule(&ready).await.unwrap();

        let listed = records.list_data_ready_schedules().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].enabled);
    }

    #[tokio::test]
    async fn test_file_output_unique_per_request() {
        let records = Records::open_memory().await.unwrap();
        let user = Uuid::new_v4();
        let request_id = Uuid::new_v4();

        let output = FileOutputRecord {
            id: Uuid::new_v4(),
            user_id: user,
            request_id,
            filename: "out.grib".to_string(),
            size: 1024,
        };
        records.create_file_output(&output).await.unwrap();
        assert_eq!(records.user_output_bytes(user).await.unwrap(), 1024);

        let duplicate = FileOutputRecord {
            id: Uuid::new_v4(),
            ..output.clone()
        };
        assert!(records.create_file_output(&duplicate).await.is_err());
    }
}
