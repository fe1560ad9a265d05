//! On-data-ready trigger evaluation.
//!
//! An external "dataset became ready" event is matched against every
//! enabled on-data-ready schedule; matching schedules yield extraction
//! jobs, with duplicate upstream notifications suppressed.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use extract_common::time::Reftime;
use extract_common::ExtractionResult;
use storage::queue::ExtractionJob;
use storage::records::{Records, TriggerSpec};

use crate::crontab;

/// A "dataset X became ready for run R" notification.
#[derive(Debug, Clone)]
pub struct DataReadyEvent {
    pub dataset: String,
    pub run: String,
    /// When the data became ready.
    pub at: DateTime<Utc>,
    /// The reference window of the data that became ready.
    pub reftime: Reftime,
}

/// Evaluate an event against all enabled on-data-ready schedules and
/// return the jobs to enqueue. An event nobody listens for is a normal
/// empty result, not an error.
pub async fn evaluate_data_ready(
    event: &DataReadyEvent,
    records: &Records,
) -> ExtractionResult<Vec<ExtractionJob>> {
    let schedules = records.list_data_ready_schedules().await?;
    let mut jobs = Vec::new();

    for schedule in schedules {
        if schedule.args.datasets.len() != 1 {
            warn!(
                schedule = %schedule.id,
                datasets = schedule.args.datasets.len(),
                "Multi-dataset on-data-ready schedules are unsupported, skipping"
            );
            continue;
        }

        if schedule.args.datasets[0] != event.dataset {
            continue;
        }

        // Run filter, when present, must include the event's run.
        if let Some(runs) = schedule.args.filters.get("run") {
            if !runs.contains(&event.run) {
                debug!(schedule = %schedule.id, run = %event.run, "Run filter does not match");
                continue;
            }
        }

        // A periodic/crontab shape acts as a cadence gate: the schedule
        // must also have been due at the event time by its own rules.
        // Without a shape the event fires unconditionally.
        if let Some(trigger) = &schedule.trigger {
            let anchor = records
                .last_success_date(schedule.id)
                .await?
                .unwrap_or(schedule.created_at);

            let due = match trigger {
                TriggerSpec::Periodic { every, unit } => {
                    event.at - anchor >= unit.duration() * (*every).max(1) as i32
                }
                TriggerSpec::Crontab(spec) => crontab::fires_between(spec, anchor, event.at),
            };

            if !due {
                debug!(schedule = %schedule.id, "Schedule shape not due at event time");
                continue;
            }
        }

        // Duplicate upstream notification: the same reftime already
        // produced a success for this schedule.
        if records
            .schedule_has_success_for(schedule.id, &event.reftime)
            .await?
        {
            info!(
                schedule = %schedule.id,
                reftime = %event.reftime,
                "Suppressing duplicate data-ready firing"
            );
            continue;
        }

        let mut job = schedule.args.clone();
        job.reftime = event.reftime;
        job.schedule_id = Some(schedule.id);
        job.request_id = None;
        job.data_ready = true;
        job.opendata = schedule.opendata;

        info!(schedule = %schedule.id, dataset = %event.dataset, run = %event.run, "Firing data-ready schedule");
        jobs.push(job);
    }

    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use storage::records::{PeriodUnit, RequestRecord, ScheduleRecord};
    use uuid::Uuid;

    fn reftime() -> Reftime {
        Reftime::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
        )
    }

    fn event(dataset: &str, run: &str) -> DataReadyEvent {
        DataReadyEvent {
            dataset: dataset.to_string(),
            run: run.to_string(),
            at: Utc.with_ymd_and_hms(2024, 1, 15, 13, 0, 0).unwrap(),
            reftime: reftime(),
        }
    }

    fn schedule(datasets: &[&str], trigger: Option<TriggerSpec>) -> ScheduleRecord {
        let mut args = ExtractionJob::new(
            Uuid::new_v4(),
            datasets.iter().map(|s| s.to_string()).collect(),
            Reftime::default(),
        );
        args.data_ready = true;

        ScheduleRecord {
            id: Uuid::new_v4(),
            user_id: args.user_id,
            name: "on ready".to_string(),
            args,
            trigger,
            enabled: true,
            on_data_ready: true,
            time_delta: Duration::hours(12),
            opendata: false,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_event_with_no_listeners_is_a_no_op() {
        let records = Records::open_memory().await.unwrap();
        let jobs = evaluate_data_ready(&event("icon-eu", "12"), &records)
            .await
            .unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_matching_schedule_fires() {
        let records = Records::open_memory().await.unwrap();
        let schedule = schedule(&["icon-eu"], None);
        records.create_schedule(&schedule).await.unwrap();

        let jobs = evaluate_data_ready(&event("icon-eu", "12"), &records)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].schedule_id, Some(schedule.id));
        assert_eq!(jobs[0].reftime, reftime());
        assert!(jobs[0].data_ready);

        // A different dataset does not fire it.
        let jobs = evaluate_data_ready(&event("cosmo", "12"), &records)
            .await
            .unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_multi_dataset_schedule_is_skipped() {
        let records = Records::open_memory().await.unwrap();
        records
            .create_schedule(&schedule(&["icon-eu", "cosmo"], None))
            .await
            .unwrap();

        let jobs = evaluate_data_ready(&event("icon-eu", "12"), &records)
            .await
            .unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_run_filter_gates_firing() {
        let records = Records::open_memory().await.unwrap();
        let mut schedule = schedule(&["icon-eu"], None);
        schedule
            .args
            .filters
            .insert("run".to_string(), vec!["00".to_string(), "12".to_string()]);
        records.create_schedule(&schedule).await.unwrap();

        assert_eq!(
            evaluate_data_ready(&event("icon-eu", "12"), &records)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(evaluate_data_ready(&event("icon-eu", "18"), &records)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_periodic_shape_gates_event() {
        let records = Records::open_memory().await.unwrap();
        // Every 30 days, created 2024-01-01; an event on the 15th is not
        // yet due.
        let monthly = schedule(
            &["icon-eu"],
            Some(TriggerSpec::Periodic {
                every: 30,
                unit: PeriodUnit::Days,
            }),
        );
        records.create_schedule(&monthly).await.unwrap();

        assert!(evaluate_data_ready(&event("icon-eu", "12"), &records)
            .await
            .unwrap()
            .is_empty());

        // Every 7 days is due by the 15th.
        let weekly = schedule(
            &["icon-eu"],
            Some(TriggerSpec::Periodic {
                every: 7,
                unit: PeriodUnit::Days,
            }),
        );
        records.create_schedule(&weekly).await.unwrap();

        let jobs = evaluate_data_ready(&event("icon-eu", "12"), &records)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].schedule_id, Some(weekly.id));
    }

    #[tokio::test]
    async fn test_duplicate_reftime_is_suppressed() {
        let records = Records::open_memory().await.unwrap();
        let schedule = schedule(&["icon-eu"], None);
        records.create_schedule(&schedule).await.unwrap();

        // First firing succeeds.
        let jobs = evaluate_data_ready(&event("icon-eu", "12"), &records)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);

        let request = RequestRecord::new(schedule.user_id, "fired", jobs[0].clone());
        records.create_request(&request).await.unwrap();
        records.mark_success(request.id).await.unwrap();

        // The duplicate upstream notification is suppressed, silently.
        let jobs = evaluate_data_ready(&event("icon-eu", "12"), &records)
            .await
            .unwrap();
        assert!(jobs.is_empty());
    }
}
