//! Window re-derivation for recurring schedules.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use extract_common::time::TimeRange;
use storage::records::PeriodUnit;

/// Re-derive the window for a schedule firing.
///
/// The new `to` is the first submission's `to` advanced by the whole
/// periods elapsed since first submission, measured in the schedule's own
/// unit; a partial unit still counts as elapsed when it crosses a
/// unit-aligned calendar boundary relative to `now`. `from` keeps the
/// original window duration. Deterministic in
/// (first_to, first_submission, unit, every, now).
pub fn advance_window(
    first_to: DateTime<Utc>,
    time_delta: Duration,
    first_submission: DateTime<Utc>,
    every: u32,
    unit: PeriodUnit,
    now: DateTime<Utc>,
) -> TimeRange {
    let unit_secs = unit.duration().num_seconds();
    let elapsed_secs = (now - first_submission).num_seconds().max(0);
    let mut whole_units = elapsed_secs / unit_secs;

    if elapsed_secs % unit_secs > 0 {
        let anchor = first_submission + Duration::seconds(whole_units * unit_secs);
        if truncate_to_unit(now, unit) > truncate_to_unit(anchor, unit) {
            whole_units += 1;
        }
    }

    let every = every.max(1) as i64;
    let period_units = (whole_units / every) * every;
    let new_to = first_to + Duration::seconds(period_units * unit_secs);

    TimeRange::new(new_to - time_delta, new_to)
}

/// Truncate a timestamp to the start of its unit-aligned bucket.
fn truncate_to_unit(dt: DateTime<Utc>, unit: PeriodUnit) -> DateTime<Utc> {
    let minute = dt
        .with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt);

    match unit {
        PeriodUnit::Minutes => minute,
        PeriodUnit::Hours => minute.with_minute(0).unwrap_or(minute),
        PeriodUnit::Days => minute
            .with_minute(0)
            .and_then(|d| d.with_hour(0))
            .unwrap_or(minute),
        PeriodUnit::Weeks => {
            let midnight = minute
                .with_minute(0)
                .and_then(|d| d.with_hour(0))
                .unwrap_or(minute);
            midnight - Duration::days(midnight.weekday().num_days_from_monday() as i64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_reference_case_two_day_period() {
        // First window [2024-01-01T00:00, 01:00], every 2 days, submitted
        // 2024-01-01; firing on 2024-01-09 yields [01-09T00:00, 01-09T01:00].
        let first_to = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let submitted = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap();

        let window = advance_window(
            first_to,
            Duration::hours(1),
            submitted,
            2,
            PeriodUnit::Days,
            now,
        );

        assert_eq!(window.from, Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap());
        assert_eq!(window.to, Utc.with_ymd_and_hms(2024, 1, 9, 1, 0, 0).unwrap());
    }

    #[test]
    fn test_partial_unit_crossing_day_boundary_counts() {
        // Submitted mid-morning; the beat fires just after midnight eight
        // calendar days later. Only 7 whole 24h spans elapsed, but the
        // partial one crosses a day boundary, so it counts.
        let first_to = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let submitted = Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 9, 0, 5, 0).unwrap();

        let window = advance_window(
            first_to,
            Duration::hours(1),
            submitted,
            2,
            PeriodUnit::Days,
            now,
        );

        assert_eq!(window.to, Utc.with_ymd_and_hms(2024, 1, 9, 1, 0, 0).unwrap());
    }

    #[test]
    fn test_incomplete_period_does_not_advance() {
        // Three days into a 2-day period schedule: one whole period.
        let first_to = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let submitted = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();

        let window = advance_window(
            first_to,
            Duration::hours(1),
            submitted,
            2,
            PeriodUnit::Days,
            now,
        );

        assert_eq!(window.to, Utc.with_ymd_and_hms(2024, 1, 3, 1, 0, 0).unwrap());
    }

    #[test]
    fn test_hourly_schedule() {
        let first_to = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        let submitted = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 6, 10, 0).unwrap();

        let window = advance_window(
            first_to,
            Duration::minutes(30),
            submitted,
            6,
            PeriodUnit::Hours,
            now,
        );

        assert_eq!(window.to, Utc.with_ymd_and_hms(2024, 1, 1, 6, 30, 0).unwrap());
        assert_eq!(window.duration(), Duration::minutes(30));
    }

    #[test]
    fn test_deterministic_for_equal_inputs() {
        let first_to = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let submitted = Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 7, 45, 0).unwrap();

        let a = advance_window(first_to, Duration::hours(6), submitted, 3, PeriodUnit::Days, now);
        let b = advance_window(first_to, Duration::hours(6), submitted, 3, PeriodUnit::Days, now);
        assert_eq!(a, b);
    }
}
