//! Crontab field matching for schedule triggers.
//!
//! Fields are single values or wildcards; day-of-week uses the cron
//! convention 0 = Sunday. When both day fields are set, both must match.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};

use storage::records::CrontabSpec;

/// Whether the crontab matches this exact minute.
pub fn matches(spec: &CrontabSpec, dt: DateTime<Utc>) -> bool {
    field_matches(spec.minute, dt.minute())
        && field_matches(spec.hour, dt.hour())
        && day_matches(spec, dt.date_naive())
}

/// First matching minute strictly after `after`, within one year.
pub fn next_match(spec: &CrontabSpec, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut cursor = truncate_minute(after) + Duration::minutes(1);
    let limit = after + Duration::days(366);

    while cursor <= limit {
        if !day_matches(spec, cursor.date_naive()) {
            // Jump to the next midnight
            cursor = truncate_minute(cursor)
                .with_hour(0)
                .and_then(|d| d.with_minute(0))
                .unwrap_or(cursor)
                + Duration::days(1);
            continue;
        }

        if matches(spec, cursor) {
            return Some(cursor);
        }

        cursor += Duration::minutes(1);
    }

    None
}

/// Whether a matching instant exists in `(start, end]`.
pub fn fires_between(spec: &CrontabSpec, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    match next_match(spec, start) {
        Some(at) => at <= end,
        None => false,
    }
}

fn field_matches(field: Option<u32>, value: u32) -> bool {
    field.map_or(true, |f| f == value)
}

fn day_matches(spec: &CrontabSpec, date: NaiveDate) -> bool {
    field_matches(spec.month_of_year, date.month())
        && field_matches(spec.day_of_month, date.day())
        && field_matches(spec.day_of_week, date.weekday().num_days_from_sunday())
}

fn truncate_minute(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}
