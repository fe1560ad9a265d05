//! Time handling for extraction requests and schedules.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Serde helpers for the wire encoding of timestamps: ISO-8601 with
/// millisecond precision and a literal `Z` suffix.
pub mod iso_ms {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::parse_iso;

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        parse_iso(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        use super::super::parse_iso;
        use super::FORMAT;

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            ser: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => ser.serialize_some(&dt.format(FORMAT).to_string()),
                None => ser.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            de: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let s: Option<String> = Option::deserialize(de)?;
            match s {
                Some(s) => parse_iso(&s).map(Some).map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

/// Parse an ISO-8601 timestamp, accepting the millisecond wire format,
/// plain RFC 3339, and a bare `YYYY-MM-DDTHH:MM:SS`.
pub fn parse_iso(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, iso_ms::FORMAT) {
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(TimeParseError::InvalidFormat(s.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),
}

/// A concrete, closed time range assigned to a backend query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(with = "iso_ms")]
    pub from: DateTime<Utc>,
    #[serde(with = "iso_ms")]
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn duration(&self) -> Duration {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.to <= self.from
    }

    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        dt >= &self.from && dt <= &self.to
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}",
            self.from.format(iso_ms::FORMAT),
            self.to.format(iso_ms::FORMAT)
        )
    }
}

/// The reference time window a request or schedule firing targets.
///
/// Both ends are optional on the wire: a missing `from` defaults to a
/// last-hour window and a missing `to` is treated as "now" by the planner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reftime {
    #[serde(with = "iso_ms::option", default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(with = "iso_ms::option", default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
}

impl Reftime {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn from_range(range: TimeRange) -> Self {
        Self::new(range.from, range.to)
    }

    /// Canonical identity string, used for duplicate suppression of
    /// event-triggered firings.
    pub fn key(&self) -> String {
        let fmt = |dt: &Option<DateTime<Utc>>| match dt {
            Some(dt) => dt.format(iso_ms::FORMAT).to_string(),
            None => "open".to_string(),
        };
        format!("{}/{}", fmt(&self.from), fmt(&self.to))
    }
}

impl std::fmt::Display for Reftime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iso_ms() {
        let dt = parse_iso("2024-01-15T12:00:00.000Z").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap());

        let dt = parse_iso("2024-01-15T12:00:00Z").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_wire_format_round_trip() {
        let reftime = Reftime::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 1, 0, 0).unwrap(),
        );

        let json = serde_json::to_string(&reftime).unwrap();
        assert!(json.contains("2024-01-15T00:00:00.000Z"), "wire format must carry milliseconds: {}", json);

        let parsed: Reftime = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, reftime);
    }

    #[test]
    fn test_range_empty() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert!(TimeRange::new(t0, t0).is_empty());
        assert!(!TimeRange::new(t0, t0 + Duration::hours(1)).is_empty());
    }
}
