//! Engine configuration, constructed once at startup and passed by
//! reference into the planner, extractor and quota checks.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Configuration shared by the extraction components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Observation-store retention horizon in days: data older than
    /// `now - retention_days` lives only in the archive store.
    pub retention_days: i64,
    /// Per-request output ceiling in bytes.
    pub max_output_size: u64,
    /// Per-user cumulative disk quota in bytes.
    pub user_quota: u64,
    /// Root for persisted outputs; one subdirectory per user.
    pub data_dir: PathBuf,
    /// Root for in-flight temporary artifacts; one subdirectory per request.
    pub tmp_dir: PathBuf,
    /// Validity intervals (hours) of the products in the multi-model
    /// pseudo-dataset; the planner extends `to` by the longest of these.
    pub multimodel_validity_hours: Vec<u32>,
    /// Completed requests older than this many days are removed by the
    /// retention cleanup job.
    pub request_retention_days: i64,
}

impl FederationConfig {
    /// Boundary between the observation store and the archive store.
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.retention_days)
    }

    /// Longest validity extension for multi-model planning.
    pub fn multimodel_extension(&self) -> Duration {
        let hours = self.multimodel_validity_hours.iter().max().copied().unwrap_or(0);
        Duration::hours(hours as i64)
    }

    /// Directory holding a user's persisted outputs.
    pub fn user_dir(&self, user_id: Uuid) -> PathBuf {
        self.data_dir.join(user_id.to_string())
    }

    /// Scratch directory for one request's intermediate files.
    pub fn request_tmp_dir(&self, request_id: Uuid) -> PathBuf {
        self.tmp_dir.join(request_id.to_string())
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            retention_days: 10,
            max_output_size: 1 << 30,
            user_quota: 5 << 30,
            data_dir: Path::new("/data/outputs").to_path_buf(),
            tmp_dir: Path::new("/tmp/weather-extract").to_path_buf(),
            multimodel_validity_hours: vec![],
            request_retention_days: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_retention_cutoff() {
        let config = FederationConfig {
            retention_days: 10,
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(
            config.retention_cutoff(now),
            Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_multimodel_extension_takes_longest() {
        let config = FederationConfig {
            multimodel_validity_hours: vec![24, 72, 48],
            ..Default::default()
        };
        assert_eq!(config.multimodel_extension(), Duration::hours(72));
    }
}
