//! Output size and per-user disk quota enforcement.
//!
//! Two independent ceilings: a per-request maximum output size and a
//! cumulative per-user disk quota. Used space is measured by a filesystem
//! scan, read-then-compared without a lock: two concurrent jobs for the
//! same user can both pass before either writes. That race is accepted,
//! not a bug to fix here.

use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use extract_common::{ExtractionError, ExtractionResult, FederationConfig};

/// Enforces the size ceilings configured in [`FederationConfig`].
pub struct QuotaChecker<'a> {
    config: &'a FederationConfig,
}

impl<'a> QuotaChecker<'a> {
    pub fn new(config: &'a FederationConfig) -> Self {
        Self { config }
    }

    /// Check `new_bytes` (estimated pre-flight or actual post-flight)
    /// against both ceilings. Opendata requests are exempt from both.
    pub fn check(&self, user_dir: &Path, new_bytes: u64, opendata: bool) -> ExtractionResult<()> {
        if opendata {
            return Ok(());
        }

        if new_bytes > self.config.max_output_size {
            return Err(ExtractionError::MaxOutputSizeExceeded(format!(
                "result is {} bytes, the per-request limit is {} bytes",
                new_bytes, self.config.max_output_size
            )));
        }

        let used = user_disk_usage(user_dir);
        debug!(used = used, new = new_bytes, quota = self.config.user_quota, "Quota check");

        if used + new_bytes > self.config.user_quota {
            return Err(ExtractionError::DiskQuotaExceeded(format!(
                "{} bytes already stored plus {} new bytes exceed the {} byte quota",
                used, new_bytes, self.config.user_quota
            )));
        }

        Ok(())
    }
}

/// Bytes currently stored under a user's output directory. A directory
/// that does not exist yet counts as zero.
pub fn user_disk_usage(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(max_output: u64, quota: u64) -> FederationConfig {
        FederationConfig {
            max_output_size: max_output,
            user_quota: quota,
            ..Default::default()
        }
    }

    #[test]
    fn test_disk_usage_sums_nested_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.grib"), vec![0u8; 100]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.grib"), vec![0u8; 50]).unwrap();

        assert_eq!(user_disk_usage(dir.path()), 150);
        assert_eq!(user_disk_usage(&dir.path().join("missing")), 0);
    }

    #[test]
    fn test_max_output_size_ceiling() {
        let dir = TempDir::new().unwrap();
        let config = config(1000, 10_000);
        let checker = QuotaChecker::new(&config);

        assert!(checker.check(dir.path(), 1000, false).is_ok());
        assert!(matches!(
            checker.check(dir.path(), 1001, false),
            Err(ExtractionError::MaxOutputSizeExceeded(_))
        ));
    }

    #[test]
    fn test_disk_quota_counts_existing_usage() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("old.grib"), vec![0u8; 900]).unwrap();

        let config = config(1000, 1000);
        let checker = QuotaChecker::new(&config);

        assert!(checker.check(dir.path(), 100, false).is_ok());
        assert!(matches!(
            checker.check(dir.path(), 101, false),
            Err(ExtractionError::DiskQuotaExceeded(_))
        ));
    }

    #[test]
    fn test_opendata_is_exempt() {
        let dir = TempDir::new().unwrap();
        let config = config(10, 10);
        let checker = QuotaChecker::new(&config);

        assert!(checker.check(dir.path(), 1_000_000, true).is_ok());
    }
}
