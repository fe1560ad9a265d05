//! Error types for weather-extract services.

use thiserror::Error;

/// Result type alias using ExtractionError.
pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// Primary error type threaded through planner, extractor, pipeline and
/// quota checks. The task executor is the single place that converts a
/// terminal `Err` into a persisted FAILURE state.
#[derive(Debug, Error)]
pub enum ExtractionError {
    // === Request Errors ===
    #[error("Access denied to dataset: {0}")]
    AccessDenied(String),

    #[error("Invalid time range: {0}")]
    InvalidRange(String),

    #[error("Invalid filters: {0}")]
    InvalidFilters(String),

    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    // === Extraction Errors ===
    #[error("The query produced an empty result")]
    EmptyOutputFile,

    #[error("User disk quota exceeded: {0}")]
    DiskQuotaExceeded(String),

    #[error("Maximum output size exceeded: {0}")]
    MaxOutputSizeExceeded(String),

    #[error("Post-processing failed: {0}")]
    PostProcessing(String),

    // === Schedule Errors ===
    #[error("Schedule conflict: {0}")]
    Conflict(String),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(String),

    // === Infrastructure Errors ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractionError {
    /// Message persisted on the request record and shown to the owner.
    ///
    /// Business-rule violations are surfaced verbatim; infrastructure
    /// failures collapse to a generic message so internals never leak.
    pub fn user_message(&self) -> String {
        match self {
            ExtractionError::Database(_)
            | ExtractionError::Queue(_)
            | ExtractionError::Backend(_)
            | ExtractionError::Internal(_) => "Failed to extract data".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether this error must also disable the owning recurring schedule.
    pub fn disables_schedule(&self) -> bool {
        matches!(
            self,
            ExtractionError::DiskQuotaExceeded(_) | ExtractionError::MaxOutputSizeExceeded(_)
        )
    }
}

// Conversion from common error types
impl From<std::io::Error> for ExtractionError {
    fn from(err: std::io::Error) -> Self {
        ExtractionError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ExtractionError {
    fn from(err: serde_json::Error) -> Self {
        ExtractionError::Internal(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_internals() {
        let err = ExtractionError::Database("connection refused on 10.0.0.3".to_string());
        assert_eq!(err.user_message(), "Failed to extract data");

        let err = ExtractionError::InvalidRange("to < from".to_string());
        assert_eq!(err.user_message(), "Invalid time range: to < from");
    }

    #[test]
    fn test_quota_errors_disable_schedule() {
        assert!(ExtractionError::DiskQuotaExceeded("1 GB over".into()).disables_schedule());
        assert!(ExtractionError::MaxOutputSizeExceeded("too big".into()).disables_schedule());
        assert!(!ExtractionError::EmptyOutputFile.disables_schedule());
    }
}
