//! Time-range planning across the two storage paradigms.
//!
//! Archive-kind datasets always resolve to the archive store. Observation
//! datasets straddle both stores at the retention boundary: recent data
//! lives in the rolling-window observation store, older data only in the
//! archive.

use chrono::{DateTime, Duration, Utc};

use extract_common::dataset::{BackendKind, Dataset};
use extract_common::time::{Reftime, TimeRange};
use extract_common::{ExtractionError, ExtractionResult, FederationConfig};

/// Which read path is asking for the plan. The maps path is re-entered per
/// tile and must never trigger an expensive cold-path scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    Extract,
    Maps,
}

/// A resolved query plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionPlan {
    ArchiveOnly(TimeRange),
    ObservationOnly(TimeRange),
    Split {
        observation: TimeRange,
        archive: TimeRange,
    },
}

impl ExtractionPlan {
    pub fn touches_archive(&self) -> bool {
        matches!(self, Self::ArchiveOnly(_) | Self::Split { .. })
    }
}

/// Compute the plan for one dataset set and requested window.
///
/// A missing `from` defaults to a last-hour window ending now; a missing
/// `to` closes the window at now. Multi-model pseudo-datasets extend `to`
/// forward by the longest configured product validity before planning.
pub fn plan(
    datasets: &[Dataset],
    reftime: &Reftime,
    intent: QueryIntent,
    config: &FederationConfig,
    now: DateTime<Utc>,
) -> ExtractionResult<ExtractionPlan> {
    let (from, mut to) = match (reftime.from, reftime.to) {
        (None, _) => (now - Duration::hours(1), now),
        (Some(from), to) => (from, to.unwrap_or(now)),
    };

    if to < from {
        return Err(ExtractionError::InvalidRange(format!(
            "end {} precedes start {}",
            to, from
        )));
    }

    let multi_model = datasets.iter().any(|d| d.multi_model);
    if multi_model {
        to = to + config.multimodel_extension();
    }

    let plan = if datasets.iter().all(|d| d.backend == BackendKind::Archive) {
        ExtractionPlan::ArchiveOnly(TimeRange::new(from, to))
    } else {
        split_at_retention(from, to, config.retention_cutoff(now))
    };

    if multi_model && intent == QueryIntent::Maps && plan.touches_archive() {
        return Err(ExtractionError::UnsupportedOperation(
            "cold-path archive queries are not available for multi-model map requests"
                .to_string(),
        ));
    }

    Ok(plan)
}

/// Divide an observation-dataset window at the retention cutoff, degrading
/// to a single-backend plan when one leg is empty.
fn split_at_retention(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    cutoff: DateTime<Utc>,
) -> ExtractionPlan {
    if from >= cutoff {
        return ExtractionPlan::ObservationOnly(TimeRange::new(from, to));
    }

    if to <= cutoff {
        return ExtractionPlan::ArchiveOnly(TimeRange::new(from, to));
    }

    let observation = TimeRange::new(cutoff, to);
    let archive = TimeRange::new(from, cutoff);

    if archive.is_empty() {
        ExtractionPlan::ObservationOnly(observation)
    } else if observation.is_empty() {
        ExtractionPlan::ArchiveOnly(archive)
    } else {
        ExtractionPlan::Split {
            observation,
            archive,
        }
    }
}
