//! Execution of a resolved extraction plan against the backends.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use extract_common::dataset::{BackendKind, Dataset};
use extract_common::{ExtractionError, ExtractionResult};

use crate::backend::{ArchiveBackend, ObservationBackend};
use crate::filters::{FilterSet, ObservationQuery};
use crate::merge::MergeStore;
use crate::planner::ExtractionPlan;

/// Drives the archive and observation backends according to a plan.
pub struct FederatedExtractor {
    archive: Arc<dyn ArchiveBackend>,
    observation: Arc<dyn ObservationBackend>,
}

impl FederatedExtractor {
    pub fn new(archive: Arc<dyn ArchiveBackend>, observation: Arc<dyn ObservationBackend>) -> Self {
        Self {
            archive,
            observation,
        }
    }

    /// Pre-flight size estimate. Exact for archive-backed plans via the
    /// summary query; observation-backed extraction is cheap enough to run
    /// first, so those plans report no estimate.
    pub async fn estimate_size(
        &self,
        datasets: &[Dataset],
        plan: &ExtractionPlan,
        filters: &FilterSet,
    ) -> ExtractionResult<Option<u64>> {
        let names = dataset_names(datasets);
        let matcher = filters.to_archive_matcher();

        match plan {
            ExtractionPlan::ArchiveOnly(range) => Ok(Some(
                self.archive.estimate_size(&names, &matcher, *range).await?,
            )),
            ExtractionPlan::Split { archive, .. } => Ok(Some(
                self.archive
                    .estimate_size(&names, &matcher, *archive)
                    .await?,
            )),
            ExtractionPlan::ObservationOnly(_) => Ok(None),
        }
    }

    /// Execute the plan, streaming the result to `dest`. Returns bytes
    /// written. A plan whose required sub-ranges all come back empty is an
    /// `EmptyOutputFile` failure; one empty leg of a split with a non-empty
    /// sibling is a normal success.
    pub async fn extract(
        &self,
        datasets: &[Dataset],
        plan: &ExtractionPlan,
        filters: &FilterSet,
        only_reliable: bool,
        dest: &Path,
    ) -> ExtractionResult<u64> {
        require_uniform_backend(datasets)?;

        let names = dataset_names(datasets);
        let matcher = filters.to_archive_matcher();
        let query = observation_query(datasets, filters);

        let written = match plan {
            ExtractionPlan::ArchiveOnly(range) => {
                self.archive
                    .extract_to_file(&names, &matcher, *range, dest)
                    .await?
            }
            ExtractionPlan::ObservationOnly(range) => {
                self.observation
                    .extract_to_file(&query, *range, only_reliable, dest)
                    .await?
            }
            ExtractionPlan::Split {
                observation,
                archive,
            } => {
                let archive_leg = self
                    .archive
                    .fetch_messages(&names, &matcher, *archive)
                    .await?;
                let observation_leg = self
                    .observation
                    .fetch_messages(&query, *observation, only_reliable)
                    .await?;

                if archive_leg.is_empty() {
                    debug!("Archive leg of split plan is empty");
                }
                if observation_leg.is_empty() {
                    debug!("Observation leg of split plan is empty");
                }

                let mut store = MergeStore::new();
                let merged = store.import(observation_leg) + store.import(archive_leg);
                info!(records = merged, "Merged split-plan legs");

                if store.is_empty() {
                    0
                } else {
                    store.write_to(dest).await?
                }
            }
        };

        if written == 0 {
            return Err(ExtractionError::EmptyOutputFile);
        }

        info!(bytes = written, dest = %dest.display(), "Extraction complete");
        Ok(written)
    }
}

fn dataset_names(datasets: &[Dataset]) -> Vec<String> {
    datasets.iter().map(|d| d.name.clone()).collect()
}

/// A request may span several datasets, but they must all live in the same
/// storage paradigm.
fn require_uniform_backend(datasets: &[Dataset]) -> ExtractionResult<()> {
    let mut kinds = datasets.iter().map(|d| d.backend);
    if let Some(first) = kinds.next() {
        if kinds.any(|k| k != first) {
            return Err(ExtractionError::InvalidFilters(
                "Datasets from different backends cannot be extracted together".to_string(),
            ));
        }
    }

    Ok(())
}

/// The dataset name doubles as the network when no explicit network filter
/// is given.
fn observation_query(datasets: &[Dataset], filters: &FilterSet) -> ObservationQuery {
    let mut query = filters.to_observation_query();

    if query.networks.is_empty() {
        query.networks = datasets
            .iter()
            .filter(|d| d.backend == BackendKind::Observation)
            .map(|d| d.name.clone())
            .collect();
    }

    query
}
