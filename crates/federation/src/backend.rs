//! Backend interfaces and the uniform message schema.
//!
//! The two stores' query engines are external collaborators; these traits
//! are the seam the extractor drives them through.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use extract_common::time::{iso_ms, TimeRange};
use extract_common::ExtractionResult;

use crate::filters::ObservationQuery;

/// One observed or forecast value in the uniform message schema used by
/// the transient merge store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObsMessage {
    pub network: String,
    pub station: String,
    pub lon: f64,
    pub lat: f64,
    #[serde(with = "iso_ms")]
    pub reftime: DateTime<Utc>,
    pub level: String,
    pub timerange: String,
    pub varcode: String,
    pub value: f64,
    /// Quality-control confidence in percent, when the producer attached
    /// one.
    pub confidence: Option<f64>,
}

impl ObsMessage {
    /// Identity key: messages with equal keys are the same logical record
    /// regardless of which store produced them.
    pub fn key(&self) -> MessageKey {
        MessageKey {
            network: self.network.clone(),
            station: self.station.clone(),
            reftime: self.reftime,
            varcode: self.varcode.clone(),
            level: self.level.clone(),
            timerange: self.timerange.clone(),
        }
    }
}

/// Unique identity of a message across both stores.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageKey {
    pub network: String,
    pub station: String,
    pub reftime: DateTime<Utc>,
    pub varcode: String,
    pub level: String,
    pub timerange: String,
}

/// The immutable, matcher-queried archive store.
#[async_trait]
pub trait ArchiveBackend: Send + Sync {
    /// Exact result size in bytes via a summary query, without extracting.
    async fn estimate_size(
        &self,
        datasets: &[String],
        matcher: &str,
        range: TimeRange,
    ) -> ExtractionResult<u64>;

    /// Stream matching data to `dest`; returns bytes written.
    async fn extract_to_file(
        &self,
        datasets: &[String],
        matcher: &str,
        range: TimeRange,
        dest: &Path,
    ) -> ExtractionResult<u64>;

    /// Materialize matching rows as uniform messages (split-plan path).
    async fn fetch_messages(
        &self,
        datasets: &[String],
        matcher: &str,
        range: TimeRange,
    ) -> ExtractionResult<Vec<ObsMessage>>;
}

/// The rolling-window relational observation store.
#[async_trait]
pub trait ObservationBackend: Send + Sync {
    /// Stream matching observations to `dest`; returns bytes written.
    /// `only_reliable` drops values below the quality-control threshold.
    async fn extract_to_file(
        &self,
        query: &ObservationQuery,
        range: TimeRange,
        only_reliable: bool,
        dest: &Path,
    ) -> ExtractionResult<u64>;

    /// Materialize matching observations as uniform messages.
    async fn fetch_messages(
        &self,
        query: &ObservationQuery,
        range: TimeRange,
        only_reliable: bool,
    ) -> ExtractionResult<Vec<ObsMessage>>;
}
