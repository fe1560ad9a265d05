//! Fixture builders shared by workspace tests.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use extract_common::dataset::{BackendKind, DataCategory, DataFormat, Dataset};
use extract_common::time::Reftime;
use federation::backend::ObsMessage;
use storage::queue::ExtractionJob;

/// An archive-backed forecast dataset in an open license group.
pub fn archive_dataset(name: &str) -> Dataset {
    Dataset {
        id: Uuid::new_v4(),
        name: name.to_string(),
        backend: BackendKind::Archive,
        format: DataFormat::Grib,
        category: DataCategory::Forecast,
        license_group_id: Uuid::new_v4(),
        multi_model: false,
    }
}

/// An observation-backed dataset in an open license group.
pub fn obs_dataset(name: &str) -> Dataset {
    Dataset {
        id: Uuid::new_v4(),
        name: name.to_string(),
        backend: BackendKind::Observation,
        format: DataFormat::Bufr,
        category: DataCategory::Observed,
        license_group_id: Uuid::new_v4(),
        multi_model: false,
    }
}

/// A temperature observation at a fixed station.
pub fn obs_message(network: &str, station: &str, reftime: DateTime<Utc>, value: f64) -> ObsMessage {
    ObsMessage {
        network: network.to_string(),
        station: station.to_string(),
        lon: 11.34,
        lat: 44.5,
        reftime,
        level: "103,2000".to_string(),
        timerange: "254,0,0".to_string(),
        varcode: "B12101".to_string(),
        value,
        confidence: None,
    }
}

/// A one-off extraction job for the given datasets and window.
pub fn one_off_job(user_id: Uuid, datasets: &[&str], reftime: Reftime) -> ExtractionJob {
    ExtractionJob::new(
        user_id,
        datasets.iter().map(|s| s.to_string()).collect(),
        reftime,
    )
}
