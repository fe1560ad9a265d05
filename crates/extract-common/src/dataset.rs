//! Dataset domain types shared across the extraction components.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which storage paradigm serves a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Immutable, file-organized store with unbounded history, queried
    /// with matcher expressions.
    Archive,
    /// Relational time-series store holding a recent rolling window.
    Observation,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::Observation => "observation",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "observation" => Self::Observation,
            _ => Self::Archive,
        }
    }
}

/// Native data format of a dataset's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Grib,
    Bufr,
    Json,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grib => "grib",
            Self::Bufr => "bufr",
            Self::Json => "json",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "bufr" => Self::Bufr,
            "json" => Self::Json,
            _ => Self::Grib,
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

/// Dataset category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataCategory {
    Forecast,
    Observed,
    Radar,
}

impl DataCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forecast => "forecast",
            Self::Observed => "observed",
            Self::Radar => "radar",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "observed" => Self::Observed,
            "radar" => Self::Radar,
            _ => Self::Forecast,
        }
    }
}

/// A catalog entry for one logical dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    pub name: String,
    pub backend: BackendKind,
    pub format: DataFormat,
    pub category: DataCategory,
    pub license_group_id: Uuid,
    /// Pseudo-dataset aggregating several model runs; gets special
    /// time-range planning rules.
    pub multi_model: bool,
}
