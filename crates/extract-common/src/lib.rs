//! Common types and utilities shared across all weather-extract services.

pub mod config;
pub mod dataset;
pub mod error;
pub mod time;

pub use config::FederationConfig;
pub use dataset::{BackendKind, DataCategory, DataFormat, Dataset};
pub use error::{ExtractionError, ExtractionResult};
pub use time::{Reftime, TimeRange};
