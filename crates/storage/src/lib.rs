//! Storage abstractions for weather-extract services.
//!
//! Provides unified interfaces for:
//! - SQLite-backed dataset catalog (read-only lookup for the engine)
//! - Request / schedule / file-output records and their status machine
//! - Redis streams job queue and the periodic transport registry

pub mod catalog;
pub mod queue;
pub mod records;

pub use catalog::{BackendKind, Catalog, DataCategory, DataFormat, Dataset};
pub use queue::{ExtractionJob, JobKind, JobQueue, PeriodicTransport, TransportEntry};
pub use records::{
    CrontabSpec, FileOutputRecord, PeriodUnit, Records, RequestRecord, RequestStatus,
    ScheduleRecord, TriggerSpec,
};
