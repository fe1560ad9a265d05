//! Schedule lifecycle, recurrence cadence and on-data-ready triggering.

pub mod crontab;
pub mod data_ready;
pub mod manager;
pub mod window;

pub use data_ready::{evaluate_data_ready, DataReadyEvent};
pub use manager::{is_due, ScheduleManager};
pub use window::advance_window;
