//! Catalog and guide ingestion
//!
//! `refresh` runs the per-source pipeline, `scheduler` decides when it runs
//! and where (isolated worker vs in-process), `worker` is the process
//! boundary between the two.

pub mod refresh;
pub mod scheduler;
pub mod worker;

pub use refresh::RefreshService;
pub use scheduler::{SchedulerEvent, SchedulerSender, SchedulerService};
