//! Scheduler: periodic jobs for the system and for addon services.
//!
//! Jobs fire on interval, cron, or one-shot date triggers. Every job carries
//! a running gate: a trigger that lands while the previous occurrence is
//! still executing is logged and skipped, never run concurrently. Addon
//! services arrive over the `AddonServiceRegister` / `AddonServiceDeregister`
//! chain events.

mod error;
mod scheduler;
mod types;

pub use error::SchedulerError;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use types::{JobStatus, ScheduleInfo};
