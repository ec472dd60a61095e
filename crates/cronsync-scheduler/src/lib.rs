//! # CronSync Scheduler
//!
//! [`SchedulerAdapter`] implementations over the native job schedulers.
//!
//! - [`CrontabAdapter`] - POSIX per-user crontab, marked lines, single atomic install
//! - [`TaskSchedulerAdapter`] - one Windows task per managed job under a dedicated folder
//!
//! The variant is chosen once at startup by [`build_adapter`].
//!
//! [`SchedulerAdapter`]: cronsync_protocols::SchedulerAdapter

pub mod crontab;
pub mod factory;
pub mod taskscheduler;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crontab::CrontabAdapter;
pub use factory::{build_adapter, detect_kind};
pub use taskscheduler::TaskSchedulerAdapter;
