//! # CronSync Protocols
//!
//! Shared data model and capability contracts for the cronsync agent.
//! Contains the types every other crate exchanges plus the traits at the
//! seams between them.
//!
//! ## Core Traits
//!
//! - [`SchedulerAdapter`] - Capability contract over a native job scheduler
//! - [`ManifestSource`] - Fetches the latest desired-state revision
//! - [`CommandRunner`] - Runs native CLIs (crontab, schtasks, git)

pub mod error;
pub mod plan;
pub mod process;
pub mod scheduler;
pub mod source;
pub mod types;

pub use error::{FetchError, SchedulerError};
pub use plan::{DriftReason, PlanAction, ReconciliationPlan};
pub use process::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use scheduler::{SchedulerAdapter, SchedulerKind};
pub use source::{ManifestSource, Revision};
pub use types::*;
