//! Reconciliation error types.

use cronsync_protocols::{NativeHandle, PlanAction, SchedulerError};
use thiserror::Error;
use uuid::Uuid;

/// One plan action the native scheduler rejected.
///
/// Other actions of the same plan are unaffected.
#[derive(Debug, Error)]
#[error("{action} failed: {source}")]
pub struct ApplyError {
    pub action: PlanAction,
    #[source]
    pub source: SchedulerError,
}

impl ApplyError {
    pub fn new(action: PlanAction, source: SchedulerError) -> Self {
        Self { action, source }
    }

    pub fn is_unavailable(&self) -> bool {
        self.source.is_unavailable()
    }
}

#[derive(Debug, Error)]
pub enum AdoptError {
    #[error("No native entry with handle {0}")]
    UnknownHandle(NativeHandle),

    #[error("Entry {0} is already managed")]
    AlreadyManaged(NativeHandle),

    #[error("Id {0} is already used by another managed entry")]
    IdInUse(Uuid),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
