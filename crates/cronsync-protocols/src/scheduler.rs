//! Capability contract over a native job scheduler.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::plan::PlanAction;
use crate::types::{EntryMarker, EntrySpec, NativeHandle, SchedulerEntry};

/// The fixed set of native scheduler variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerKind {
    /// POSIX per-user crontab.
    Crontab,
    /// Windows Task Scheduler.
    TaskScheduler,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::Crontab => write!(f, "crontab"),
            SchedulerKind::TaskScheduler => write!(f, "task-scheduler"),
        }
    }
}

/// Native scheduler operations.
///
/// Every call re-reads native state; implementations keep no cache between
/// calls. Write operations leave the native store either untouched or fully
/// updated.
#[async_trait]
pub trait SchedulerAdapter: Send + Sync {
    fn kind(&self) -> SchedulerKind;

    /// Every entry currently installed, managed and foreign.
    async fn list(&self) -> Result<Vec<SchedulerEntry>, SchedulerError>;

    async fn create(&self, entry: &EntrySpec) -> Result<(), SchedulerError>;

    /// Replace every entry carrying `id` with exactly one entry built from
    /// `entry`. Fails with [`SchedulerError::NotFound`] when there is none.
    async fn update(&self, id: Uuid, entry: &EntrySpec) -> Result<(), SchedulerError>;

    /// Remove every entry carrying `id`. Succeeds when there is none.
    async fn delete(&self, id: Uuid) -> Result<(), SchedulerError>;

    async fn exists(&self, id: Uuid) -> Result<bool, SchedulerError>;

    /// Attach an identity marker to a foreign entry, keeping its schedule and command.
    async fn adopt(
        &self,
        handle: &NativeHandle,
        marker: &EntryMarker,
    ) -> Result<(), SchedulerError>;

    /// Apply several plan actions, returning one result per action in order.
    ///
    /// The default runs each action on its own. Adapters whose native store
    /// is a single document override this to validate every action against
    /// one read and install the outcome with a single write.
    async fn apply_batch(&self, actions: &[PlanAction]) -> Vec<Result<(), SchedulerError>> {
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            let result = match action {
                PlanAction::Create { spec } => self.create(spec).await,
                PlanAction::Update { spec, .. } => self.update(spec.id(), spec).await,
                PlanAction::Delete { marker } => self.delete(marker.id).await,
                PlanAction::NoOp { .. } => Ok(()),
            };
            results.push(result);
        }
        results
    }
}
