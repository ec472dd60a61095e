//! Reconciliation plan types.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::types::{EntryMarker, EntrySpec};

/// Why an existing managed entry needs rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftReason {
    Schedule,
    /// Rendered command differs, including environment prefixes.
    Command,
    /// Name or namespace changed for the same id.
    Identity,
    /// More than one native entry carries the same id.
    Duplicate,
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PlanAction {
    Create { spec: EntrySpec },
    Update { spec: EntrySpec, reasons: Vec<DriftReason> },
    Delete { marker: EntryMarker },
    NoOp { marker: EntryMarker },
}

impl PlanAction {
    /// Id of the managed job the action concerns.
    pub fn id(&self) -> Uuid {
        match self {
            PlanAction::Create { spec } | PlanAction::Update { spec, .. } => spec.id(),
            PlanAction::Delete { marker } | PlanAction::NoOp { marker } => marker.id,
        }
    }

    pub fn marker(&self) -> &EntryMarker {
        match self {
            PlanAction::Create { spec } | PlanAction::Update { spec, .. } => &spec.marker,
            PlanAction::Delete { marker } | PlanAction::NoOp { marker } => marker,
        }
    }

    /// Whether applying the action touches the native scheduler.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, PlanAction::NoOp { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlanAction::Create { .. } => "create",
            PlanAction::Update { .. } => "update",
            PlanAction::Delete { .. } => "delete",
            PlanAction::NoOp { .. } => "noop",
        }
    }
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = self.marker();
        write!(
            f,
            "{} {}/{} ({})",
            self.kind(),
            marker.namespace,
            marker.name,
            marker.id
        )
    }
}

/// Ordered actions mapping desired state onto the native scheduler.
///
/// Transient: recomputed every cycle and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    pub actions: Vec<PlanAction>,
}

/// Action counts for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub noop: usize,
}

impl ReconciliationPlan {
    pub fn new(actions: Vec<PlanAction>) -> Self {
        Self { actions }
    }

    /// True when nothing needs to change. `NoOp` steps do not count.
    pub fn is_empty(&self) -> bool {
        !self.actions.iter().any(PlanAction::is_mutation)
    }

    /// Actions that touch the native scheduler, in plan order.
    pub fn mutations(&self) -> impl Iterator<Item = &PlanAction> {
        self.actions.iter().filter(|a| a.is_mutation())
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match action {
                PlanAction::Create { .. } => summary.create += 1,
                PlanAction::Update { .. } => summary.update += 1,
                PlanAction::Delete { .. } => summary.delete += 1,
                PlanAction::NoOp { .. } => summary.noop += 1,
            }
        }
        summary
    }
}
