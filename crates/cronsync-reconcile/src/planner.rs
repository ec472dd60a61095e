//! Diff between desired manifests and native scheduler truth.

use std::collections::BTreeMap;

use tracing::debug;
use uuid::Uuid;

use cronsync_protocols::{
    DriftReason, EntrySpec, JobManifest, PlanAction, ReconciliationPlan, SchedulerAdapter,
    SchedulerEntry,
};

use crate::callback::CallbackInjector;
use crate::error::ApplyError;

/// Computes and applies reconciliation plans.
///
/// Holds no native state: every plan is computed from the entries passed in.
#[derive(Debug, Clone)]
pub struct Reconciler {
    injector: CallbackInjector,
}

impl Reconciler {
    pub fn new(injector: CallbackInjector) -> Self {
        Self { injector }
    }

    pub fn injector(&self) -> &CallbackInjector {
        &self.injector
    }

    /// The native entry `manifest` should have, command already wrapped.
    pub fn desired_spec(&self, manifest: &JobManifest) -> EntrySpec {
        EntrySpec {
            marker: manifest.marker(),
            schedule: manifest.schedule.clone(),
            command: self.injector.render(manifest),
        }
    }

    /// Plan the changes that bring `actual` to `desired`.
    ///
    /// Only enabled, unpaused manifests are desired. Entries without an
    /// identity marker never appear in the plan. Actions are ordered
    /// deletes, updates, creates, then no-ops, each by namespace and name.
    pub fn plan(&self, desired: &[JobManifest], actual: &[SchedulerEntry]) -> ReconciliationPlan {
        let mut wanted: BTreeMap<Uuid, &JobManifest> = BTreeMap::new();
        for manifest in desired.iter().filter(|m| m.is_active()) {
            wanted.entry(manifest.id).or_insert(manifest);
        }

        let mut managed: BTreeMap<Uuid, Vec<&SchedulerEntry>> = BTreeMap::new();
        for entry in actual {
            if let Some(id) = entry.managed_id() {
                managed.entry(id).or_default().push(entry);
            }
        }

        let mut deletes = Vec::new();
        let mut updates = Vec::new();
        let mut creates = Vec::new();
        let mut noops = Vec::new();

        for (id, manifest) in &wanted {
            let spec = self.desired_spec(manifest);
            match managed.get(id).map(Vec::as_slice) {
                None | Some([]) => creates.push(PlanAction::Create { spec }),
                Some([entry]) => {
                    let reasons = drift(&spec, entry);
                    if reasons.is_empty() {
                        noops.push(PlanAction::NoOp { marker: spec.marker });
                    } else {
                        updates.push(PlanAction::Update { spec, reasons });
                    }
                }
                Some(entries) => {
                    let mut reasons = vec![DriftReason::Duplicate];
                    for entry in entries {
                        for reason in drift(&spec, entry) {
                            if !reasons.contains(&reason) {
                                reasons.push(reason);
                            }
                        }
                    }
                    updates.push(PlanAction::Update { spec, reasons });
                }
            }
        }

        for (id, entries) in &managed {
            if wanted.contains_key(id) {
                continue;
            }
            if let Some(marker) = entries.first().and_then(|e| e.marker.clone()) {
                deletes.push(PlanAction::Delete { marker });
            }
        }

        let mut actions = Vec::with_capacity(wanted.len() + deletes.len());
        for mut group in [deletes, updates, creates, noops] {
            group.sort_by(|a, b| {
                let (a, b) = (a.marker(), b.marker());
                (&a.namespace, &a.name, a.id).cmp(&(&b.namespace, &b.name, b.id))
            });
            actions.extend(group);
        }

        let plan = ReconciliationPlan::new(actions);
        debug!(summary = ?plan.summary(), "Computed reconciliation plan");
        plan
    }

    /// Apply every mutation in `plan`, collecting per-action failures.
    pub async fn apply(
        &self,
        adapter: &dyn SchedulerAdapter,
        plan: &ReconciliationPlan,
    ) -> Vec<ApplyError> {
        crate::apply::apply(adapter, plan).await
    }
}

fn drift(spec: &EntrySpec, entry: &SchedulerEntry) -> Vec<DriftReason> {
    let mut reasons = Vec::new();
    if entry.schedule != spec.schedule {
        reasons.push(DriftReason::Schedule);
    }
    if entry.command != spec.command {
        reasons.push(DriftReason::Command);
    }
    if entry.marker.as_ref() != Some(&spec.marker) {
        reasons.push(DriftReason::Identity);
    }
    reasons
}

#[cfg(test)]
#[path = "planner_tests.rs"]
mod tests;
