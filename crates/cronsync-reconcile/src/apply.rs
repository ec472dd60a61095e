//! Plan application.

use tracing::{info, warn};

use cronsync_protocols::{PlanAction, ReconciliationPlan, SchedulerAdapter};

use crate::error::ApplyError;

/// Apply the mutations of `plan` in order.
///
/// Each action succeeds or fails on its own; a failure is recorded and the
/// rest of the plan still runs. No-ops never reach the adapter.
pub async fn apply(adapter: &dyn SchedulerAdapter, plan: &ReconciliationPlan) -> Vec<ApplyError> {
    let actions: Vec<PlanAction> = plan.mutations().cloned().collect();
    if actions.is_empty() {
        return Vec::new();
    }

    let results = adapter.apply_batch(&actions).await;
    let mut errors = Vec::new();
    for (action, result) in actions.into_iter().zip(results) {
        match result {
            Ok(()) => info!(
                action = action.kind(),
                job_id = %action.id(),
                job = %format!("{}/{}", action.marker().namespace, action.marker().name),
                "Applied"
            ),
            Err(source) => {
                warn!(action = action.kind(), job_id = %action.id(), error = %source, "Apply failed");
                errors.push(ApplyError::new(action, source));
            }
        }
    }
    errors
}

#[cfg(test)]
#[path = "apply_tests.rs"]
mod tests;
