//! One reconciliation cycle: sync, parse, discover, plan, apply, report.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use cronsync_manifest::ManifestParser;
use cronsync_protocols::plan::PlanSummary;
use cronsync_protocols::{FetchError, ManifestSource, Revision, SchedulerAdapter};
use cronsync_reconcile::{ApplyError, Reconciler, discover, inventory};

use crate::control::{DiscoveredJob, InstanceReporter};
use crate::error::AgentError;
use crate::signal::SignalHandler;
use crate::state::{AgentState, Phase};

/// What a completed cycle did.
#[derive(Debug)]
pub struct CycleReport {
    /// Revision the plan was computed from.
    pub revision: Option<String>,
    pub plan: PlanSummary,
    pub apply_errors: Vec<ApplyError>,
    /// Files skipped when the revision was parsed this cycle.
    pub parse_errors: usize,
    pub instances_reported: usize,
}

/// Runs cycles against one source, one native scheduler and one state.
///
/// At most one cycle runs at a time; a second caller gets
/// [`AgentError::Busy`] instead of waiting.
pub struct CycleRunner {
    source: Arc<dyn ManifestSource>,
    adapter: Arc<dyn SchedulerAdapter>,
    reconciler: Reconciler,
    reporter: Option<Arc<dyn InstanceReporter>>,
    state: Arc<RwLock<AgentState>>,
    signals: SignalHandler,
    in_flight: Mutex<()>,
}

impl CycleRunner {
    pub fn new(
        source: Arc<dyn ManifestSource>,
        adapter: Arc<dyn SchedulerAdapter>,
        reconciler: Reconciler,
        state: Arc<RwLock<AgentState>>,
        signals: SignalHandler,
    ) -> Self {
        Self {
            source,
            adapter,
            reconciler,
            reporter: None,
            state,
            signals,
            in_flight: Mutex::new(()),
        }
    }

    pub fn with_reporter(mut self, reporter: Option<Arc<dyn InstanceReporter>>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn state(&self) -> &Arc<RwLock<AgentState>> {
        &self.state
    }

    /// Run one full cycle unless another is still in flight.
    pub async fn run_once(&self) -> Result<CycleReport, AgentError> {
        let _guard = self.in_flight.try_lock().map_err(|_| AgentError::Busy)?;
        let result = self.run_phases().await;
        self.enter(Phase::Idle).await;
        result
    }

    async fn enter(&self, phase: Phase) {
        self.state.write().await.set_phase(phase);
        debug!(phase = %phase, "Entering phase");
    }

    async fn run_phases(&self) -> Result<CycleReport, AgentError> {
        self.enter(Phase::Syncing).await;
        let fetched = self.sync().await?;

        let mut parse_errors = 0;
        if let Some(revision) = fetched {
            self.enter(Phase::Parsing).await;
            parse_errors = self.parse(revision).await?;
        }

        self.enter(Phase::Discovering).await;
        let actual = self
            .adapter
            .list()
            .await
            .map_err(AgentError::SchedulerUnavailable)?;

        self.enter(Phase::Reconciling).await;
        let (revision, manifests) = {
            let state = self.state.read().await;
            (state.revision().map(str::to_string), state.manifests().to_vec())
        };
        let plan = self.reconciler.plan(&manifests, &actual);

        if self.signals.is_shutdown_requested() {
            info!("Shutdown requested, skipping apply");
            return Err(AgentError::ShuttingDown);
        }

        self.enter(Phase::Applying).await;
        let mutations = plan.mutations().count();
        let apply_errors = self.reconciler.apply(self.adapter.as_ref(), &plan).await;
        if mutations > 0
            && apply_errors.len() == mutations
            && apply_errors.iter().all(ApplyError::is_unavailable)
        {
            return Err(AgentError::ApplyUnavailable(mutations));
        }

        self.enter(Phase::Reporting).await;
        let entries = if mutations > 0 {
            match self.adapter.list().await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "Could not re-read native scheduler after apply");
                    actual
                }
            }
        } else {
            actual
        };
        let now = Utc::now();
        let observed = inventory(&manifests, &entries, self.reconciler.injector(), now);
        let report = self.state.write().await.record_instances(observed, now);
        if let Some(reporter) = &self.reporter {
            if let Err(e) = reporter.report_instances(&report).await {
                warn!(error = %e, "Failed to report job instances");
            }
        }

        let summary = plan.summary();
        info!(
            revision = revision.as_deref().unwrap_or("-"),
            create = summary.create,
            update = summary.update,
            delete = summary.delete,
            unchanged = summary.noop,
            failed = apply_errors.len(),
            "Reconciliation cycle complete"
        );
        Ok(CycleReport {
            revision,
            plan: summary,
            apply_errors,
            parse_errors,
            instances_reported: report.len(),
        })
    }

    /// Latest revision, or `None` to keep planning from the last accepted one.
    async fn sync(&self) -> Result<Option<Revision>, AgentError> {
        let has_previous = self.state.read().await.revision().is_some();
        match self.source.sync().await {
            Ok(revision) => Ok(Some(revision)),
            Err(FetchError::InProgress) if has_previous => {
                debug!("Manifest sync already in progress, using last revision");
                Ok(None)
            }
            Err(e) if has_previous => {
                warn!(
                    source = %self.source.describe(),
                    error = %e,
                    "Manifest sync failed, keeping last good revision"
                );
                Ok(None)
            }
            Err(e) => Err(AgentError::NoRevision(e)),
        }
    }

    /// Parse and accept `revision`, returning how many files were skipped.
    async fn parse(&self, revision: Revision) -> Result<usize, AgentError> {
        let previous = self.state.read().await.revision().map(str::to_string);
        if previous.as_deref() == Some(revision.id.as_str()) {
            debug!(revision = %revision.id, "Revision unchanged");
            return Ok(0);
        }

        let parsed = tokio::task::spawn_blocking(move || ManifestParser::parse(&revision))
            .await
            .map_err(|e| AgentError::ParseTask(e.to_string()))?;

        match parsed {
            Ok(parsed) => {
                let skipped = parsed.errors.len();
                info!(
                    revision = %parsed.revision,
                    manifests = parsed.manifests.len(),
                    skipped,
                    "Accepted manifest revision"
                );
                self.state
                    .write()
                    .await
                    .accept_revision(parsed.revision, parsed.manifests);
                Ok(skipped)
            }
            Err(e) => match previous {
                Some(previous) => {
                    warn!(error = %e, keeping = %previous, "Revision rejected, keeping previous");
                    Ok(0)
                }
                None => Err(AgentError::NoAcceptedRevision(e)),
            },
        }
    }

    /// Send every foreign entry upstream as a discovered job.
    pub async fn report_discovery(&self) -> Result<usize, AgentError> {
        let entries = self
            .adapter
            .list()
            .await
            .map_err(AgentError::SchedulerUnavailable)?;
        let jobs: Vec<DiscoveredJob> = discover(&entries, Utc::now())
            .iter()
            .map(DiscoveredJob::from)
            .collect();
        info!(count = jobs.len(), "Discovered foreign scheduler entries");

        if let Some(reporter) = &self.reporter {
            if let Err(e) = reporter.report_discovered(&jobs).await {
                warn!(error = %e, "Failed to report discovered jobs");
            }
        }
        Ok(jobs.len())
    }
}

#[cfg(test)]
#[path = "cycle_tests.rs"]
mod tests;
