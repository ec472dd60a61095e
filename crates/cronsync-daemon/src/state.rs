//! The agent's explicit state, shared by the loops.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use cronsync_protocols::{InstanceKey, InstanceSource, InstanceStatus, JobInstance, JobManifest};

/// Where the scheduler loop currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Syncing,
    Parsing,
    Discovering,
    Reconciling,
    Applying,
    Reporting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Syncing => "syncing",
            Phase::Parsing => "parsing",
            Phase::Discovering => "discovering",
            Phase::Reconciling => "reconciling",
            Phase::Applying => "applying",
            Phase::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub struct AgentState {
    phase: Phase,
    /// Last revision whose manifests were accepted.
    revision: Option<String>,
    manifests: Vec<JobManifest>,
    instances: BTreeMap<InstanceKey, JobInstance>,
    last_success: Option<DateTime<Utc>>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Desired state of the last accepted revision.
    pub fn manifests(&self) -> &[JobManifest] {
        &self.manifests
    }

    /// Make `manifests` the desired state, replacing the previous revision wholesale.
    pub fn accept_revision(&mut self, revision: impl Into<String>, manifests: Vec<JobManifest>) {
        self.revision = Some(revision.into());
        self.manifests = manifests;
    }

    /// Replace the instance inventory with what a cycle just observed.
    ///
    /// Returns the observed instances followed by one `removed` record for
    /// each instance that has disappeared since the previous call. Removed
    /// instances are forgotten afterwards, so each is reported once.
    pub fn record_instances(
        &mut self,
        observed: Vec<JobInstance>,
        now: DateTime<Utc>,
    ) -> Vec<JobInstance> {
        let mut next = BTreeMap::new();
        for instance in observed {
            next.insert(instance.key(), instance);
        }

        let mut report: Vec<JobInstance> = next.values().cloned().collect();
        for (key, previous) in &self.instances {
            if !next.contains_key(key) {
                let mut removed = previous.clone();
                removed.status = InstanceStatus::Removed;
                removed.native_handle = None;
                removed.last_seen = now;
                report.push(removed);
            }
        }

        self.instances = next;
        self.last_success = Some(now);
        report
    }

    pub fn instances(&self) -> impl Iterator<Item = &JobInstance> {
        self.instances.values()
    }

    pub fn managed_count(&self) -> usize {
        self.count(InstanceSource::Managed)
    }

    pub fn discovered_count(&self) -> usize {
        self.count(InstanceSource::Discovered)
    }

    fn count(&self, source: InstanceSource) -> usize {
        self.instances.values().filter(|i| i.source == source).count()
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }
}
