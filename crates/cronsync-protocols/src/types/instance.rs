//! The agent's knowledge of jobs on the native scheduler.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::NativeHandle;

/// Where an instance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceSource {
    /// Created and fully controlled by the agent.
    Managed,
    /// Created by something else; observed, never mutated.
    Discovered,
}

/// Observed lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Scheduled,
    Running,
    Paused,
    Removed,
}

impl fmt::Display for InstanceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceSource::Managed => write!(f, "managed"),
            InstanceSource::Discovered => write!(f, "discovered"),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Scheduled => write!(f, "scheduled"),
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Paused => write!(f, "paused"),
            InstanceStatus::Removed => write!(f, "removed"),
        }
    }
}

/// One job instance as reported upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    /// Present only for managed instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    pub namespace: String,
    pub job_name: String,
    pub source: InstanceSource,
    pub status: InstanceStatus,
    pub last_seen: DateTime<Utc>,
    /// Underlying native entry; absent for paused instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_handle: Option<NativeHandle>,
    pub schedule: String,
    /// Command without the callback wrapper.
    pub original_command: String,
}

impl JobInstance {
    /// Stable key used to track instances across cycles.
    pub fn key(&self) -> InstanceKey {
        match (self.uuid, &self.native_handle) {
            (Some(id), _) => InstanceKey::Managed(id),
            (None, Some(handle)) => InstanceKey::Discovered(handle.clone()),
            (None, None) => InstanceKey::Discovered(NativeHandle::new(format!(
                "{}/{}",
                self.namespace, self.job_name
            ))),
        }
    }
}

/// Identity of an instance across cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceKey {
    Managed(Uuid),
    Discovered(NativeHandle),
}
