//! Native scheduler entries.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of one native scheduler entry.
///
/// Crontab entries use `crontab:<uuid>` for managed lines and a content hash
/// for foreign lines; task scheduler entries use the full task path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NativeHandle(pub String);

impl NativeHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity recovered from (or written into) a native entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryMarker {
    pub id: Uuid,
    pub namespace: String,
    pub name: String,
}

/// One unit of native scheduler truth: a crontab line or a task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerEntry {
    pub handle: NativeHandle,
    /// Present only on entries the agent wrote.
    pub marker: Option<EntryMarker>,
    /// 5-field expression, or the raw timing text for foreign entries the
    /// adapter cannot express as one (`@reboot`, native triggers).
    pub schedule: String,
    /// Command exactly as the native scheduler will run it.
    pub command: String,
}

impl SchedulerEntry {
    pub fn is_managed(&self) -> bool {
        self.marker.is_some()
    }

    pub fn managed_id(&self) -> Option<Uuid> {
        self.marker.as_ref().map(|m| m.id)
    }
}

/// What the agent asks an adapter to install for one managed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySpec {
    pub marker: EntryMarker,
    pub schedule: String,
    /// Rendered command (already wrapped by the callback injector).
    pub command: String,
}

impl EntrySpec {
    pub fn id(&self) -> Uuid {
        self.marker.id
    }

    /// Whether an installed entry already matches this spec.
    pub fn matches(&self, entry: &SchedulerEntry) -> bool {
        entry.marker.as_ref() == Some(&self.marker)
            && entry.schedule == self.schedule
            && entry.command == self.command
    }
}
