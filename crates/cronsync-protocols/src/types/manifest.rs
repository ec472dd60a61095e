//! Desired-state job definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::EntryMarker;

/// Default namespace for manifests that sit directly under the manifest root.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A validated job definition read from one revision of the manifest store.
///
/// Immutable once parsed; every new revision supersedes the whole set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManifest {
    /// Stable identity carried into the native scheduler marker.
    pub id: Uuid,
    pub name: String,
    pub namespace: String,
    /// Normalized 5-field expression (single spaces between fields).
    pub schedule: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub enabled: bool,
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Revision id the manifest was read from.
    pub revision: String,
    /// File the manifest came from, relative to the revision root.
    #[serde(default)]
    pub source_file: PathBuf,
}

impl JobManifest {
    /// Whether the manifest should have a native scheduler entry.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.paused
    }

    /// Identity marker for entries rendered from this manifest.
    pub fn marker(&self) -> EntryMarker {
        EntryMarker {
            id: self.id,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// `namespace/name`, used in logs and reports.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
