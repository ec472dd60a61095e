//! On-disk manifest document format.
//!
//! ```yaml
//! apiVersion: v1
//! kind: Job
//! metadata:
//!   id: 6f1c2e0a-3b9d-4c55-9a51-6a2b0c1d2e3f
//!   name: backup-db
//!   namespace: production
//! spec:
//!   schedule: "0 2 * * *"
//!   command: /usr/local/bin/backup.sh
//!   args: ["--full"]
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

pub const API_VERSION: &str = "v1";
pub const KIND: &str = "Job";

/// Raw document as deserialized; fields are validated by the parser.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub spec: DocumentSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentSpec {
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub paused: bool,
}

impl Default for DocumentSpec {
    fn default() -> Self {
        Self {
            schedule: None,
            timezone: None,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            enabled: default_enabled(),
            paused: false,
        }
    }
}

fn default_enabled() -> bool {
    true
}
