//! Desired-state source contract.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::FetchError;

/// A materialized revision of the manifest tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// Root directory of the manifests in this revision.
    pub path: PathBuf,
    /// Store-defined identifier (commit hash, content digest).
    pub id: String,
}

/// Fetches the latest revision of the manifest tree.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Full fetch on first call, incremental afterwards.
    ///
    /// Never runs concurrently with itself.
    async fn sync(&self) -> Result<Revision, FetchError>;

    /// Human-readable description of the store, for logs.
    fn describe(&self) -> String;
}
