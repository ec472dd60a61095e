//! Manifests read from a plain local directory.

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use cronsync_protocols::{FetchError, ManifestSource, Revision};

/// A directory maintained by something else (config management, a mount).
///
/// The revision id is a digest of every manifest file's path and content, so
/// it changes exactly when the desired state may have changed.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn digest(&self) -> Result<String, FetchError> {
        let mut hasher = Sha256::new();
        for entry in WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.')
            })
        {
            let entry = entry.map_err(|e| FetchError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(fs::read(entry.path())?);
            hasher.update([0u8]);
        }
        let digest = hex::encode(hasher.finalize());
        Ok(format!("sha256:{}", &digest[..16]))
    }
}

#[async_trait]
impl ManifestSource for DirectorySource {
    async fn sync(&self) -> Result<Revision, FetchError> {
        if !self.root.is_dir() {
            return Err(FetchError::InvalidRevision(format!(
                "manifest directory does not exist: {}",
                self.root.display()
            )));
        }
        let source = self.clone();
        let id = tokio::task::spawn_blocking(move || source.digest())
            .await
            .map_err(|e| FetchError::Io(std::io::Error::other(e)))??;
        Ok(Revision {
            path: self.root.clone(),
            id,
        })
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_revision_tracks_content() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.yaml"), "one").unwrap();
        let source = DirectorySource::new(dir.path());

        let first = source.sync().await.unwrap();
        let again = source.sync().await.unwrap();
        assert_eq!(first.id, again.id);
        assert!(first.id.starts_with("sha256:"));
        assert_eq!(first.path, dir.path());

        fs::write(dir.path().join("a.yaml"), "two").unwrap();
        let changed = source.sync().await.unwrap();
        assert_ne!(first.id, changed.id);
    }

    #[tokio::test]
    async fn test_hidden_files_do_not_change_revision() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.yaml"), "one").unwrap();
        let source = DirectorySource::new(dir.path());
        let first = source.sync().await.unwrap();

        fs::write(dir.path().join(".swp"), "editor noise").unwrap();
        assert_eq!(source.sync().await.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let source = DirectorySource::new("/nonexistent/cronsync/dir");
        assert!(matches!(
            source.sync().await,
            Err(FetchError::InvalidRevision(_))
        ));
    }
}
