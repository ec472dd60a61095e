//! Persisted endpoint credentials.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ControlPlaneError;

/// What enrollment hands back; readable only by the agent's user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointToken {
    pub endpoint_id: u64,
    pub token: String,
}

impl std::fmt::Debug for EndpointToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointToken")
            .field("endpoint_id", &self.endpoint_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// JSON token file at a fixed path.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` until the endpoint has enrolled.
    pub fn load(&self) -> Result<Option<EndpointToken>, ControlPlaneError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error(e)),
        };
        serde_json::from_str(&data).map(Some).map_err(|e| self.error(e))
    }

    /// Write the token with owner-only permissions.
    pub fn save(&self, token: &EndpointToken) -> Result<(), ControlPlaneError> {
        if let Some(parent) = self.path.parent() {
            create_private_dir(parent).map_err(|e| self.error(e))?;
        }
        let data = serde_json::to_vec(token).map_err(|e| self.error(e))?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path).map_err(|e| self.error(e))?;
        file.write_all(&data).map_err(|e| self.error(e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .map_err(|e| self.error(e))?;
        }
        info!(
            "Saved endpoint token for endpoint {} to {}",
            token.endpoint_id,
            self.path.display()
        );
        Ok(())
    }

    fn error(&self, e: impl std::fmt::Display) -> ControlPlaneError {
        ControlPlaneError::TokenStore {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir)
    }
}
