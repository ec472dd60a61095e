//! Manifests fetched from a remote git repository.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use cronsync_config::{GitAuth, ManifestsConfig, OverlapPolicy};
use cronsync_protocols::{
    CommandOutput, CommandRunner, CommandSpec, FetchError, ManifestSource, Revision,
};

/// Shallow clone of one branch, refreshed with fetch + hard reset.
///
/// Credentials never reach the checkout's `.git/config` or git's argv: basic
/// credentials and tokens travel as an environment-injected
/// `http.extraHeader`, keys via `GIT_SSH_COMMAND`.
pub struct GitSource {
    runner: Arc<dyn CommandRunner>,
    repo_url: String,
    branch: String,
    checkout: PathBuf,
    subdirectory: Option<String>,
    auth: GitAuth,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    overlap: OverlapPolicy,
    in_flight: Mutex<()>,
}

impl GitSource {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        repo_url: impl Into<String>,
        branch: impl Into<String>,
        checkout: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            repo_url: repo_url.into(),
            branch: branch.into(),
            checkout: checkout.into(),
            subdirectory: None,
            auth: GitAuth::None,
            timeout: Duration::from_secs(60),
            retries: 2,
            retry_delay: Duration::from_secs(2),
            overlap: OverlapPolicy::Skip,
            in_flight: Mutex::new(()),
        }
    }

    /// Build from the `[manifests]` section. `None` when no repository is configured.
    pub fn from_config(config: &ManifestsConfig, runner: Arc<dyn CommandRunner>) -> Option<Self> {
        let url = config.repo_url.as_deref().filter(|u| !u.trim().is_empty())?;
        Some(
            Self::new(runner, url, &config.branch, config.local_path())
                .with_auth(config.auth.clone())
                .with_subdirectory(config.subdirectory.clone())
                .with_timeout(config.fetch_timeout())
                .with_retries(config.fetch_retries, Duration::from_secs(2))
                .with_overlap(config.overlap),
        )
    }

    pub fn with_auth(mut self, auth: GitAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_subdirectory(mut self, subdirectory: Option<String>) -> Self {
        self.subdirectory = subdirectory.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    fn manifest_root(&self) -> PathBuf {
        match &self.subdirectory {
            Some(sub) => self.checkout.join(sub),
            None => self.checkout.clone(),
        }
    }

    /// `Authorization` header value for HTTP remotes.
    fn authorization(&self) -> Option<String> {
        match &self.auth {
            GitAuth::Token { token } => Some(format!("Bearer {}", token)),
            GitAuth::Basic { username, password } => Some(format!(
                "Basic {}",
                STANDARD.encode(format!("{}:{}", username, password))
            )),
            GitAuth::None | GitAuth::Key { .. } => None,
        }
    }

    fn git<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = CommandSpec::new("git")
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(self.timeout);

        if let Some(authorization) = self.authorization() {
            spec = spec
                .env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", "http.extraHeader")
                .env("GIT_CONFIG_VALUE_0", format!("Authorization: {}", authorization));
        }
        if let GitAuth::Key {
            key_path,
            strict_host_key_checking,
        } = &self.auth
        {
            let checking = if *strict_host_key_checking {
                "yes"
            } else {
                "accept-new"
            };
            spec = spec.env(
                "GIT_SSH_COMMAND",
                format!(
                    "ssh -i '{}' -o IdentitiesOnly=yes -o BatchMode=yes -o StrictHostKeyChecking={}",
                    key_path.replace('\'', "'\\''"),
                    checking
                ),
            );
        }
        spec
    }

    async fn run_git(&self, spec: CommandSpec) -> Result<CommandOutput, FetchError> {
        debug!("Running git {}", self.redact(&spec.args.join(" ")));
        let output = self.runner.run(&spec).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut => FetchError::Timeout(self.timeout.as_secs()),
            _ => FetchError::Io(e),
        })?;

        if output.success() {
            Ok(output)
        } else {
            Err(self.classify_failure(&output.stderr))
        }
    }

    fn classify_failure(&self, stderr: &str) -> FetchError {
        let message = self.redact(stderr.trim());
        let lower = message.to_ascii_lowercase();
        let auth_markers = [
            "authentication failed",
            "could not read username",
            "permission denied",
            "access denied",
            "returned error: 401",
            "returned error: 403",
            "invalid credentials",
        ];
        if auth_markers.iter().any(|m| lower.contains(m)) {
            FetchError::Auth(message)
        } else {
            FetchError::Network(message)
        }
    }

    /// Strip secrets from text that may be logged.
    fn redact(&self, text: &str) -> String {
        let mut secrets: Vec<String> = match &self.auth {
            GitAuth::Basic { password, .. } => vec![password.clone()],
            GitAuth::Token { token } => vec![token.clone()],
            GitAuth::None | GitAuth::Key { .. } => Vec::new(),
        };
        if let Some(authorization) = self.authorization() {
            secrets.extend(authorization.split_once(' ').map(|(_, value)| value.to_string()));
        }
        secrets
            .iter()
            .filter(|secret| !secret.is_empty())
            .fold(text.to_string(), |text, secret| text.replace(secret.as_str(), "***"))
    }

    async fn sync_once(&self) -> Result<Revision, FetchError> {
        let checkout = self.checkout.to_string_lossy().into_owned();
        let url = self.repo_url.as_str();

        if self.checkout.join(".git").is_dir() {
            debug!("Fetching {} ({})", self.repo_url, self.branch);
            self.run_git(self.git([
                "-C", checkout.as_str(), "fetch", "--depth", "1", url, self.branch.as_str(),
            ]))
            .await?;
            self.run_git(self.git(["-C", checkout.as_str(), "reset", "--hard", "FETCH_HEAD"]))
                .await?;
            self.run_git(self.git(["-C", checkout.as_str(), "clean", "-fdx"]))
                .await?;
        } else {
            prepare_clone_target(&self.checkout)?;
            info!(
                "Cloning manifests from {} (branch {}) into {}",
                self.repo_url,
                self.branch,
                self.checkout.display()
            );
            self.run_git(self.git([
                "clone",
                "--branch",
                self.branch.as_str(),
                "--single-branch",
                "--depth",
                "1",
                url,
                checkout.as_str(),
            ]))
            .await?;
        }

        let head = self
            .run_git(self.git(["-C", checkout.as_str(), "rev-parse", "HEAD"]))
            .await?;
        let id = head.stdout.trim().to_string();
        if id.is_empty() {
            return Err(FetchError::InvalidRevision(
                "git rev-parse returned no commit".to_string(),
            ));
        }

        Ok(Revision {
            path: self.manifest_root(),
            id,
        })
    }
}

fn prepare_clone_target(checkout: &Path) -> Result<(), FetchError> {
    if checkout.exists() {
        let occupied = std::fs::read_dir(checkout)?.next().is_some();
        if occupied {
            return Err(FetchError::InvalidRevision(format!(
                "{} exists and is not a git checkout",
                checkout.display()
            )));
        }
    } else if let Some(parent) = checkout.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[async_trait]
impl ManifestSource for GitSource {
    async fn sync(&self) -> Result<Revision, FetchError> {
        let _guard = match self.overlap {
            OverlapPolicy::Skip => self
                .in_flight
                .try_lock()
                .map_err(|_| FetchError::InProgress)?,
            OverlapPolicy::Await => self.in_flight.lock().await,
        };

        let mut attempt = 0;
        loop {
            match self.sync_once().await {
                Ok(revision) => return Ok(revision),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    let delay = self.retry_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "Manifest fetch failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        self.retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn describe(&self) -> String {
        format!("git {} ({})", self.repo_url, self.branch)
    }
}

#[cfg(test)]
#[path = "git_tests.rs"]
mod tests;
