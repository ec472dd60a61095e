//! Configuration schema definitions.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default location of the agent configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cronsync/agent.toml";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub manifests: ManifestsConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default, rename = "loop")]
    pub cycle: LoopConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Expand `~` in every path-valued field.
    pub fn expand_paths(&mut self) {
        let expand = |p: &mut String| *p = shellexpand::tilde(p.as_str()).into_owned();
        expand(&mut self.agent.token_path);
        expand(&mut self.agent.state_dir);
        if let Some(pid) = self.agent.pid_file.as_mut() {
            expand(pid);
        }
        expand(&mut self.manifests.local_path);
        if let GitAuth::Key { key_path, .. } = &mut self.manifests.auth {
            expand(key_path);
        }
        if let Some(helper) = self.scheduler.helper_path.as_mut() {
            expand(helper);
        }
        if let Some(dir) = self.logging.directory.as_mut() {
            expand(dir);
        }
    }
}

/// Endpoint identity and local state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name; defaults to the hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Overrides the probed hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Overrides the probed platform (`linux`, `macos`, `windows`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default = "default_token_path")]
    pub token_path: String,

    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: None,
            hostname: None,
            platform: None,
            token_path: default_token_path(),
            state_dir: default_state_dir(),
            pid_file: None,
        }
    }
}

fn default_token_path() -> String {
    "~/.cronsync/endpoint-token.json".to_string()
}

fn default_state_dir() -> String {
    "~/.cronsync".to_string()
}

/// Control plane connection. An unset `api_url` disables all reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// One-time token used to enroll when no endpoint token is stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment_token: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            enrollment_token: None,
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl BackendConfig {
    pub fn is_enabled(&self) -> bool {
        self.api_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

/// Where manifests come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Git,
    /// A plain local directory, revisioned by content digest.
    Directory,
}

/// What a cycle does when the previous sync is still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    #[default]
    Skip,
    Await,
}

/// Credentials for the manifest repository.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GitAuth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    /// Bearer token sent as an HTTP header.
    Token { token: String },
    /// SSH private key.
    Key {
        key_path: String,
        #[serde(default)]
        strict_host_key_checking: bool,
    },
}

impl fmt::Debug for GitAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitAuth::None => write!(f, "None"),
            GitAuth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            GitAuth::Token { .. } => f
                .debug_struct("Token")
                .field("token", &"<redacted>")
                .finish(),
            GitAuth::Key {
                key_path,
                strict_host_key_checking,
            } => f
                .debug_struct("Key")
                .field("key_path", key_path)
                .field("strict_host_key_checking", strict_host_key_checking)
                .finish(),
        }
    }
}

/// Manifest store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestsConfig {
    #[serde(default)]
    pub source: SourceKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Clone target for `git`, manifest root for `directory`.
    #[serde(default = "default_local_path")]
    pub local_path: String,

    /// Manifest root inside the checked-out tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdirectory: Option<String>,

    #[serde(default)]
    pub auth: GitAuth,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,

    #[serde(default)]
    pub overlap: OverlapPolicy,
}

impl Default for ManifestsConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            repo_url: None,
            branch: default_branch(),
            local_path: default_local_path(),
            subdirectory: None,
            auth: GitAuth::default(),
            fetch_timeout_secs: default_fetch_timeout(),
            fetch_retries: default_fetch_retries(),
            overlap: OverlapPolicy::default(),
        }
    }
}

impl ManifestsConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(&self.local_path)
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_local_path() -> String {
    "~/.cronsync/job-manifests".to_string()
}

fn default_fetch_timeout() -> u64 {
    60
}

fn default_fetch_retries() -> u32 {
    2
}

/// Which native scheduler variant to drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerBackend {
    /// Probe the platform at startup.
    #[default]
    Auto,
    Crontab,
    TaskScheduler,
}

/// Native scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub backend: SchedulerBackend,

    /// Check-in helper invoked by wrapped commands; defaults to this executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helper_path: Option<String>,

    /// Wrap managed commands so they report completion upstream.
    #[serde(default = "default_true")]
    pub callbacks: bool,

    #[serde(default = "default_task_folder")]
    pub task_folder: String,

    /// Operate on another user's crontab (`crontab -u`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crontab_user: Option<String>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backend: SchedulerBackend::default(),
            helper_path: None,
            callbacks: true,
            task_folder: default_task_folder(),
            crontab_user: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl SchedulerConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_task_folder() -> String {
    "\\CronSync".to_string()
}

fn default_command_timeout() -> u64 {
    30
}

/// Scheduler loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_secs: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            backoff_initial_secs: default_backoff_initial(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

impl LoopConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_secs(self.backoff_initial_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

fn default_sync_interval() -> u64 {
    30
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_backoff_initial() -> u64 {
    5
}

fn default_backoff_max() -> u64 {
    300
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enables daily-rotated log files in this directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    #[serde(default)]
    pub json: bool,

    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            json: false,
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    14
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
