//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, GitAuth, SchedulerBackend, SourceKind};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the errors into a single [`ConfigError::Invalid`].
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        if self.errors.is_empty() {
            return Ok(self.warnings);
        }
        let joined = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(ConfigError::Invalid(joined))
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_backend(config, &mut result);
        Self::validate_manifests(config, &mut result);
        Self::validate_scheduler(config, &mut result);
        Self::validate_loop(config, &mut result);
        Self::validate_logging(config, &mut result);

        result
    }

    fn validate_backend(config: &Config, result: &mut ValidationResult) {
        let backend = &config.backend;
        if let Some(url) = backend.api_url.as_deref().filter(|u| !u.trim().is_empty()) {
            match url::Url::parse(url) {
                Ok(parsed) if parsed.scheme() == "https" && parsed.has_host() => {}
                Ok(parsed) if parsed.scheme() == "http" && parsed.has_host() => {
                    result.add_warning(ValidationWarning::new(
                        "backend.api_url",
                        "api_url uses plain http; endpoint tokens will be sent unencrypted",
                    ));
                }
                Ok(_) => result.add_error(ValidationError::new(
                    "backend.api_url",
                    "api_url must be an http:// or https:// URL with a host",
                )),
                Err(e) => result.add_error(ValidationError::new(
                    "backend.api_url",
                    format!("api_url is not a valid URL: {}", e),
                )),
            }
        } else {
            result.add_warning(ValidationWarning::new(
                "backend.api_url",
                "api_url is not set, heartbeats and check-ins are disabled",
            ));
        }

        if backend.request_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "backend.request_timeout_secs",
                "request_timeout_secs must be greater than 0",
            ));
        }
    }

    fn validate_manifests(config: &Config, result: &mut ValidationResult) {
        let manifests = &config.manifests;

        if manifests.local_path.trim().is_empty() {
            result.add_error(ValidationError::new(
                "manifests.local_path",
                "local_path cannot be empty",
            ));
        }

        if manifests.source == SourceKind::Directory {
            return;
        }

        let Some(url) = manifests.repo_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            result.add_error(ValidationError::new(
                "manifests.repo_url",
                "repo_url is required when source = \"git\"",
            ));
            return;
        };

        if manifests.branch.trim().is_empty() {
            result.add_error(ValidationError::new(
                "manifests.branch",
                "branch cannot be empty",
            ));
        }

        if manifests.fetch_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "manifests.fetch_timeout_secs",
                "fetch_timeout_secs must be greater than 0",
            ));
        }

        let is_http = url.starts_with("https://") || url.starts_with("http://");
        let is_ssh = url.starts_with("ssh://") || (url.contains('@') && !is_http);
        match &manifests.auth {
            GitAuth::Basic { .. } | GitAuth::Token { .. } if !is_http => {
                result.add_error(ValidationError::new(
                    "manifests.auth",
                    "basic and token credentials require an http(s) repo_url",
                ));
            }
            GitAuth::Basic { .. } | GitAuth::Token { .. } if url.starts_with("http://") => {
                result.add_warning(ValidationWarning::new(
                    "manifests.auth",
                    "credentials are sent over plain http",
                ));
            }
            GitAuth::Key { key_path, .. } => {
                if !is_ssh {
                    result.add_error(ValidationError::new(
                        "manifests.auth",
                        "key credentials require an ssh repo_url",
                    ));
                }
                if !std::path::Path::new(key_path).exists() {
                    result.add_warning(ValidationWarning::new(
                        "manifests.auth.key_path",
                        format!("SSH key does not exist: {}", key_path),
                    ));
                }
            }
            _ => {}
        }
    }

    fn validate_scheduler(config: &Config, result: &mut ValidationResult) {
        let scheduler = &config.scheduler;

        if !scheduler.task_folder.starts_with('\\') {
            result.add_error(ValidationError::new(
                "scheduler.task_folder",
                "task_folder must start with a backslash",
            ));
        }

        if scheduler.command_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "scheduler.command_timeout_secs",
                "command_timeout_secs must be greater than 0",
            ));
        }

        let native = if cfg!(windows) {
            SchedulerBackend::TaskScheduler
        } else {
            SchedulerBackend::Crontab
        };
        if scheduler.backend != SchedulerBackend::Auto && scheduler.backend != native {
            result.add_warning(ValidationWarning::new(
                "scheduler.backend",
                format!(
                    "backend {:?} is not native to this platform and will likely be unavailable",
                    scheduler.backend
                ),
            ));
        }

        if scheduler.callbacks && !config.backend.is_enabled() {
            result.add_warning(ValidationWarning::new(
                "scheduler.callbacks",
                "callbacks are enabled but backend.api_url is not set; check-ins will be dropped",
            ));
        }
    }

    fn validate_loop(config: &Config, result: &mut ValidationResult) {
        let cycle = &config.cycle;

        for (path, value) in [
            ("loop.sync_interval_secs", cycle.sync_interval_secs),
            ("loop.heartbeat_interval_secs", cycle.heartbeat_interval_secs),
            ("loop.backoff_initial_secs", cycle.backoff_initial_secs),
        ] {
            if value == 0 {
                result.add_error(ValidationError::new(path, "must be greater than 0"));
            }
        }

        if cycle.backoff_max_secs < cycle.backoff_initial_secs {
            result.add_error(ValidationError::new(
                "loop.backoff_max_secs",
                "backoff_max_secs must be at least backoff_initial_secs",
            ));
        }

        if cycle.sync_interval_secs > 0 && cycle.sync_interval_secs < 10 {
            result.add_warning(ValidationWarning::new(
                "loop.sync_interval_secs",
                "sync interval below 10s rewrites native state very frequently",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            result.add_warning(ValidationWarning::new(
                "logging.level",
                format!(
                    "Unknown log level '{}', valid values: {:?}",
                    config.logging.level, LOG_LEVELS
                ),
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
