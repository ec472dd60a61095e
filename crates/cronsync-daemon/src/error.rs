//! Agent process errors.

use std::path::PathBuf;

use thiserror::Error;

use cronsync_manifest::RevisionError;
use cronsync_protocols::{FetchError, SchedulerError};

/// Process-level failures: PID file, signals, startup.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Another agent holds the PID file.
    #[error("Agent already running (PID file: {path}, PID: {pid})")]
    AlreadyRunning { path: PathBuf, pid: u32 },

    #[error("Failed to create PID file at {path}: {reason}")]
    PidFileCreation { path: PathBuf, reason: String },

    #[error("Failed to read PID file at {path}: {reason}")]
    PidFileRead { path: PathBuf, reason: String },

    #[error("Failed to remove PID file at {path}: {reason}")]
    PidFileRemoval { path: PathBuf, reason: String },

    #[error("Failed to set up signal handlers: {0}")]
    SignalSetup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Enrollment failed: {0}")]
    Enrollment(#[from] ControlPlaneError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a reconciliation cycle ended early.
///
/// None of these stop the agent; the loop backs off and tries again.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Fetch failed and no revision has ever been accepted.
    #[error("No manifest revision available: {0}")]
    NoRevision(#[source] FetchError),

    /// Revision rejected and no earlier revision to fall back on.
    #[error("No accepted manifest revision: {0}")]
    NoAcceptedRevision(#[source] RevisionError),

    #[error("Manifest parsing task failed: {0}")]
    ParseTask(String),

    /// The native scheduler could not be read at all.
    #[error("Native scheduler unavailable: {0}")]
    SchedulerUnavailable(#[source] SchedulerError),

    /// Every mutation in the plan failed because the scheduler is unreachable.
    #[error("Native scheduler became unavailable during apply ({0} action(s) failed)")]
    ApplyUnavailable(usize),

    #[error("Cycle skipped: another cycle is still running")]
    Busy,

    #[error("Shutdown requested")]
    ShuttingDown,
}

impl AgentError {
    /// Whether the loop should back off before the next attempt.
    pub fn needs_backoff(&self) -> bool {
        !matches!(self, AgentError::Busy | AgentError::ShuttingDown)
    }
}

/// Failures talking to the control plane.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Control plane returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Endpoint is not enrolled")]
    NotEnrolled,

    #[error("Upstream reporting is disabled")]
    Disabled,

    #[error("Token store error at {path}: {reason}")]
    TokenStore { path: PathBuf, reason: String },
}

impl ControlPlaneError {
    /// Server errors and transport failures may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ControlPlaneError::Network(_) => true,
            ControlPlaneError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
