//! Native scheduler errors.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The native scheduler cannot be reached at all (missing binary, locked table).
    #[error("Native scheduler unavailable: {0}")]
    Unavailable(String),

    /// A native CLI invocation exited unsuccessfully.
    #[error("{command} failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("No managed entry with id {0}")]
    NotFound(Uuid),

    #[error("Managed entry with id {0} already exists")]
    AlreadyExists(Uuid),

    /// The expression has no exact native equivalent.
    #[error("Unsupported schedule '{schedule}': {reason}")]
    UnsupportedSchedule { schedule: String, reason: String },

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Failed to parse native scheduler output: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// Whether the whole scheduler is out of reach, as opposed to one entry failing.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SchedulerError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_schedule_display() {
        let err = SchedulerError::UnsupportedSchedule {
            schedule: "*/7 * * * *".to_string(),
            reason: "step does not divide the hour".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("*/7 * * * *"));
        assert!(msg.contains("step does not divide"));
    }

    #[test]
    fn test_command_failed_display() {
        let err = SchedulerError::CommandFailed {
            command: "crontab".to_string(),
            code: Some(1),
            stderr: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("crontab failed"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_is_unavailable() {
        assert!(SchedulerError::Unavailable("locked".to_string()).is_unavailable());
        assert!(!SchedulerError::NotFound(Uuid::nil()).is_unavailable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SchedulerError = io_err.into();
        assert!(err.to_string().contains("denied"));
    }
}
