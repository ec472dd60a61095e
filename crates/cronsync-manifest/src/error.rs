//! Manifest errors.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::cron_expr::CronField;

/// Schedule grammar violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("{field}: invalid value '{value}'")]
    InvalidValue { field: CronField, value: String },

    #[error("{field}: {value} is outside {min}-{max}")]
    OutOfRange {
        field: CronField,
        value: u32,
        min: u8,
        max: u8,
    },

    #[error("{field}: range {start}-{end} is reversed")]
    ReversedRange { field: CronField, start: u8, end: u8 },

    #[error("{field}: step must be at least 1")]
    ZeroStep { field: CronField },
}

/// Why one manifest file was skipped.
#[derive(Debug, Error)]
pub enum ParseErrorKind {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("Unsupported apiVersion '{0}'")]
    ApiVersion(String),

    #[error("Unsupported kind '{0}'")]
    Kind(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Invalid schedule: {0}")]
    Schedule(#[from] CronError),
}

/// A manifest file that was excluded from the revision.
#[derive(Debug, Error)]
#[error("{}: {kind}", .file.display())]
pub struct ParseError {
    /// Path relative to the revision root.
    pub file: PathBuf,
    pub kind: ParseErrorKind,
}

/// One id claimed by more than one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateId {
    pub id: Uuid,
    pub files: Vec<PathBuf>,
}

/// Problems that invalidate a whole revision.
#[derive(Debug, Error)]
pub enum RevisionError {
    #[error("Revision {revision} rejected: {} manifest id(s) used more than once", .duplicates.len())]
    DuplicateIds {
        revision: String,
        duplicates: Vec<DuplicateId>,
    },

    #[error("Manifest root does not exist: {}", .0.display())]
    MissingRoot(PathBuf),
}
