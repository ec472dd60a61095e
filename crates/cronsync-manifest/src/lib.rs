//! # CronSync Manifest
//!
//! Desired-state input for the agent.
//!
//! - [`CronExpr`] - the 5-field schedule grammar
//! - [`ManifestParser`] - fail-soft, per-file parsing of a revision tree
//! - [`GitSource`] / [`DirectorySource`] - [`ManifestSource`] implementations
//!
//! [`ManifestSource`]: cronsync_protocols::ManifestSource

pub mod cron_expr;
pub mod dir_source;
pub mod document;
pub mod error;
pub mod git;
pub mod parser;

pub use cron_expr::{CronExpr, CronField};
pub use dir_source::DirectorySource;
pub use error::{CronError, DuplicateId, ParseError, ParseErrorKind, RevisionError};
pub use git::GitSource;
pub use parser::{ManifestParser, ParsedRevision};
