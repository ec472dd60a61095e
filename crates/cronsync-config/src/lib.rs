//! # CronSync Config
//!
//! Configuration management for the cronsync agent: one TOML file with
//! `${VAR}` environment expansion, `~` path expansion, and validation that
//! separates fatal errors from warnings.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
