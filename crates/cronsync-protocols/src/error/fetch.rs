//! Manifest fetch errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Fetch timed out after {0} seconds")]
    Timeout(u64),

    /// Another sync holds the single-flight guard.
    #[error("A sync is already in progress")]
    InProgress,

    #[error("Invalid revision: {0}")]
    InvalidRevision(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Timeout(_))
    }
}
