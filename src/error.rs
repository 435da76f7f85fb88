//! Error types shared by the store, index, graph and gateways.

use thiserror::Error;

/// Errors produced by qmd operations.
///
/// Gateways translate these into transport failures: `InvalidArgument`
/// becomes a 400, `NotFound` a 404, and everything else a 500.
#[derive(Debug, Error)]
pub enum QmdError {
    /// A required field is missing or malformed. The mutation was not applied.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced entry or tag does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database failure: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An invariant was violated, e.g. the index diverged from the store.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QmdError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

/// Result alias for qmd operations.
pub type Result<T> = std::result::Result<T, QmdError>;
