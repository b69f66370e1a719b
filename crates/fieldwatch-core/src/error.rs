//! Error types for fieldwatch-core

use thiserror::Error;

/// Result type alias using fieldwatch-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldwatch-core operations
///
/// Remote failures are not represented here; the gateway reports them as
/// [`crate::gateway::Outcome`] values so the engines can apply retry policy.
#[derive(Error, Debug)]
pub enum Error {
    /// Local storage failure (transaction could not commit, corrupt row, ...)
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Database state that violates an internal expectation
    #[error("Database error: {0}")]
    Database(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or queue entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error came from the local store.
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Database(_))
    }
}
