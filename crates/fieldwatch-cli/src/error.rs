use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldwatch_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record ID cannot be empty")]
    EmptyId,
    #[error("Invalid JSON for {field}: {reason}")]
    InvalidJson { field: &'static str, reason: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Backend endpoint is not configured. Run `fieldwatch config init --endpoint URL`, pass --endpoint, or set FIELDWATCH_ENDPOINT."
    )]
    EndpointNotConfigured,
}
