//! Shared error type for the declarant services

use thiserror::Error;

/// Result alias used by database and configuration code
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared by the store, configuration and service layers
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite failure (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem failure while reading config or creating the root folder
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON column could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file, environment or settings value is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session or row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write rejected because the target is immutable (e.g. row already classified)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller supplied an invalid value (review status, parameter, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored data is inconsistent
    #[error("Internal error: {0}")]
    Internal(String),
}
