//! Error types for reelsync-core

use std::time::Duration;

use thiserror::Error;

/// Result type alias using reelsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in reelsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Record rejected before persistence
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Durable store unavailable or refused the write
    #[error("Storage error: {0}")]
    Storage(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote authority unreachable
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote authority rejected the request
    #[error("Remote error: {0}")]
    Remote(String),

    /// Remote call exceeded its time budget
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether the caller supplied a malformed record.
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Whether the durable store failed (unavailable, quota, corrupt row).
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Sqlite(_) | Self::Io(_))
    }

    /// Whether the failure came from talking to the remote authority.
    ///
    /// Remote failures never roll back local state; pending records stay
    /// pending and are retried on the next sync trigger.
    pub const fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Http(_) | Self::Remote(_) | Self::Timeout(_)
        )
    }
}

/// Schema violations detected at the store boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required text field is empty
    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),

    /// The record id is not the one derived from its item id
    #[error("record id `{actual}` does not match item id (expected `{expected}`)")]
    IdMismatch { expected: String, actual: String },

    /// A timestamp is negative
    #[error("field `{0}` must not be negative")]
    NegativeTimestamp(&'static str),

    /// Unknown `syncStatus` value
    #[error("invalid sync status `{0}`")]
    InvalidSyncStatus(String),

    /// Vector clock payload could not be decoded
    #[error("invalid vector clock: {0}")]
    InvalidVectorClock(String),
}
