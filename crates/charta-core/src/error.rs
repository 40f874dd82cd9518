//! Error types for charta.

use thiserror::Error;
use uuid::Uuid;

use crate::cursor::CursorError;
use crate::models::ValidationError;

/// Result type alias using charta's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for charta operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Patient not found
    #[error("Patient not found: {0}")]
    PatientNotFound(Uuid),

    /// Note not found
    #[error("Note not found: {0}")]
    NoteNotFound(Uuid),

    /// A domain invariant was violated by caller input
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Pagination cursor was malformed or replayed against the wrong query
    #[error("Cursor error: {0}")]
    Cursor(#[from] CursorError),

    /// Blob store operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Uniqueness conflict (e.g. MRN already in use)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
