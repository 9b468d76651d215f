//! Error types for Notes Core.
//!
//! This module defines all error types used throughout the library.

use std::sync::Arc;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type alias for Notes operations
pub type NoteResult<T> = Result<T, NoteError>;

/// Main error type for Notes operations
#[derive(Error, Debug)]
pub enum NoteError {
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Live query {name} failed: {source}")]
    LiveQuery {
        name: &'static str,
        #[source]
        source: Arc<NoteError>,
    },

    #[error("Operation cancelled: the view state was closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl NoteError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        NoteError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new not-found error for an entity kind and id
    pub fn not_found(kind: &str, id: i64) -> Self {
        NoteError::NotFound(format!("{} {}", kind, id))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, NoteError::NotFound(_))
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, NoteError::Constraint(_))
    }
}

impl From<rusqlite::Error> for NoteError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => NoteError::Constraint(err.to_string()),
            _ => NoteError::Database(err),
        }
    }
}
