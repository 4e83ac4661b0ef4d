//! Error taxonomy shared by every lmsbridge crate.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Persistence failures surfaced by storage implementations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum Error {
    /// No valid or refreshable token for the user. Never retried automatically.
    #[error("Integration not authorized for user {user_id}")]
    NotAuthorized { user_id: String },

    /// A remote call that kept failing after every retry, or an item the
    /// store refused to upsert.
    #[error("{method} {path} failed after {attempts} attempt(s): {message}")]
    FatalSync {
        method: String,
        path: String,
        attempts: u32,
        message: String,
    },

    /// Non-retryable error response from the remote LMS.
    #[error("Remote API error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    pub fn not_authorized(user_id: impl Into<String>) -> Self {
        Self::NotAuthorized {
            user_id: user_id.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// True for the permission failure callers must report as "not authorized".
    pub fn is_not_authorized(&self) -> bool {
        matches!(self, Self::NotAuthorized { .. })
    }
}
