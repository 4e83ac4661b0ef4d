//! Storage-layer errors and their mapping into the core taxonomy.

use diesel::result::DatabaseErrorKind;
use thiserror::Error;

use lmsbridge_core::errors::{DatabaseError, Error};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Stored value is malformed: {0}")]
    Malformed(String),

    #[error("Database writer is not running")]
    WriterClosed,
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        let db_error = match err {
            StorageError::Query(diesel::result::Error::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                info,
            )) => DatabaseError::UniqueViolation(info.message().to_string()),
            StorageError::Query(e) => DatabaseError::QueryFailed(e.to_string()),
            StorageError::Pool(e) => DatabaseError::ConnectionFailed(e.to_string()),
            StorageError::Connection(e) => DatabaseError::ConnectionFailed(e.to_string()),
            StorageError::Migration(message) => DatabaseError::MigrationFailed(message),
            StorageError::Malformed(message) => DatabaseError::Internal(message),
            StorageError::WriterClosed => {
                DatabaseError::Internal("database writer is not running".to_string())
            }
        };
        Error::Database(db_error)
    }
}
