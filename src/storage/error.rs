//! Errors of the monitoring store

use std::fmt;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    /// Backend could not be opened or reached
    ConnectionFailed(String),

    /// A read or write against the backend failed
    QueryFailed(String),

    /// Schema migration failed while opening the store
    MigrationFailed(String),

    /// A stored tag set could not be encoded or decoded
    InvalidTags(String),

    /// Backend refused the operation (used by stores without a database)
    BackendError(String),

    Io(std::io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(msg) => write!(f, "monitoring store unavailable: {msg}"),
            StorageError::QueryFailed(msg) => write!(f, "monitoring store query failed: {msg}"),
            StorageError::MigrationFailed(msg) => {
                write!(f, "monitoring store migration failed: {msg}")
            }
            StorageError::InvalidTags(msg) => write!(f, "invalid tag set: {msg}"),
            StorageError::BackendError(msg) => write!(f, "monitoring store error: {msg}"),
            StorageError::Io(err) => write!(f, "monitoring store I/O error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::Io(io_err),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StorageError::ConnectionFailed(err.to_string())
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::MigrationFailed(err.to_string())
    }
}
