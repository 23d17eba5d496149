//! Error types for storage operations

use std::fmt;

use super::schema::MetricKind;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// SQLSTATE codes of the connection exception class that are worth retrying
///
/// - `08000` connection_exception
/// - `08003` connection_does_not_exist
/// - `08006` connection_failure
#[cfg(feature = "storage-postgres")]
const RETRIABLE_SQLSTATES: [&str; 3] = ["08000", "08003", "08006"];

/// Errors that can occur during storage operations
#[derive(Debug)]
pub enum StorageError {
    /// No metric with this name exists for the requested kind
    NotFound { kind: MetricKind, name: String },

    /// The relational backend has no DSN, was closed, or could not connect
    NotConnected,

    /// Establishing a database connection failed (open, ping or table creation)
    ConnectionFailed(String),

    /// A statement failed inside the database
    #[cfg(feature = "storage-postgres")]
    Database(sqlx::Error),

    /// Journal serialization/deserialization error
    SerializationError(String),

    /// I/O error (journal file access)
    IoError(std::io::Error),

    /// Invalid configuration
    InvalidConfig(String),

    /// A counter would leave the signed 64-bit range
    OutOfRange(String),
}

impl StorageError {
    pub fn not_found(kind: MetricKind, name: impl Into<String>) -> Self {
        StorageError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, StorageError::NotConnected)
    }

    /// Retry predicate for the relational backend
    ///
    /// Only connection-class failures are transient. A failed reconnect counts
    /// as one, so a retry loop keeps trying while the database comes back.
    /// Constraint violations, syntax errors and not-found are never retried.
    pub fn is_retriable(&self) -> bool {
        match self {
            StorageError::ConnectionFailed(_) => true,
            #[cfg(feature = "storage-postgres")]
            StorageError::Database(sqlx::Error::Database(db_err)) => db_err
                .code()
                .is_some_and(|code| RETRIABLE_SQLSTATES.contains(&code.as_ref())),
            _ => false,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound { kind, name } => {
                write!(f, "{} metric not found: {}", kind, name)
            }
            StorageError::NotConnected => write!(f, "database not connected"),
            StorageError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to storage backend: {}", msg)
            }
            #[cfg(feature = "storage-postgres")]
            StorageError::Database(err) => write!(f, "database error: {}", err),
            StorageError::SerializationError(msg) => {
                write!(f, "metric serialization error: {}", msg)
            }
            StorageError::IoError(err) => write!(f, "I/O error: {}", err),
            StorageError::InvalidConfig(msg) => write!(f, "invalid storage configuration: {}", msg),
            StorageError::OutOfRange(msg) => write!(f, "value out of range: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::IoError(err) => Some(err),
            #[cfg(feature = "storage-postgres")]
            StorageError::Database(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

#[cfg(feature = "storage-postgres")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::IoError(io_err),
            _ => StorageError::Database(err),
        }
    }
}
