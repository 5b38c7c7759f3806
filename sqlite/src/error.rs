//! Error types for destination store operations.
//!
//! Provides a unified error type covering connection setup, schema growth,
//! item writes and shard merging.

use thiserror::Error;

/// Errors that can occur while talking to the destination store.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite database operation failure.
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// Malformed or unsupported connection string.
    #[error("invalid connection string '{dsn}': {reason}")]
    ConfigError {
        /// The offending connection string.
        dsn: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The store could not be opened or did not answer a ping.
    #[error("unable to connect to '{target}': {source}")]
    ConnectError {
        /// Store location.
        target: String,
        /// Underlying driver failure.
        #[source]
        source: rusqlite::Error,
    },

    /// Creating a record table or column failed.
    #[error("schema error on {object}: {source}")]
    SchemaError {
        /// Table or `table.column` being created.
        object: String,
        /// Underlying driver failure.
        #[source]
        source: rusqlite::Error,
    },

    /// A store guarantee the writer relies on did not hold.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Filesystem failure (shard discovery, marker handling).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Directory traversal failure.
    #[error("walk error: {0}")]
    WalkError(#[from] walkdir::Error),
}

/// Convenience alias for results with [`SqliteError`].
pub type Result<T> = std::result::Result<T, SqliteError>;
