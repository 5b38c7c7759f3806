//! Error types for import runs.

use thiserror::Error;

/// Errors that can occur while planning or running an import.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Invalid or incomplete import configuration.
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// File I/O failure (inputs, shard files, markers, reports).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Destination store failure.
    #[error("store error: {0}")]
    StoreError(#[from] pica_sqlite::SqliteError),

    /// Input stream failure.
    #[error("parse error: {0}")]
    ParseError(#[from] pica_core::ParseError),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON parsing or serialization failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The worker pool could not be created.
    #[error("thread pool error: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
}

/// Convenience alias for results with [`ImportError`].
pub type Result<T> = std::result::Result<T, ImportError>;
