//! Error types for reading PICA+ input.

use thiserror::Error;

/// Errors that can occur while reading items from a stream.
///
/// The parser is lenient: malformed lines are skipped rather than reported,
/// so the only failure is the underlying reader giving up.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Reading from the underlying stream failed.
    #[error("error reading {origin}: {source}")]
    Io {
        /// Display form of the input (file path or `<stream>`).
        origin: String,
        /// The I/O failure.
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for results with [`ParseError`].
pub type Result<T> = std::result::Result<T, ParseError>;
