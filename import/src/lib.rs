//! Batch import of PICA+ dump directories.
//!
//! Ties the streaming parser of [`pica_core`] to the stores of
//! [`pica_sqlite`]: input discovery, a worker pool over files, per-shard
//! crash recovery and a serialisable run report.
//!
//! # Example
//!
//! ```no_run
//! use pica_import::{ImportConfig, Target, run_import};
//!
//! let config = ImportConfig::new("dumps", Target::from_dsn("sqlite3:k10plus.sqlite").unwrap())
//!     .with_workers(4);
//! let report = run_import(&config).unwrap();
//! for failure in report.failures() {
//!     eprintln!("{}: {:?}", failure.path.display(), failure.error);
//! }
//! ```

mod config;
mod discover;
mod error;
mod orchestrator;
mod report;

pub use config::{DEFAULT_SHARD_ID_STRIDE, ImportConfig, Target};
pub use discover::{discover_inputs, matching_extension, open_input, shard_path};
pub use error::{ImportError, Result};
pub use orchestrator::run_import;
pub use report::{FileOutcome, FileState, ImportReport};
