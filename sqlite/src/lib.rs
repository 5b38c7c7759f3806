//! SQLite destination store for PICA+ imports.
//!
//! This crate owns everything that touches the database: opening stores,
//! the fixed base schema, the dynamic record schema, writing items and
//! merging per-file shards.
//!
//! # Architecture
//!
//! - **`store`**: connection strings, open + ping + pragmas, shard helpers
//! - **`schema`**: base DDL with the `--SERIAL--` placeholder resolved
//! - **`registry`**: thread-safe growth of record tables and columns
//! - **`writer`**: transactional item persistence (normalized, denormalized, dry run)
//! - **`merge`**: appending shard databases to one target
//! - **`sql`**: identifier and literal escaping for dynamic statements
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::Path;
//! use pica_core::ItemReader;
//! use pica_sqlite::{ItemWriter, StoreConfig};
//!
//! let conn = StoreConfig::parse("sqlite3:k10plus.sqlite").unwrap().open().unwrap();
//! let mut writer = ItemWriter::normalized(conn);
//! let mut file = writer.register_file(Path::new("dump.pp")).unwrap();
//!
//! let input = std::io::BufReader::new(std::fs::File::open("dump.pp").unwrap());
//! for item in ItemReader::new(input) {
//!     writer.write(&mut file, &item.unwrap()).unwrap();
//! }
//! println!("{} items", file.item_count);
//! ```

mod error;
mod merge;
mod registry;
mod schema;
pub mod sql;
mod store;
mod writer;

pub use error::{Result, SqliteError};
pub use merge::{MergeReport, Merger, SHARD_EXTENSION, ShardFailure, ShardReport};
pub use registry::{RecordLayout, SchemaRegistry};
pub use schema::{
    FILE_TABLE, ITEM_TABLE, RECORD_BASE_COLUMNS, RECORD_TABLE, SERIAL_PLACEHOLDER, Schema,
    VALUE_TABLE,
};
pub use store::{
    DEFAULT_BUSY_TIMEOUT_MS, RECOVERY_MARKER_SUFFIX, StoreConfig, count_rows,
    recovery_marker_path, remove_database, reserve_id_block,
};
pub use writer::{DEFAULT_PROGRESS_INTERVAL, ItemWriter, MAX_RECORD_COLUMNS, WriteMode, fold_record};
