//! Core data model and streaming parser for PICA+ exchange files.
//!
//! PICA+ "normalized" dumps (as shipped by K10plus) bundle bibliographic
//! records using three ASCII information separators. This crate provides:
//!
//! - [`Item`]: one record with its natural identifier and values.
//! - [`Value`]: one field/subfield occurrence.
//! - [`FileRecord`]: bookkeeping for one imported source file.
//! - [`ItemReader`]: a lazy, lenient parser producing items from any
//!   [`BufRead`](std::io::BufRead).
//!
//! # Example
//!
//! ```
//! use pica_core::{ItemReader, column_name};
//!
//! let dump = "\u{1D}\n\u{1E}003@ \u{1F}0123\n\u{1E}021A \u{1F}aTitle\u{1F}dSubtitle\n";
//! for item in ItemReader::new(dump.as_bytes()) {
//!     let item = item.unwrap();
//!     assert_eq!(item.identifier.as_deref(), Some("123"));
//!     let columns: Vec<_> = item.values.iter().map(|v| v.column()).collect();
//!     assert_eq!(columns, ["003@0", "021Aa", "021Ad"]);
//! }
//! assert_eq!(column_name("021A", 'a'), "021Aa");
//! ```

mod error;
mod reader;
mod types;

pub use error::{ParseError, Result};
pub use reader::{ItemReader, ParseStats};
pub use types::*;
