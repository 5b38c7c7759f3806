//! Record type definitions for PICA+ data.
//!
//! An [`Item`] is one bibliographic record; it owns an ordered list of
//! [`Value`]s, each a single field/subfield occurrence. A [`FileRecord`]
//! tracks one imported source file and how many items were written from it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Item boundary (ASCII group separator).
pub const GROUP_SEPARATOR: char = '\u{1D}';

/// Field line prefix (ASCII record separator).
pub const RECORD_SEPARATOR: char = '\u{1E}';

/// Subfield separator within a field line (ASCII unit separator).
pub const UNIT_SEPARATOR: char = '\u{1F}';

/// Returns the destination column name for a field/subfield pair.
///
/// The mapping is the plain concatenation of tag and code, so every pair
/// maps to exactly one column.
///
/// # Examples
///
/// ```
/// use pica_core::column_name;
///
/// assert_eq!(column_name("003@", '0'), "003@0");
/// assert_eq!(column_name("021A", 'a'), "021Aa");
/// ```
pub fn column_name(field: &str, subfield: char) -> String {
    let mut name = String::with_capacity(field.len() + subfield.len_utf8());
    name.push_str(field);
    name.push(subfield);
    name
}

/// Field and subfield whose content becomes an item's natural identifier.
///
/// Defaults to the PPN (`003@ $0`).
///
/// # Examples
///
/// ```
/// use pica_core::IdentifierKey;
///
/// let key = IdentifierKey::default();
/// assert!(key.matches("003@", '0'));
/// assert!(!key.matches("003@", 'a'));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierKey {
    /// Field tag holding the identifier.
    pub field: String,
    /// Subfield code holding the identifier.
    pub subfield: char,
}

impl IdentifierKey {
    /// Creates a key for the given field and subfield.
    pub fn new(field: impl Into<String>, subfield: char) -> Self {
        Self {
            field: field.into(),
            subfield,
        }
    }

    /// Returns `true` if the pair designates the identifier.
    pub fn matches(&self, field: &str, subfield: char) -> bool {
        self.subfield == subfield && self.field == field
    }
}

impl Default for IdentifierKey {
    fn default() -> Self {
        Self::new("003@", '0')
    }
}

/// One field/subfield occurrence of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    /// Field tag, whitespace-trimmed (e.g. `021A`).
    pub field: String,
    /// Subfield code.
    pub subfield: char,
    /// 0-based ordinal of this subfield code within its field line.
    pub occurrence: u32,
    /// Textual content.
    pub content: String,
}

impl Value {
    /// Creates a value.
    pub fn new(
        field: impl Into<String>,
        subfield: char,
        occurrence: u32,
        content: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            subfield,
            occurrence,
            content: content.into(),
        }
    }

    /// Returns the destination column for this value, see [`column_name`].
    pub fn column(&self) -> String {
        column_name(&self.field, self.subfield)
    }
}

/// One bibliographic record parsed from an input stream.
///
/// Items are produced by [`ItemReader`](crate::ItemReader) and are not
/// modified after they have been handed out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    /// File the item was read from, when known.
    pub origin: Option<Arc<Path>>,
    /// Natural identifier (see [`IdentifierKey`]); `None` when absent.
    pub identifier: Option<String>,
    /// Values in source order.
    pub values: Vec<Value>,
}

impl Item {
    /// Creates an empty item read from `origin`.
    pub fn new(origin: Option<Arc<Path>>) -> Self {
        Self {
            origin,
            identifier: None,
            values: Vec::new(),
        }
    }

    /// Returns the values of one field/subfield pair in source order.
    pub fn values_of<'a, 'f>(
        &'a self,
        field: &'f str,
        subfield: char,
    ) -> impl Iterator<Item = &'a Value> + use<'a, 'f> {
        self.values
            .iter()
            .filter(move |v| v.subfield == subfield && v.field == field)
    }

    /// Returns the first value content of one field/subfield pair.
    pub fn first(&self, field: &str, subfield: char) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.subfield == subfield && v.field == field)
            .map(|v| v.content.as_str())
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Some(id) => write!(f, "item {id} ({} values)", self.values.len()),
            None => write!(f, "item without identifier ({} values)", self.values.len()),
        }
    }
}

/// One imported source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Row id in the destination store; 0 when nothing is persisted.
    pub id: i64,
    /// Path of the source file.
    pub path: PathBuf,
    /// Number of items committed so far.
    pub item_count: u64,
}

impl FileRecord {
    /// Creates a record for a stored file row.
    pub fn new(id: i64, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
            item_count: 0,
        }
    }

    /// Creates a record that is not backed by a store row.
    pub fn detached(path: impl Into<PathBuf>) -> Self {
        Self::new(0, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_name_concatenates() {
        assert_eq!(column_name("003@", '0'), "003@0");
        assert_eq!(column_name("", 'a'), "a");
        assert_eq!(column_name("044K/01", '9'), "044K/019");
    }

    #[test]
    fn test_value_column() {
        let value = Value::new("021A", 'a', 0, "Title");
        assert_eq!(value.column(), "021Aa");
    }

    #[test]
    fn test_item_first_and_values_of() {
        let mut item = Item::new(None);
        item.values.push(Value::new("045E", 'a', 0, "one"));
        item.values.push(Value::new("045E", 'a', 1, "two"));
        item.values.push(Value::new("045E", 'b', 0, "other"));

        assert_eq!(item.first("045E", 'a'), Some("one"));
        assert_eq!(item.values_of("045E", 'a').count(), 2);
        assert_eq!(item.first("021A", 'a'), None);
    }

    #[test]
    fn test_item_first_outlives_field_name() {
        let mut item = Item::new(None);
        item.values.push(Value::new("021A", 'a', 0, "Title"));

        let title = {
            let field = String::from("021A");
            item.first(&field, 'a')
        };
        assert_eq!(title, Some("Title"));

        let contents: Vec<&str> = {
            let field = String::from("021A");
            item.values_of(&field, 'a').map(|v| v.content.as_str()).collect()
        };
        assert_eq!(contents, ["Title"]);
    }

    #[test]
    fn test_item_display() {
        let mut item = Item::new(None);
        assert_eq!(item.to_string(), "item without identifier (0 values)");
        item.identifier = Some("123".into());
        item.values.push(Value::new("003@", '0', 0, "123"));
        assert_eq!(item.to_string(), "item 123 (1 values)");
    }

    #[test]
    fn test_file_record_detached() {
        let record = FileRecord::detached("a.pp");
        assert_eq!(record.id, 0);
        assert_eq!(record.item_count, 0);
    }
}
