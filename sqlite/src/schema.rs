//! Fixed destination schema.
//!
//! The base tables are defined in `initdb.sql`, which marks every
//! autoincrement primary key with a `--SERIAL--` placeholder. [`Schema`]
//! substitutes the driver-specific clause once at construction and is then
//! passed around as an immutable value.
//!
//! # Table structure
//!
//! - `k10_file`: one row per imported source file
//! - `k10_item`: one row per item (normalized mode)
//! - `k10_value`: one row per field/subfield occurrence (normalized mode)
//! - `k10_record[_xx]`: wide per-item rows (denormalized mode), created on
//!   demand by the [`SchemaRegistry`](crate::SchemaRegistry)

use rusqlite::Connection;

use crate::error::Result;
use crate::sql::quote_identifier;

/// Source file table.
pub const FILE_TABLE: &str = "k10_file";
/// Item table (normalized mode).
pub const ITEM_TABLE: &str = "k10_item";
/// Value table (normalized mode).
pub const VALUE_TABLE: &str = "k10_value";
/// Name of the single record table, and prefix of sharded record tables.
pub const RECORD_TABLE: &str = "k10_record";

/// Columns every record table carries before any dynamic column.
pub const RECORD_BASE_COLUMNS: [&str; 3] = ["id", "identifier", "file_id"];

/// Placeholder marking autoincrement primary keys in DDL text.
pub const SERIAL_PLACEHOLDER: &str = "--SERIAL--";

const SQLITE_SERIAL: &str = r#""id" INTEGER PRIMARY KEY AUTOINCREMENT,"#;

const INIT_SQL: &str = include_str!("initdb.sql");

/// Destination DDL with the primary-key clause resolved for one driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    serial: &'static str,
    init_sql: String,
}

impl Schema {
    /// Returns the schema for SQLite.
    pub fn sqlite() -> Self {
        Self {
            serial: SQLITE_SERIAL,
            init_sql: INIT_SQL.replace(SERIAL_PLACEHOLDER, SQLITE_SERIAL),
        }
    }

    /// DDL creating the base tables and indexes.
    pub fn init_sql(&self) -> &str {
        &self.init_sql
    }

    /// DDL creating one record table if it does not exist yet.
    pub fn record_table_sql(&self, table: &str) -> String {
        format!(
            r#"CREATE TABLE IF NOT EXISTS {table} (
    {serial}
    "identifier" TEXT UNIQUE,
    "file_id" INTEGER NOT NULL,
    FOREIGN KEY ("file_id") REFERENCES "{FILE_TABLE}"("id")
);"#,
            table = quote_identifier(table),
            serial = self.serial,
        )
    }

    /// Creates the base tables. Safe to call on an initialised store.
    pub fn apply(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&self.init_sql)?;
        Ok(())
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::sqlite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    #[test]
    fn test_placeholder_substituted() {
        let schema = Schema::sqlite();
        assert!(!schema.init_sql().contains(SERIAL_PLACEHOLDER));
        assert_eq!(schema.init_sql().matches("AUTOINCREMENT").count(), 3);
    }

    #[test]
    fn test_apply_creates_base_tables() {
        let conn = Connection::open_in_memory().unwrap();
        Schema::sqlite().apply(&conn).unwrap();
        assert!(table_exists(&conn, FILE_TABLE));
        assert!(table_exists(&conn, ITEM_TABLE));
        assert!(table_exists(&conn, VALUE_TABLE));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = Schema::sqlite();
        schema.apply(&conn).unwrap();
        schema.apply(&conn).unwrap();
    }

    #[test]
    fn test_record_table_sql() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = Schema::sqlite();
        schema.apply(&conn).unwrap();
        conn.execute_batch(&schema.record_table_sql("k10_record_02"))
            .unwrap();
        conn.execute_batch(&schema.record_table_sql("k10_record_02"))
            .unwrap();
        assert!(table_exists(&conn, "k10_record_02"));

        let columns: Vec<String> = conn
            .prepare("SELECT name FROM pragma_table_info('k10_record_02')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(columns, RECORD_BASE_COLUMNS);
    }
}
