//! Dynamic schema of the denormalized record tables.
//!
//! Every distinct field/subfield pair becomes a `TEXT` column of a record
//! table. [`SchemaRegistry`] remembers which tables and columns exist and
//! adds missing ones while several workers write to the same store:
//!
//! - lookups of known columns only take a shared read lock,
//! - growth runs under one exclusive DDL lock per registry, re-checks the
//!   in-memory set and the live table definition, and only then issues
//!   `CREATE TABLE` / `ALTER TABLE`.
//!
//! SQLite compares identifiers case-insensitively, so columns are tracked
//! by their ASCII-lowercased name.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError, RwLock};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SqliteError};
use crate::schema::{RECORD_BASE_COLUMNS, RECORD_TABLE, Schema};
use crate::sql::quote_identifier;

/// How wide records are spread over physical tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordLayout {
    /// All columns in one `k10_record` table.
    Single,
    /// The first two characters of a column select table `k10_record_<xx>`.
    #[default]
    Sharded,
}

impl RecordLayout {
    /// Returns the record table holding `column`.
    ///
    /// # Examples
    ///
    /// ```
    /// use pica_sqlite::RecordLayout;
    ///
    /// assert_eq!(RecordLayout::Sharded.table_for("021Aa"), "k10_record_02");
    /// assert_eq!(RecordLayout::Single.table_for("021Aa"), "k10_record");
    /// ```
    pub fn table_for(self, column: &str) -> String {
        match self {
            Self::Single => RECORD_TABLE.to_string(),
            Self::Sharded => {
                let shard: String = column.chars().take(2).collect();
                format!("{RECORD_TABLE}_{shard}")
            }
        }
    }

    fn owns_table(self, table: &str) -> bool {
        match self {
            Self::Single => table == RECORD_TABLE,
            Self::Sharded => table
                .strip_prefix(RECORD_TABLE)
                .is_some_and(|rest| rest.starts_with('_')),
        }
    }
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Registry of existing record tables and columns for one store.
///
/// Share it between workers as `Arc<SchemaRegistry>`; each worker passes
/// its own connection to [`ensure`](Self::ensure).
#[derive(Debug)]
pub struct SchemaRegistry {
    schema: Schema,
    layout: RecordLayout,
    tables: RwLock<HashSet<String>>,
    columns: RwLock<HashSet<String>>,
    ddl: Mutex<()>,
}

impl SchemaRegistry {
    /// Seeds the registry from the record tables already present in `conn`.
    pub fn load(conn: &Connection, schema: Schema, layout: RecordLayout) -> Result<Self> {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut known_tables = HashSet::new();
        let mut known_columns = HashSet::new();
        for table in tables.into_iter().filter(|t| layout.owns_table(t)) {
            for column in table_columns(conn, &table)? {
                if !RECORD_BASE_COLUMNS.contains(&column.as_str()) {
                    known_columns.insert(key(&column));
                }
            }
            known_tables.insert(key(&table));
        }

        debug!(
            tables = known_tables.len(),
            columns = known_columns.len(),
            "Loaded record schema"
        );

        Ok(Self {
            schema,
            layout,
            tables: RwLock::new(known_tables),
            columns: RwLock::new(known_columns),
            ddl: Mutex::new(()),
        })
    }

    /// Returns the table layout.
    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    /// Returns `true` if the column is known to exist.
    pub fn contains(&self, column: &str) -> bool {
        self.columns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key(column))
    }

    /// Number of known dynamic columns.
    pub fn column_count(&self) -> usize {
        self.columns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of known record tables.
    pub fn table_count(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Makes sure `column` exists in its record table.
    ///
    /// Returns `true` if this call created the column. Once `ensure`
    /// returns, inserts referencing the column are valid on every
    /// connection to the store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::SchemaError`] if creating the table or the
    /// column fails.
    pub fn ensure(&self, conn: &Connection, column: &str) -> Result<bool> {
        if self.contains(column) {
            return Ok(false);
        }

        let _guard = self.ddl.lock().unwrap_or_else(PoisonError::into_inner);
        if self.contains(column) {
            return Ok(false);
        }

        let table = self.layout.table_for(column);
        self.ensure_table(conn, &table)?;

        let schema_err = |source| SqliteError::SchemaError {
            object: format!("{table}.{column}"),
            source,
        };
        let exists = table_columns(conn, &table)
            .map_err(|err| match err {
                SqliteError::DatabaseError(source) => schema_err(source),
                other => other,
            })?
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column));

        if !exists {
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} TEXT",
                quote_identifier(&table),
                quote_identifier(column)
            ))
            .map_err(schema_err)?;
            debug!(table = %table, column = %column, "Added record column");
        }

        self.columns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key(column));
        Ok(!exists)
    }

    /// Creates a record table if needed. Caller holds the DDL lock.
    fn ensure_table(&self, conn: &Connection, table: &str) -> Result<()> {
        let table_key = key(table);
        if self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&table_key)
        {
            return Ok(());
        }

        conn.execute_batch(&self.schema.record_table_sql(table))
            .map_err(|source| SqliteError::SchemaError {
                object: table.to_string(),
                source,
            })?;
        debug!(table = %table, "Created record table");

        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table_key);
        Ok(())
    }
}

/// Lists the columns of a table in definition order.
pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}
