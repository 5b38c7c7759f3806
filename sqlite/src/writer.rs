//! Persisting parsed items.
//!
//! [`ItemWriter`] stores one [`Item`] per transaction using one of three
//! strategies selected by [`WriteMode`]:
//!
//! - **Normalized**: one `k10_item` row plus one `k10_value` row per value.
//! - **Denormalized**: one wide row per record table, one column per
//!   field/subfield pair; missing columns are added through the
//!   [`SchemaRegistry`].
//! - **Dry run**: nothing is stored, only counters move.
//!
//! A reader of the store never sees part of an item: the item rows and the
//! file's item counter are committed together.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use pica_core::{FileRecord, Item, Value};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SqliteError};
use crate::registry::SchemaRegistry;
use crate::schema::{FILE_TABLE, ITEM_TABLE, VALUE_TABLE};
use crate::sql::{InsertStatement, quote_literal, quote_nullable};

/// Items between two progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

/// Distinct columns materialised per denormalized item; the rest is dropped.
pub const MAX_RECORD_COLUMNS: usize = 1580;

/// Value rows per multi-row insert (5 parameters each).
const VALUE_ROWS_PER_INSERT: usize = 150;

/// Persistence strategy for items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    /// Item and value tables.
    #[default]
    Normalized,
    /// Wide record tables with dynamic columns.
    Denormalized,
    /// Parse only; nothing is persisted.
    DryRun,
}

enum Sink {
    Normalized(Connection),
    Denormalized {
        conn: Connection,
        registry: Arc<SchemaRegistry>,
    },
    DryRun,
}

/// Writes items of one worker into its destination store.
pub struct ItemWriter {
    sink: Sink,
    progress_interval: u64,
}

impl ItemWriter {
    /// Creates a writer storing items in the item and value tables.
    pub fn normalized(conn: Connection) -> Self {
        Self::with_sink(Sink::Normalized(conn))
    }

    /// Creates a writer storing items as wide records.
    pub fn denormalized(conn: Connection, registry: Arc<SchemaRegistry>) -> Self {
        Self::with_sink(Sink::Denormalized { conn, registry })
    }

    /// Creates a writer that stores nothing.
    pub fn dry_run() -> Self {
        Self::with_sink(Sink::DryRun)
    }

    fn with_sink(sink: Sink) -> Self {
        Self {
            sink,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Sets the number of items between progress log lines (0 disables).
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Returns the persistence strategy.
    pub fn mode(&self) -> WriteMode {
        match self.sink {
            Sink::Normalized(_) => WriteMode::Normalized,
            Sink::Denormalized { .. } => WriteMode::Denormalized,
            Sink::DryRun => WriteMode::DryRun,
        }
    }

    /// Returns the store connection, if any.
    pub fn connection(&self) -> Option<&Connection> {
        match &self.sink {
            Sink::Normalized(conn) | Sink::Denormalized { conn, .. } => Some(conn),
            Sink::DryRun => None,
        }
    }

    /// Consumes the writer and returns the store connection, if any.
    pub fn into_connection(self) -> Option<Connection> {
        match self.sink {
            Sink::Normalized(conn) | Sink::Denormalized { conn, .. } => Some(conn),
            Sink::DryRun => None,
        }
    }

    /// Finds or creates the `k10_file` row for `path`.
    ///
    /// A file imported before keeps its id and continues its item counter.
    pub fn register_file(&mut self, path: &Path) -> Result<FileRecord> {
        let Some(conn) = self.connection() else {
            return Ok(FileRecord::detached(path));
        };
        let filepath = path.to_string_lossy();

        let existing: Option<(i64, i64)> = conn
            .query_row(
                &format!(r#"SELECT "id", "item_count" FROM "{FILE_TABLE}" WHERE "filepath" = ?1"#),
                [filepath.as_ref()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((id, count)) = existing {
            let mut record = FileRecord::new(id, path);
            record.item_count = count.max(0) as u64;
            return Ok(record);
        }

        conn.execute(
            &format!(r#"INSERT INTO "{FILE_TABLE}" ("filepath") VALUES (?1)"#),
            [filepath.as_ref()],
        )?;
        Ok(FileRecord::new(conn.last_insert_rowid(), path))
    }

    /// Persists one item and advances the file's item counter.
    ///
    /// # Errors
    ///
    /// Any failure rolls the item back and leaves `file` unchanged.
    /// [`SqliteError::SchemaError`] reports a failed column creation,
    /// [`SqliteError::InvariantViolation`] a missing generated item id.
    pub fn write(&mut self, file: &mut FileRecord, item: &Item) -> Result<()> {
        match &mut self.sink {
            Sink::Normalized(conn) => write_values(conn, file, item)?,
            Sink::Denormalized { conn, registry } => {
                write_record(conn, registry.as_ref(), file, item)?
            }
            Sink::DryRun => {}
        }

        file.item_count += 1;
        if self.progress_interval > 0 && file.item_count % self.progress_interval == 0 {
            info!(
                file = %file.path.display(),
                items = file.item_count,
                "Import progress"
            );
        }
        Ok(())
    }
}

fn write_values(conn: &mut Connection, file: &FileRecord, item: &Item) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute(
        &format!(r#"INSERT INTO "{ITEM_TABLE}" ("file_id", "identifier") VALUES (?1, ?2)"#),
        params![file.id, item.identifier],
    )?;
    let item_id = tx.last_insert_rowid();
    if item_id <= 0 {
        return Err(SqliteError::InvariantViolation(format!(
            "no generated id for {item} of {}",
            file.path.display()
        )));
    }

    insert_values(&tx, item_id, &item.values)?;
    bump_item_count(&tx, file.id)?;
    tx.commit()?;
    Ok(())
}

fn insert_values(tx: &Transaction<'_>, item_id: i64, values: &[Value]) -> Result<()> {
    for chunk in values.chunks(VALUE_ROWS_PER_INSERT) {
        let rows = vec!["(?, ?, ?, ?, ?)"; chunk.len()].join(", ");
        let mut stmt = tx.prepare_cached(&format!(
            r#"INSERT INTO "{VALUE_TABLE}" ("item_id", "feld", "unterfeld", "position", "wert") VALUES {rows}"#
        ))?;

        let mut params: Vec<SqlValue> = Vec::with_capacity(chunk.len() * 5);
        for value in chunk {
            params.push(SqlValue::Integer(item_id));
            params.push(SqlValue::Text(value.field.clone()));
            params.push(SqlValue::Text(value.subfield.to_string()));
            params.push(SqlValue::Integer(i64::from(value.occurrence)));
            params.push(SqlValue::Text(value.content.clone()));
        }
        stmt.execute(rusqlite::params_from_iter(params))?;
    }
    Ok(())
}

fn bump_item_count(tx: &Transaction<'_>, file_id: i64) -> Result<()> {
    tx.execute(
        &format!(r#"UPDATE "{FILE_TABLE}" SET "item_count" = "item_count" + 1 WHERE "id" = ?1"#),
        [file_id],
    )?;
    Ok(())
}

/// Folds an item into `(column, content)` pairs, one per distinct column.
///
/// Repeated field/subfield pairs keep the content of their first
/// occurrence. At most [`MAX_RECORD_COLUMNS`] columns are returned.
/// Column names compare case-insensitively like SQLite identifiers, so
/// subfields `A` and `a` of one field share a column and the first wins.
pub fn fold_record(item: &Item) -> Vec<(String, &str)> {
    let mut seen = HashSet::new();
    let mut record = Vec::new();
    for value in &item.values {
        let column = value.column();
        if record.len() >= MAX_RECORD_COLUMNS {
            break;
        }
        if seen.insert(column.to_ascii_lowercase()) {
            record.push((column, value.content.as_str()));
        }
    }
    record
}

fn write_record(
    conn: &mut Connection,
    registry: &SchemaRegistry,
    file: &FileRecord,
    item: &Item,
) -> Result<()> {
    let record = fold_record(item);

    for (column, _) in &record {
        registry.ensure(conn, column)?;
    }

    let layout = registry.layout();
    let identifier = quote_nullable(item.identifier.as_deref());
    let mut inserts: BTreeMap<String, InsertStatement> = BTreeMap::new();
    for (column, content) in &record {
        let table = layout.table_for(column);
        inserts
            .entry(table)
            .or_insert_with_key(|table| {
                let mut insert = InsertStatement::new(table);
                insert
                    .push("file_id", file.id.to_string())
                    .push("identifier", identifier.clone());
                insert
            })
            .push(column, quote_literal(content));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for insert in inserts.values() {
        tx.execute(&insert.to_sql(), [])?;
    }
    bump_item_count(&tx, file.id)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RecordLayout, Schema, StoreConfig, count_rows};

    fn item(identifier: Option<&str>, values: &[(&str, char, &str)]) -> Item {
        let mut item = Item::new(None);
        item.identifier = identifier.map(String::from);
        item.values = values
            .iter()
            .map(|(f, s, c)| Value::new(*f, *s, 0, *c))
            .collect();
        item
    }

    fn denormalized(layout: RecordLayout) -> ItemWriter {
        let conn = StoreConfig::sqlite(":memory:").open().unwrap();
        let registry = SchemaRegistry::load(&conn, Schema::sqlite(), layout).unwrap();
        ItemWriter::denormalized(conn, Arc::new(registry))
    }

    #[test]
    fn test_fold_record_keeps_first_occurrence() {
        let item = item(
            None,
            &[("045E", 'a', "first"), ("045E", 'a', "second"), ("045E", 'b', "b")],
        );
        assert_eq!(
            fold_record(&item),
            vec![("045Ea".to_string(), "first"), ("045Eb".to_string(), "b")]
        );
    }

    #[test]
    fn test_fold_record_ignores_subfield_case() {
        let item = item(None, &[("045E", 'A', "upper"), ("045E", 'a', "lower")]);
        assert_eq!(fold_record(&item), vec![("045EA".to_string(), "upper")]);
    }

    #[test]
    fn test_fold_record_caps_columns() {
        let mut big = Item::new(None);
        for i in 0..(MAX_RECORD_COLUMNS + 10) {
            big.values.push(Value::new(format!("{i:04}"), 'a', 0, "x"));
        }
        assert_eq!(fold_record(&big).len(), MAX_RECORD_COLUMNS);
    }

    #[test]
    fn test_register_file_is_idempotent() {
        let conn = StoreConfig::sqlite(":memory:").open().unwrap();
        let mut writer = ItemWriter::normalized(conn);
        let first = writer.register_file(Path::new("a.pp")).unwrap();
        let again = writer.register_file(Path::new("a.pp")).unwrap();
        let other = writer.register_file(Path::new("b.pp")).unwrap();
        assert_eq!(first.id, again.id);
        assert_ne!(first.id, other.id);
    }

    #[test]
    fn test_normalized_write() {
        let conn = StoreConfig::sqlite(":memory:").open().unwrap();
        let mut writer = ItemWriter::normalized(conn);
        let mut file = writer.register_file(Path::new("a.pp")).unwrap();

        writer
            .write(
                &mut file,
                &item(Some("123"), &[("003@", '0', "123"), ("021A", 'a', "Title")]),
            )
            .unwrap();
        writer.write(&mut file, &item(None, &[])).unwrap();
        assert_eq!(file.item_count, 2);

        let conn = writer.connection().unwrap();
        assert_eq!(count_rows(conn, ITEM_TABLE).unwrap(), 2);
        assert_eq!(count_rows(conn, VALUE_TABLE).unwrap(), 2);

        let (feld, unterfeld, wert, identifier): (String, String, String, Option<String>) = conn
            .query_row(
                r#"SELECT v.feld, v.unterfeld, v.wert, i.identifier
                   FROM k10_value v JOIN k10_item i ON i.id = v.item_id
                   WHERE v.feld = '021A'"#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!((feld.as_str(), unterfeld.as_str(), wert.as_str()), ("021A", "a", "Title"));
        assert_eq!(identifier.as_deref(), Some("123"));

        let stored: i64 = conn
            .query_row("SELECT item_count FROM k10_file WHERE id = ?1", [file.id], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(stored, 2);
    }

    #[test]
    fn test_normalized_write_many_values_spans_chunks() {
        let conn = StoreConfig::sqlite(":memory:").open().unwrap();
        let mut writer = ItemWriter::normalized(conn);
        let mut file = writer.register_file(Path::new("a.pp")).unwrap();

        let mut big = Item::new(None);
        for i in 0..(VALUE_ROWS_PER_INSERT * 2 + 7) {
            big.values.push(Value::new("044K", 'a', i as u32, format!("v{i}")));
        }
        writer.write(&mut file, &big).unwrap();

        let conn = writer.connection().unwrap();
        assert_eq!(
            count_rows(conn, VALUE_TABLE).unwrap(),
            (VALUE_ROWS_PER_INSERT * 2 + 7) as u64
        );
    }

    #[test]
    fn test_failed_write_leaves_nothing_behind() {
        let conn = StoreConfig::sqlite(":memory:").open().unwrap();
        let mut writer = ItemWriter::normalized(conn);
        // No k10_file row with this id: the foreign key rejects the item.
        let mut file = FileRecord::new(42, "ghost.pp");

        let err = writer
            .write(&mut file, &item(Some("1"), &[("021A", 'a', "x")]))
            .unwrap_err();
        assert!(matches!(err, SqliteError::DatabaseError(_)));
        assert_eq!(file.item_count, 0);

        let conn = writer.connection().unwrap();
        assert_eq!(count_rows(conn, ITEM_TABLE).unwrap(), 0);
        assert_eq!(count_rows(conn, VALUE_TABLE).unwrap(), 0);
    }

    #[test]
    fn test_denormalized_write_sharded() {
        let mut writer = denormalized(RecordLayout::Sharded);
        let mut file = writer.register_file(Path::new("a.pp")).unwrap();
        writer
            .write(
                &mut file,
                &item(
                    Some("123"),
                    &[
                        ("003@", '0', "123"),
                        ("021A", 'a', "Title"),
                        ("021A", 'a', "Ignored repeat"),
                        ("021A", 'd', "Sub"),
                    ],
                ),
            )
            .unwrap();

        let conn = writer.connection().unwrap();
        let (identifier, title, sub): (String, String, String) = conn
            .query_row(
                r#"SELECT "identifier", "021Aa", "021Ad" FROM "k10_record_02""#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(identifier, "123");
        assert_eq!(title, "Title");
        assert_eq!(sub, "Sub");

        let ppn: String = conn
            .query_row(r#"SELECT "003@0" FROM "k10_record_00""#, [], |row| row.get(0))
            .unwrap();
        assert_eq!(ppn, "123");
        assert_eq!(file.item_count, 1);
    }

    #[test]
    fn test_denormalized_write_single_layout_null_identifier() {
        let mut writer = denormalized(RecordLayout::Single);
        let mut file = writer.register_file(Path::new("a.pp")).unwrap();
        writer
            .write(&mut file, &item(None, &[("021A", 'a', "One")]))
            .unwrap();
        writer
            .write(&mut file, &item(None, &[("021A", 'a', "Two"), ("101@", 'a', "x")]))
            .unwrap();

        let conn = writer.connection().unwrap();
        assert_eq!(count_rows(conn, "k10_record").unwrap(), 2);
        let nulls: i64 = conn
            .query_row(
                r#"SELECT COUNT(*) FROM "k10_record" WHERE "identifier" IS NULL"#,
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(nulls, 2);
    }

    #[test]
    fn test_denormalized_duplicate_identifier_rolls_back() {
        let mut writer = denormalized(RecordLayout::Sharded);
        let mut file = writer.register_file(Path::new("a.pp")).unwrap();
        let record = item(Some("1"), &[("003@", '0', "1"), ("021A", 'a', "x")]);

        writer.write(&mut file, &record).unwrap();
        assert!(writer.write(&mut file, &record).is_err());
        assert_eq!(file.item_count, 1);

        let conn = writer.connection().unwrap();
        assert_eq!(count_rows(conn, "k10_record_00").unwrap(), 1);
        assert_eq!(count_rows(conn, "k10_record_02").unwrap(), 1);
    }

    #[test]
    fn test_dry_run_counts_only() {
        let mut writer = ItemWriter::dry_run().with_progress_interval(1);
        assert_eq!(writer.mode(), WriteMode::DryRun);
        let mut file = writer.register_file(Path::new("a.pp")).unwrap();
        writer
            .write(&mut file, &item(None, &[("021A", 'a', "x")]))
            .unwrap();
        assert_eq!(file.id, 0);
        assert_eq!(file.item_count, 1);
        assert!(writer.into_connection().is_none());
    }
}
