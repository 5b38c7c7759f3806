//! Merging per-file shard databases into one target store.
//!
//! Each shard is attached to the target connection and copied in a single
//! transaction: `k10_file`, then `k10_item`, then `k10_value`, then any
//! record tables. Shards written by one import run carry disjoint id blocks
//! (see [`reserve_id_block`](crate::reserve_id_block)), so the base tables
//! are copied with their ids and all foreign keys stay valid. Record rows
//! receive fresh ids in the target.
//!
//! A failing shard is rolled back and detached; shards merged before it
//! stay merged. Merging the same shard twice is not detected up front; the
//! second attempt fails on the primary key of `k10_file` and is rolled back.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, TransactionBehavior, params};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, SqliteError};
use crate::schema::{FILE_TABLE, ITEM_TABLE, RECORD_BASE_COLUMNS, RECORD_TABLE, Schema, VALUE_TABLE};
use crate::sql::quote_identifier;
use crate::store::{StoreConfig, recovery_marker_path};

/// Schema name the shard is attached under.
const SHARD_ALIAS: &str = "shard";

/// File extension of shard databases.
pub const SHARD_EXTENSION: &str = "sqlite";

/// Rows copied from one shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShardReport {
    /// Shard database.
    pub path: PathBuf,
    /// `k10_file` rows.
    pub files: u64,
    /// `k10_item` rows.
    pub items: u64,
    /// `k10_value` rows.
    pub values: u64,
    /// Rows of all record tables.
    pub records: u64,
}

/// A shard that could not be merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardFailure {
    /// Shard database.
    pub path: PathBuf,
    /// Rendered error.
    pub error: String,
}

/// Outcome of [`Merger::merge_dir`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Merged shards in merge order.
    pub shards: Vec<ShardReport>,
    /// Shards left out because of an unfinished import.
    pub skipped: Vec<PathBuf>,
    /// Shards whose merge was rolled back.
    pub failures: Vec<ShardFailure>,
}

impl MergeReport {
    /// Total items copied.
    pub fn total_items(&self) -> u64 {
        self.shards.iter().map(|s| s.items).sum()
    }

    /// Total values copied.
    pub fn total_values(&self) -> u64 {
        self.shards.iter().map(|s| s.values).sum()
    }

    /// Returns `true` if no shard failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Appends shard databases to a target store.
pub struct Merger {
    conn: Connection,
    schema: Schema,
    target: Option<PathBuf>,
}

impl Merger {
    /// Opens (and initialises) the target store.
    pub fn open(target: &Path) -> Result<Self> {
        let config = StoreConfig::sqlite(target);
        let conn = config.open()?;
        let target = if config.is_memory() {
            None
        } else {
            Some(fs::canonicalize(target)?)
        };
        Ok(Self {
            conn,
            schema: Schema::sqlite(),
            target,
        })
    }

    /// Returns the target connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Consumes the merger and returns the target connection.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Merges every shard below `source_dir` in file name order.
    ///
    /// The target itself and shards with a recovery marker are left out.
    /// A failing shard is recorded in the report and does not stop the
    /// remaining ones.
    pub fn merge_dir(&mut self, source_dir: &Path) -> Result<MergeReport> {
        let mut report = MergeReport::default();

        for entry in WalkDir::new(source_dir).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(SHARD_EXTENSION)
            {
                continue;
            }
            if self.is_target(path)? {
                debug!(path = %path.display(), "Skipping merge target");
                continue;
            }
            if recovery_marker_path(path).exists() {
                warn!(path = %path.display(), "Skipping unfinished shard");
                report.skipped.push(path.to_path_buf());
                continue;
            }

            match self.append(path) {
                Ok(shard) => report.shards.push(shard),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Shard merge rolled back");
                    report.failures.push(ShardFailure {
                        path: path.to_path_buf(),
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            shards = report.shards.len(),
            failed = report.failures.len(),
            items = report.total_items(),
            "Merge finished"
        );
        Ok(report)
    }

    /// Copies one shard into the target in a single transaction.
    pub fn append(&mut self, shard: &Path) -> Result<ShardReport> {
        // ATTACH would silently create a missing file.
        if !fs::metadata(shard)?.is_file() {
            return Err(SqliteError::InvariantViolation(format!(
                "{} is not a database file",
                shard.display()
            )));
        }

        self.conn.execute(
            &format!("ATTACH DATABASE ?1 AS {SHARD_ALIAS}"),
            [shard.to_string_lossy().as_ref()],
        )?;
        let copied = self.copy_attached(shard);
        // ATTACH and DETACH cannot run inside a transaction.
        let detached = self.conn.execute_batch(&format!("DETACH DATABASE {SHARD_ALIAS}"));

        let report = copied?;
        detached?;
        info!(
            shard = %shard.display(),
            items = report.items,
            values = report.values,
            "Merged shard"
        );
        Ok(report)
    }

    fn copy_attached(&mut self, shard: &Path) -> Result<ShardReport> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        // Record table DDL rolls back together with the rows.
        let record_tables = prepare_record_tables(&tx, &self.schema)?;
        let mut report = ShardReport {
            path: shard.to_path_buf(),
            ..ShardReport::default()
        };

        for (table, count) in [
            (FILE_TABLE, &mut report.files),
            (ITEM_TABLE, &mut report.items),
            (VALUE_TABLE, &mut report.values),
        ] {
            let table = quote_identifier(table);
            *count = tx.execute(
                &format!("INSERT INTO main.{table} SELECT * FROM {SHARD_ALIAS}.{table}"),
                [],
            )? as u64;
        }

        for (table, columns) in &record_tables {
            let columns = columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ");
            let table = quote_identifier(table);
            report.records += tx.execute(
                &format!(
                    "INSERT INTO main.{table} ({columns}) SELECT {columns} FROM {SHARD_ALIAS}.{table}"
                ),
                [],
            )? as u64;
        }

        tx.commit()?;
        Ok(report)
    }

    fn is_target(&self, path: &Path) -> Result<bool> {
        match &self.target {
            Some(target) => Ok(&fs::canonicalize(path)? == target),
            None => Ok(false),
        }
    }
}

/// Creates the shard's record tables and columns in the target.
///
/// Returns each record table with the columns to copy (all but `id`).
fn prepare_record_tables(conn: &Connection, schema: &Schema) -> Result<Vec<(String, Vec<String>)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT name FROM {SHARD_ALIAS}.sqlite_master
         WHERE type = 'table' AND (name = ?1 OR name LIKE ?2 ESCAPE '\\')
         ORDER BY name"
    ))?;
    let pattern = format!("{RECORD_TABLE}\\_%");
    let tables = stmt
        .query_map(params![RECORD_TABLE, pattern], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(stmt);

    let mut prepared = Vec::with_capacity(tables.len());
    for table in tables {
        let shard_columns = schema_columns(conn, SHARD_ALIAS, &table)?;

        conn.execute_batch(&schema.record_table_sql(&table))
            .map_err(|source| SqliteError::SchemaError {
                object: table.clone(),
                source,
            })?;
        let target_columns = schema_columns(conn, "main", &table)?;

        for column in &shard_columns {
            if target_columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                continue;
            }
            conn.execute_batch(&format!(
                "ALTER TABLE main.{} ADD COLUMN {} TEXT",
                quote_identifier(&table),
                quote_identifier(column)
            ))
            .map_err(|source| SqliteError::SchemaError {
                object: format!("{table}.{column}"),
                source,
            })?;
        }

        let columns = shard_columns
            .into_iter()
            .filter(|c| c != RECORD_BASE_COLUMNS[0])
            .collect();
        prepared.push((table, columns));
    }
    Ok(prepared)
}

fn schema_columns(conn: &Connection, schema: &str, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1, ?2)")?;
    let columns = stmt
        .query_map([table, schema], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}
