//! Opening and preparing destination stores.
//!
//! A store is addressed by a connection string of the form
//! `<driver>:<location>`. Only SQLite (`sqlite3:` or `sqlite:`) is
//! supported; the location is a file path or `:memory:`.
//!
//! # Example
//!
//! ```no_run
//! use pica_sqlite::StoreConfig;
//!
//! let config = StoreConfig::parse("sqlite3:k10plus.sqlite").unwrap();
//! let conn = config.open().unwrap();
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SqliteError};
use crate::schema::{FILE_TABLE, ITEM_TABLE, Schema, VALUE_TABLE};

/// Default time a connection waits for a competing writer.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Suffix of the marker file flagging an unfinished shard.
pub const RECOVERY_MARKER_SUFFIX: &str = ".partial";

/// Connection settings for a SQLite destination store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file, or `:memory:`.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl StoreConfig {
    /// Creates a config for a SQLite file.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    /// Parses a `<driver>:<location>` connection string.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::ConfigError`] if the separator is missing,
    /// the location is empty, or the driver is not SQLite.
    ///
    /// # Examples
    ///
    /// ```
    /// use pica_sqlite::StoreConfig;
    ///
    /// let config = StoreConfig::parse("sqlite3:out/k10.sqlite").unwrap();
    /// assert_eq!(config.path.to_str(), Some("out/k10.sqlite"));
    ///
    /// assert!(StoreConfig::parse("k10.sqlite").is_err());
    /// assert!(StoreConfig::parse("postgres:host=localhost").is_err());
    /// ```
    pub fn parse(dsn: &str) -> Result<Self> {
        let invalid = |reason: &str| SqliteError::ConfigError {
            dsn: dsn.to_string(),
            reason: reason.to_string(),
        };

        let (driver, location) = dsn
            .split_once(':')
            .ok_or_else(|| invalid("expected <driver>:<location>"))?;
        match driver {
            "sqlite3" | "sqlite" => {}
            other => return Err(invalid(&format!("unsupported driver '{other}'"))),
        }
        if location.is_empty() {
            return Err(invalid("empty location"));
        }
        Ok(Self::sqlite(location))
    }

    /// Returns `true` for an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }

    /// Opens a connection, checks it answers, and creates the base tables.
    ///
    /// File databases are switched to WAL journaling so several connections
    /// can share one store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::ConnectError`] if the database cannot be
    /// opened or does not answer, and [`SqliteError::DatabaseError`] if the
    /// schema cannot be applied.
    pub fn open(&self) -> Result<Connection> {
        let target = self.path.display().to_string();
        let connect_err = |source| SqliteError::ConnectError {
            target: target.clone(),
            source,
        };

        let conn = Connection::open(&self.path).map_err(connect_err)?;
        conn.busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .map_err(connect_err)?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(connect_err)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        if !self.is_memory() {
            let mode: String =
                conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            debug!(store = %target, journal_mode = %mode, "Opened store");
        }

        Schema::sqlite().apply(&conn)?;
        Ok(conn)
    }
}

/// Returns the recovery marker path for a shard database.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use pica_sqlite::recovery_marker_path;
///
/// assert_eq!(
///     recovery_marker_path(Path::new("out/a.sqlite")),
///     Path::new("out/a.sqlite.partial"),
/// );
/// ```
pub fn recovery_marker_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(RECOVERY_MARKER_SUFFIX);
    PathBuf::from(name)
}

/// Removes a database file together with its SQLite side files.
///
/// Missing files are ignored.
pub fn remove_database(db_path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(suffix);
        match fs::remove_file(PathBuf::from(name)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Makes the next generated ids of the base tables start after `base`.
///
/// Shards written in one run reserve disjoint id blocks so that their rows
/// can later be merged without primary-key conflicts. Only meaningful on a
/// fresh store.
pub fn reserve_id_block(conn: &Connection, base: i64) -> Result<()> {
    if base <= 0 {
        return Ok(());
    }
    let tx = conn.unchecked_transaction()?;
    for table in [FILE_TABLE, ITEM_TABLE, VALUE_TABLE] {
        tx.execute("DELETE FROM sqlite_sequence WHERE name = ?1", [table])?;
        tx.execute(
            "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
            params![table, base],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Counts the rows of one table.
pub fn count_rows(conn: &Connection, table: &str) -> Result<u64> {
    let sql = format!(
        "SELECT COUNT(*) FROM {}",
        crate::sql::quote_identifier(table)
    );
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}
