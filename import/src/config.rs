//! Import run configuration.
//!
//! Defines the YAML-serializable settings of one import run: where the dumps
//! are, where items go, and how the work is spread over workers.
//!
//! # Example YAML
//!
//! ```yaml
//! source_dir: /data/k10plus
//! target:
//!   per_file:
//!     output_dir: /data/shards
//! workers: 8
//! mode: denormalized
//! layout: sharded
//! extensions: [pp, pp.gz]
//! progress_interval: 50000
//! identifier:
//!   field: "003@"
//!   subfield: "0"
//! ```

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use pica_core::IdentifierKey;
use pica_sqlite::{DEFAULT_PROGRESS_INTERVAL, RecordLayout, StoreConfig, WriteMode};
use serde::{Deserialize, Serialize};

use crate::error::{ImportError, Result};

/// Default id range reserved per shard (2^32).
pub const DEFAULT_SHARD_ID_STRIDE: i64 = 1 << 32;

/// Where imported items are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// All workers write into one store.
    Shared(StoreConfig),
    /// Every input file gets its own shard database below `output_dir`.
    PerFile {
        /// Root directory of the shard databases.
        output_dir: PathBuf,
    },
}

impl Target {
    /// Builds a shared target from a `<driver>:<location>` connection string.
    ///
    /// # Examples
    ///
    /// ```
    /// use pica_import::Target;
    ///
    /// assert!(Target::from_dsn("sqlite3:k10.sqlite").is_ok());
    /// assert!(Target::from_dsn("k10.sqlite").is_err());
    /// ```
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        Ok(Self::Shared(StoreConfig::parse(dsn)?))
    }
}

/// Settings of one import run.
///
/// # Examples
///
/// ```
/// use pica_import::{ImportConfig, Target};
///
/// let config = ImportConfig::new("dumps", Target::PerFile { output_dir: "out".into() })
///     .with_workers(4);
/// assert_eq!(config.workers, 4);
/// assert!(config.extensions.contains(&"pp".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Directory searched recursively for input files.
    pub source_dir: PathBuf,
    /// Destination of the items, written as a one-key map (`shared:` or `per_file:`).
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub target: Target,
    /// Number of workers; 0 uses all available CPUs.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Persistence strategy.
    #[serde(default)]
    pub mode: WriteMode,
    /// Record table layout for denormalized mode.
    #[serde(default)]
    pub layout: RecordLayout,
    /// File name suffixes (without leading dot) of input files.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Items between progress log lines; 0 disables them.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    /// Id range reserved per shard in per-file mode.
    #[serde(default = "default_shard_id_stride")]
    pub shard_id_stride: i64,
    /// Field/subfield holding the item identifier.
    #[serde(default)]
    pub identifier: IdentifierKey,
}

fn default_workers() -> usize {
    1
}

fn default_extensions() -> Vec<String> {
    vec!["pp".to_string(), "pp.gz".to_string()]
}

fn default_progress_interval() -> u64 {
    DEFAULT_PROGRESS_INTERVAL
}

fn default_shard_id_stride() -> i64 {
    DEFAULT_SHARD_ID_STRIDE
}

impl ImportConfig {
    /// Creates a configuration with default settings.
    pub fn new(source_dir: impl Into<PathBuf>, target: Target) -> Self {
        Self {
            source_dir: source_dir.into(),
            target,
            workers: default_workers(),
            mode: WriteMode::default(),
            layout: RecordLayout::default(),
            extensions: default_extensions(),
            progress_interval: default_progress_interval(),
            shard_id_stride: default_shard_id_stride(),
            identifier: IdentifierKey::default(),
        }
    }

    /// Sets the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the persistence strategy.
    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the record table layout.
    pub fn with_layout(mut self, layout: RecordLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`](ImportError::IoError) if the file cannot be read,
    /// or [`YamlError`](ImportError::YamlError) if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader)?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Number of workers actually started.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }

    /// Checks the settings before a run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](ImportError::ConfigError) if the source
    /// directory is missing, no extension is configured, the shard id
    /// stride is not positive, or a shared store is in memory (every worker
    /// would get a private database).
    pub fn validate(&self) -> Result<()> {
        if !self.source_dir.is_dir() {
            return Err(ImportError::ConfigError(format!(
                "source directory '{}' does not exist",
                self.source_dir.display()
            )));
        }
        if self.extensions.iter().all(|e| e.trim_matches('.').is_empty()) {
            return Err(ImportError::ConfigError(
                "no input file extension configured".to_string(),
            ));
        }
        if let Target::Shared(store) = &self.target {
            if store.is_memory() && self.mode != WriteMode::DryRun {
                return Err(ImportError::ConfigError(
                    "an in-memory database cannot be a shared target".to_string(),
                ));
            }
        }
        if self.shard_id_stride <= 0 {
            return Err(ImportError::ConfigError(format!(
                "shard id stride must be positive, got {}",
                self.shard_id_stride
            )));
        }
        Ok(())
    }
}
