//! Per-file outcomes and run summaries.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pica_sqlite::WriteMode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Lifecycle of one input file.
///
/// `Pending → Parsing → Writing* → Done | Failed`, or `Pending → Skipped`
/// for a shard that is already complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// Not picked up by a worker yet.
    Pending,
    /// Opened; no item written yet.
    Parsing,
    /// At least one item committed.
    Writing,
    /// All items committed.
    Done,
    /// Aborted by an error.
    Failed,
    /// Complete shard from an earlier run.
    Skipped,
}

impl FileState {
    /// Returns `true` if a file may move from `self` to `next`.
    ///
    /// # Examples
    ///
    /// ```
    /// use pica_import::FileState;
    ///
    /// assert!(FileState::Parsing.can_advance_to(FileState::Writing));
    /// assert!(FileState::Writing.can_advance_to(FileState::Writing));
    /// assert!(!FileState::Done.can_advance_to(FileState::Writing));
    /// ```
    pub fn can_advance_to(self, next: Self) -> bool {
        use FileState::*;
        matches!(
            (self, next),
            (Pending, Parsing | Skipped | Failed)
                | (Parsing, Writing | Done | Failed)
                | (Writing, Writing | Done | Failed)
        )
    }

    /// Returns `true` for `Done`, `Failed` and `Skipped`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Parsing => "parsing",
            Self::Writing => "writing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// What happened to one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    /// Input file.
    pub path: PathBuf,
    /// Shard database, in per-file mode.
    pub destination: Option<PathBuf>,
    /// Final state.
    pub state: FileState,
    /// Items committed.
    pub items: u64,
    /// Values of the committed items.
    pub values: u64,
    /// Input lines read.
    pub lines: u64,
    /// Subfield segments dropped as too short.
    pub dropped_segments: u64,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
    /// Rendered error of a failed file.
    pub error: Option<String>,
}

impl FileOutcome {
    /// Creates a pending outcome for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            destination: None,
            state: FileState::Pending,
            items: 0,
            values: 0,
            lines: 0,
            dropped_segments: 0,
            duration_ms: 0,
            error: None,
        }
    }

    /// Moves to `next`. Transitions the lifecycle does not allow are ignored.
    pub fn advance(&mut self, next: FileState) {
        if !self.state.can_advance_to(next) {
            debug!(
                path = %self.path.display(),
                from = %self.state,
                to = %next,
                "Ignoring invalid file state transition"
            );
            return;
        }
        if self.state != next {
            debug!(path = %self.path.display(), from = %self.state, to = %next, "File state");
        }
        self.state = next;
    }

    /// Marks the file as failed with `error`.
    pub fn fail(&mut self, error: impl fmt::Display) {
        self.advance(FileState::Failed);
        self.error = Some(error.to_string());
    }
}

/// Summary of one import run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Start of the run.
    pub started_at: DateTime<Utc>,
    /// End of the run.
    pub finished_at: Option<DateTime<Utc>>,
    /// Persistence strategy.
    pub mode: WriteMode,
    /// Number of workers.
    pub workers: usize,
    /// Outcomes in discovery order.
    pub files: Vec<FileOutcome>,
    /// Inputs never handed to a worker because an earlier file failed.
    pub not_dispatched: Vec<PathBuf>,
}

impl ImportReport {
    /// Starts a report now.
    pub fn start(mode: WriteMode, workers: usize) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            mode,
            workers,
            files: Vec::new(),
            not_dispatched: Vec::new(),
        }
    }

    /// Records the end of the run.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Outcomes of failed files.
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| f.state == FileState::Failed)
    }

    /// Returns `true` if every input was processed without error.
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none() && self.not_dispatched.is_empty()
    }

    /// Number of files that ended in `state`.
    pub fn count(&self, state: FileState) -> usize {
        self.files.iter().filter(|f| f.state == state).count()
    }

    /// Items committed over all files.
    pub fn total_items(&self) -> u64 {
        self.files.iter().map(|f| f.items).sum()
    }

    /// Values committed over all files.
    pub fn total_values(&self) -> u64 {
        self.files.iter().map(|f| f.values).sum()
    }

    /// Run time in milliseconds, once finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    /// Writes the report as pretty-printed JSON.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
