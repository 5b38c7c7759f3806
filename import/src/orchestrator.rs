//! Parallel import of a dump directory.
//!
//! [`run_import`] discovers the input files, starts a fixed number of
//! long-lived workers on a rayon pool and feeds them file jobs through a
//! bounded channel. Each worker parses its file with an
//! [`ItemReader`] and persists the items with an [`ItemWriter`]:
//!
//! - **Shared target**: every worker keeps one connection to the common
//!   store for the whole run; denormalized columns are coordinated by one
//!   [`SchemaRegistry`].
//! - **Per-file target**: every input gets its own shard database. A
//!   `.partial` marker next to the shard exists from the first write until
//!   the last commit, so an interrupted shard is rebuilt on the next run
//!   while complete shards are skipped.
//!
//! Once a file has failed no further files are dispatched; files already in
//! flight run to completion.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use pica_core::{FileRecord, ItemReader};
use pica_sqlite::{
    ItemWriter, Schema, SchemaRegistry, StoreConfig, WriteMode, recovery_marker_path,
    remove_database, reserve_id_block,
};
use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::config::{ImportConfig, Target};
use crate::discover::{discover_inputs, open_input, shard_path};
use crate::error::{ImportError, Result};
use crate::report::{FileOutcome, FileState, ImportReport};

/// One input file handed to a worker.
#[derive(Debug, Clone)]
struct Job {
    ordinal: usize,
    path: PathBuf,
}

/// Where the workers of one run write.
enum Destination {
    DryRun,
    Shared {
        store: StoreConfig,
        registry: Option<Arc<SchemaRegistry>>,
    },
    PerFile {
        output_dir: PathBuf,
    },
}

/// Read-only state shared by all workers of one run.
struct ImportContext<'a> {
    config: &'a ImportConfig,
    destination: Destination,
}

/// Imports every input file below `config.source_dir`.
///
/// File-level failures do not make this function fail; they are recorded
/// in the returned [`ImportReport`].
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the inputs cannot be
/// listed, the shared store cannot be prepared, or the worker pool cannot
/// be started.
pub fn run_import(config: &ImportConfig) -> Result<ImportReport> {
    config.validate()?;

    let inputs = discover_inputs(&config.source_dir, &config.extensions)?;
    if let Target::PerFile { output_dir } = &config.target {
        if config.mode != WriteMode::DryRun {
            check_shard_paths(config, &inputs, output_dir)?;
        }
    }
    let workers = config.effective_workers().min(inputs.len()).max(1);
    let mut report = ImportReport::start(config.mode, workers);

    info!(
        source = %config.source_dir.display(),
        files = inputs.len(),
        workers,
        mode = ?config.mode,
        "Starting import"
    );

    let context = ImportContext {
        config,
        destination: prepare_destination(config)?,
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("pica-import-{i}"))
        .build()?;

    let (job_tx, job_rx) = bounded::<Job>(workers);
    let (result_tx, result_rx) = unbounded::<(usize, FileOutcome)>();
    let failed = AtomicBool::new(false);

    pool.in_place_scope(|scope| {
        for _ in 0..workers {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let context = &context;
            let failed = &failed;
            scope.spawn(move |_| context.run_worker(&jobs, &results, failed));
        }
        drop(job_rx);
        drop(result_tx);

        report.not_dispatched = dispatch(inputs, &job_tx, &failed);
        drop(job_tx);
    });

    let mut outcomes: Vec<(usize, FileOutcome)> = result_rx.iter().collect();
    outcomes.sort_by_key(|(ordinal, _)| *ordinal);
    report.files = outcomes.into_iter().map(|(_, outcome)| outcome).collect();
    report.finish();

    info!(
        done = report.count(FileState::Done),
        skipped = report.count(FileState::Skipped),
        failed = report.count(FileState::Failed),
        not_dispatched = report.not_dispatched.len(),
        items = report.total_items(),
        "Import finished"
    );
    Ok(report)
}

/// Fails if two inputs would be written into the same shard database,
/// e.g. `a.pp` and `a.pp.gz`.
fn check_shard_paths(config: &ImportConfig, inputs: &[PathBuf], output_dir: &Path) -> Result<()> {
    let mut shards: HashMap<PathBuf, &Path> = HashMap::with_capacity(inputs.len());
    for input in inputs {
        let shard = shard_path(&config.source_dir, input, output_dir, &config.extensions);
        if let Some(other) = shards.insert(shard.clone(), input) {
            return Err(ImportError::ConfigError(format!(
                "inputs '{}' and '{}' map to the same shard '{}'",
                other.display(),
                input.display(),
                shard.display()
            )));
        }
    }
    Ok(())
}

/// Feeds jobs until the inputs run out or a failure was observed.
///
/// Returns the inputs that were never dispatched.
fn dispatch(inputs: Vec<PathBuf>, jobs: &Sender<Job>, failed: &AtomicBool) -> Vec<PathBuf> {
    let mut inputs = inputs.into_iter().enumerate();
    for (ordinal, path) in inputs.by_ref() {
        if failed.load(Ordering::SeqCst) {
            let mut rest = vec![path];
            rest.extend(inputs.map(|(_, path)| path));
            warn!(files = rest.len(), "Stopping dispatch after a failed file");
            return rest;
        }
        if let Err(err) = jobs.send(Job { ordinal, path }) {
            // All workers are gone.
            let mut rest = vec![err.into_inner().path];
            rest.extend(inputs.map(|(_, path)| path));
            return rest;
        }
    }
    Vec::new()
}

fn prepare_destination(config: &ImportConfig) -> Result<Destination> {
    if config.mode == WriteMode::DryRun {
        return Ok(Destination::DryRun);
    }

    match &config.target {
        Target::Shared(store) => {
            let conn = store.open()?;
            let registry = match config.mode {
                WriteMode::Denormalized => Some(Arc::new(SchemaRegistry::load(
                    &conn,
                    Schema::sqlite(),
                    config.layout,
                )?)),
                _ => None,
            };
            Ok(Destination::Shared {
                store: store.clone(),
                registry,
            })
        }
        Target::PerFile { output_dir } => {
            fs::create_dir_all(output_dir)?;
            Ok(Destination::PerFile {
                output_dir: output_dir.clone(),
            })
        }
    }
}

impl ImportContext<'_> {
    fn run_worker(
        &self,
        jobs: &Receiver<Job>,
        results: &Sender<(usize, FileOutcome)>,
        failed: &AtomicBool,
    ) {
        // Shared-store connection, opened on the first job.
        let mut shared: Option<ItemWriter> = None;

        for job in jobs {
            let outcome = self.process(&job, &mut shared);
            if outcome.state == FileState::Failed {
                failed.store(true, Ordering::SeqCst);
            }
            if results.send((job.ordinal, outcome)).is_err() {
                break;
            }
        }
    }

    fn process(&self, job: &Job, shared: &mut Option<ItemWriter>) -> FileOutcome {
        let started = Instant::now();
        let mut outcome = FileOutcome::new(&job.path);
        info!(file = %job.path.display(), "Importing file");

        if let Err(err) = self.try_process(job, shared, &mut outcome) {
            error!(file = %job.path.display(), error = %err, "Import failed");
            outcome.fail(err);
        }
        outcome.duration_ms = started.elapsed().as_millis() as u64;

        if outcome.state != FileState::Failed {
            info!(
                file = %job.path.display(),
                state = %outcome.state,
                items = outcome.items,
                duration_ms = outcome.duration_ms,
                "Finished file"
            );
        }
        outcome
    }

    fn try_process(
        &self,
        job: &Job,
        shared: &mut Option<ItemWriter>,
        outcome: &mut FileOutcome,
    ) -> Result<()> {
        match &self.destination {
            Destination::DryRun => {
                let mut writer = self.configure(ItemWriter::dry_run());
                self.import_file(&mut writer, job, outcome)
            }
            Destination::Shared { store, registry } => {
                let mut writer = match shared.take() {
                    Some(writer) => writer,
                    None => self.writer_for(store.open()?, registry.clone())?,
                };
                let imported = self.import_file(&mut writer, job, outcome);
                *shared = Some(writer);
                imported
            }
            Destination::PerFile { output_dir } => self.import_shard(job, output_dir, outcome),
        }
    }

    fn import_shard(&self, job: &Job, output_dir: &Path, outcome: &mut FileOutcome) -> Result<()> {
        let config = self.config;
        let dest = shard_path(&config.source_dir, &job.path, output_dir, &config.extensions);
        let marker = recovery_marker_path(&dest);
        outcome.destination = Some(dest.clone());

        if marker.exists() {
            warn!(shard = %dest.display(), "Rebuilding unfinished shard");
            remove_database(&dest)?;
            fs::remove_file(&marker)?;
        } else if dest.exists() {
            info!(shard = %dest.display(), "Shard already complete");
            outcome.advance(FileState::Skipped);
            return Ok(());
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::File::create(&marker)?;

        let base = (job.ordinal as i64)
            .checked_mul(config.shard_id_stride)
            .ok_or_else(|| {
                ImportError::ConfigError(format!(
                    "shard id stride {} overflows for file #{}",
                    config.shard_id_stride, job.ordinal
                ))
            })?;
        let conn = StoreConfig::sqlite(&dest).open()?;
        reserve_id_block(&conn, base)?;

        let registry = match config.mode {
            WriteMode::Denormalized => Some(Arc::new(SchemaRegistry::load(
                &conn,
                Schema::sqlite(),
                config.layout,
            )?)),
            _ => None,
        };
        let mut writer = self.writer_for(conn, registry)?;
        self.import_file(&mut writer, job, outcome)?;

        // Close the shard before declaring it complete.
        drop(writer);
        fs::remove_file(&marker)?;
        Ok(())
    }

    fn writer_for(
        &self,
        conn: Connection,
        registry: Option<Arc<SchemaRegistry>>,
    ) -> Result<ItemWriter> {
        let writer = match (self.config.mode, registry) {
            (WriteMode::Normalized, _) => ItemWriter::normalized(conn),
            (WriteMode::Denormalized, Some(registry)) => ItemWriter::denormalized(conn, registry),
            (WriteMode::Denormalized, None) => {
                let registry = SchemaRegistry::load(&conn, Schema::sqlite(), self.config.layout)?;
                ItemWriter::denormalized(conn, Arc::new(registry))
            }
            (WriteMode::DryRun, _) => ItemWriter::dry_run(),
        };
        Ok(self.configure(writer))
    }

    fn configure(&self, writer: ItemWriter) -> ItemWriter {
        writer.with_progress_interval(self.config.progress_interval)
    }

    fn import_file(
        &self,
        writer: &mut ItemWriter,
        job: &Job,
        outcome: &mut FileOutcome,
    ) -> Result<()> {
        outcome.advance(FileState::Parsing);
        let input = open_input(&job.path)?;
        let mut reader = ItemReader::new(input)
            .with_origin(&job.path)
            .with_identifier_key(self.config.identifier.clone());
        let mut file = writer.register_file(&job.path)?;

        let written = write_items(writer, &mut file, &mut reader, outcome);

        let stats = reader.stats();
        outcome.lines = stats.lines;
        outcome.dropped_segments = stats.dropped_segments;
        written?;

        outcome.advance(FileState::Done);
        Ok(())
    }
}

fn write_items<R: std::io::BufRead>(
    writer: &mut ItemWriter,
    file: &mut FileRecord,
    reader: &mut ItemReader<R>,
    outcome: &mut FileOutcome,
) -> Result<()> {
    for item in reader {
        let item = item?;
        writer.write(file, &item)?;
        outcome.advance(FileState::Writing);
        outcome.items += 1;
        outcome.values += item.values.len() as u64;
    }
    Ok(())
}
