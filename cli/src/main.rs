use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};
use pica_import::{FileState, ImportConfig, ImportReport, Target, run_import};
use pica_sqlite::{Merger, RecordLayout, StoreConfig, WriteMode};
use tracing_subscriber::EnvFilter;

/// CLI-specific write mode enum with clap argument parsing support.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliMode {
    Normalized,
    Denormalized,
    DryRun,
}

impl From<CliMode> for WriteMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Normalized => Self::Normalized,
            CliMode::Denormalized => Self::Denormalized,
            CliMode::DryRun => Self::DryRun,
        }
    }
}

/// CLI-specific record layout enum with clap argument parsing support.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliLayout {
    Sharded,
    Single,
}

impl From<CliLayout> for RecordLayout {
    fn from(layout: CliLayout) -> Self {
        match layout {
            CliLayout::Sharded => Self::Sharded,
            CliLayout::Single => Self::Single,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "pica-load")]
#[command(about = "Batch loader for PICA+ (K10plus) dumps into SQLite", version)]
struct Cli {
    /// Enable debug logging (overrides RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse all dump files of a directory and write them to SQLite.
    Convert(ConvertArgs),
    /// Append per-file shard databases to one target database.
    Merge(MergeArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("target").args(["dsn", "output_file", "output_dir"])))]
struct ConvertArgs {
    /// Directory searched recursively for .pp / .pp.gz files.
    #[arg(long)]
    source_dir: Option<PathBuf>,
    /// Shared destination store as a connection string (e.g. sqlite3:k10.sqlite).
    #[arg(long)]
    dsn: Option<String>,
    /// Shared destination SQLite file.
    #[arg(long)]
    output_file: Option<PathBuf>,
    /// Directory receiving one shard database per input file.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Number of workers (0 = all CPUs; default: 1).
    #[arg(long)]
    workers: Option<usize>,
    /// How items are stored.
    #[arg(long, value_enum)]
    mode: Option<CliMode>,
    /// Record table layout in denormalized mode.
    #[arg(long, value_enum)]
    layout: Option<CliLayout>,
    /// YAML import configuration; command-line flags take precedence.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write the run report as JSON to this file.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct MergeArgs {
    /// Directory searched recursively for shard databases.
    #[arg(long)]
    source_dir: PathBuf,
    /// Target database file.
    #[arg(long)]
    target: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Convert(args) => run_convert(args),
        Command::Merge(args) => run_merge(args),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// convert command
// ---------------------------------------------------------------------------

fn run_convert(args: ConvertArgs) -> Result<(), String> {
    let config = build_import_config(&args)?;
    let report = run_import(&config).map_err(|e| format!("Import failed: {e}"))?;

    if let Some(path) = &args.report {
        report
            .save_json(path)
            .map_err(|e| format!("Failed to write report '{}': {e}", path.display()))?;
    }

    print_import_summary(&report);

    if report.is_success() {
        Ok(())
    } else {
        Err(format!(
            "{} of {} files failed, {} not started",
            report.count(FileState::Failed),
            report.files.len() + report.not_dispatched.len(),
            report.not_dispatched.len()
        ))
    }
}

/// Merges the YAML configuration (if any) with command-line overrides.
fn build_import_config(args: &ConvertArgs) -> Result<ImportConfig, String> {
    let target = if let Some(dsn) = &args.dsn {
        Some(Target::from_dsn(dsn).map_err(|e| e.to_string())?)
    } else if let Some(file) = &args.output_file {
        Some(Target::Shared(StoreConfig::sqlite(file)))
    } else {
        args.output_dir.as_ref().map(|dir| Target::PerFile {
            output_dir: dir.clone(),
        })
    };

    let mut config = match &args.config {
        Some(path) => ImportConfig::load(path)
            .map_err(|e| format!("Failed to load config '{}': {e}", path.display()))?,
        None => {
            let source_dir = args
                .source_dir
                .clone()
                .ok_or("--source-dir is required unless --config is given")?;
            let target = target
                .clone()
                .ok_or("one of --dsn, --output-file or --output-dir is required")?;
            ImportConfig::new(source_dir, target)
        }
    };

    if let Some(source_dir) = &args.source_dir {
        config.source_dir = source_dir.clone();
    }
    if let Some(target) = target {
        config.target = target;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(mode) = args.mode {
        config.mode = mode.into();
    }
    if let Some(layout) = args.layout {
        config.layout = layout.into();
    }
    Ok(config)
}

fn print_import_summary(report: &ImportReport) {
    println!("Import Summary:");
    println!("  Files: {}", report.files.len() + report.not_dispatched.len());
    println!("  Imported: {}", report.count(FileState::Done));
    println!("  Skipped: {} (complete shards)", report.count(FileState::Skipped));
    println!("  Failed: {}", report.count(FileState::Failed));
    println!("  Items: {}", report.total_items());
    println!("  Values: {}", report.total_values());
    if let Some(ms) = report.duration_ms() {
        println!("  Duration: {:.1}s", ms as f64 / 1000.0);
    }

    if !report.is_success() {
        eprintln!("\nFailures:");
        for outcome in report.failures() {
            eprintln!(
                "  {}: {}",
                outcome.path.display(),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
        for path in &report.not_dispatched {
            eprintln!("  {}: not started", path.display());
        }
    }
}

// ---------------------------------------------------------------------------
// merge command
// ---------------------------------------------------------------------------

fn run_merge(args: MergeArgs) -> Result<(), String> {
    let mut merger = Merger::open(&args.target)
        .map_err(|e| format!("Failed to open target '{}': {e}", args.target.display()))?;
    let report = merger
        .merge_dir(&args.source_dir)
        .map_err(|e| format!("Merge failed: {e}"))?;

    println!("Merge Summary:");
    println!("  Shards merged: {}", report.shards.len());
    println!("  Shards skipped: {} (unfinished)", report.skipped.len());
    println!("  Shards failed: {}", report.failures.len());
    println!("  Items: {}", report.total_items());
    println!("  Values: {}", report.total_values());

    if report.is_success() {
        return Ok(());
    }
    eprintln!("\nFailures:");
    for failure in &report.failures {
        eprintln!("  {}: {}", failure.path.display(), failure.error);
    }
    Err(format!("{} shards could not be merged", report.failures.len()))
}
