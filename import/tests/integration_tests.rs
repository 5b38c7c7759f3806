//! Integration tests for the pica-import crate.

use std::fs;
use std::io::Write;
use std::path::Path;

use pica_import::{FileState, ImportConfig, ImportError, Target, run_import};
use pica_sqlite::{
    FILE_TABLE, ITEM_TABLE, Merger, RecordLayout, StoreConfig, VALUE_TABLE, WriteMode, count_rows,
    recovery_marker_path,
};
use rusqlite::Connection;

const GS: char = '\u{1D}';
const RS: char = '\u{1E}';
const US: char = '\u{1F}';

/// Renders a dump with one item per identifier, three values each.
fn dump(identifiers: &[&str]) -> String {
    let mut text = String::new();
    for id in identifiers {
        text.push_str(&format!("{GS}\n"));
        text.push_str(&format!("{RS}003@ {US}0{id}\n"));
        text.push_str(&format!("{RS}021A {US}aTitle {id}{US}dSubtitle\n"));
    }
    text
}

fn write_inputs(dir: &Path) {
    fs::create_dir_all(dir.join("2024")).unwrap();
    fs::write(dir.join("a.pp"), dump(&["1", "2"])).unwrap();
    fs::write(dir.join("b.pp"), dump(&["3"])).unwrap();
    fs::write(dir.join("2024").join("c.pp"), dump(&["4", "5", "6"])).unwrap();
    fs::write(dir.join("readme.txt"), "not an input").unwrap();
}

fn open(path: &Path) -> Connection {
    StoreConfig::sqlite(path).open().unwrap()
}

fn per_file(source: &Path, output: &Path) -> ImportConfig {
    ImportConfig::new(
        source,
        Target::PerFile {
            output_dir: output.to_path_buf(),
        },
    )
    .with_workers(2)
}

fn shard_counts(output: &Path) -> Vec<(u64, u64)> {
    ["a.sqlite", "b.sqlite", "2024/c.sqlite"]
        .iter()
        .map(|name| {
            let conn = open(&output.join(name));
            (
                count_rows(&conn, ITEM_TABLE).unwrap(),
                count_rows(&conn, VALUE_TABLE).unwrap(),
            )
        })
        .collect()
}

#[test]
fn test_per_file_import_creates_shards() {
    let dir = tempfile::tempdir().unwrap();
    let (source, output) = (dir.path().join("in"), dir.path().join("out"));
    write_inputs(&source);

    let report = run_import(&per_file(&source, &output)).unwrap();

    assert!(report.is_success());
    assert_eq!(report.files.len(), 3);
    assert_eq!(report.count(FileState::Done), 3);
    assert_eq!(report.total_items(), 6);
    assert_eq!(report.total_values(), 18);
    assert_eq!(shard_counts(&output), vec![(2, 6), (1, 3), (3, 9)]);

    for name in ["a.sqlite", "b.sqlite", "2024/c.sqlite"] {
        assert!(!recovery_marker_path(&output.join(name)).exists());
    }
}

#[test]
fn test_per_file_rerun_skips_complete_shards() {
    let dir = tempfile::tempdir().unwrap();
    let (source, output) = (dir.path().join("in"), dir.path().join("out"));
    write_inputs(&source);
    let config = per_file(&source, &output);

    run_import(&config).unwrap();
    let before = shard_counts(&output);

    let report = run_import(&config).unwrap();
    assert!(report.is_success());
    assert_eq!(report.count(FileState::Skipped), 3);
    assert_eq!(report.total_items(), 0);
    assert_eq!(shard_counts(&output), before);
}

#[test]
fn test_per_file_recovers_interrupted_shard() {
    let dir = tempfile::tempdir().unwrap();
    let (source, output) = (dir.path().join("in"), dir.path().join("out"));
    write_inputs(&source);
    let config = per_file(&source, &output);

    run_import(&config).unwrap();
    let before = shard_counts(&output);

    // Simulate a crash while c.pp was written: marker present, shard partial.
    let shard = output.join("2024").join("c.sqlite");
    {
        let conn = open(&shard);
        conn.execute_batch("DELETE FROM k10_value WHERE id % 2 = 0")
            .unwrap();
    }
    fs::write(recovery_marker_path(&shard), b"").unwrap();

    let report = run_import(&config).unwrap();
    assert!(report.is_success());
    assert_eq!(report.count(FileState::Skipped), 2);
    assert_eq!(report.count(FileState::Done), 1);
    assert_eq!(report.total_items(), 3);
    assert!(!recovery_marker_path(&shard).exists());
    assert_eq!(shard_counts(&output), before);
}

#[test]
fn test_per_file_shards_merge_without_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let (source, output) = (dir.path().join("in"), dir.path().join("out"));
    write_inputs(&source);
    run_import(&per_file(&source, &output)).unwrap();

    let target = dir.path().join("all.sqlite");
    let mut merger = Merger::open(&target).unwrap();
    let report = merger.merge_dir(&output).unwrap();

    assert!(report.is_success());
    assert_eq!(report.shards.len(), 3);
    let conn = merger.connection();
    assert_eq!(count_rows(conn, FILE_TABLE).unwrap(), 3);
    assert_eq!(count_rows(conn, ITEM_TABLE).unwrap(), 6);
    assert_eq!(count_rows(conn, VALUE_TABLE).unwrap(), 18);

    let orphans: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM k10_value v LEFT JOIN k10_item i ON i.id = v.item_id
             WHERE i.id IS NULL",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);
}

#[test]
fn test_shared_store_with_concurrent_workers() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("in");
    write_inputs(&source);
    let store = dir.path().join("k10.sqlite");

    let config = ImportConfig::new(
        &source,
        Target::from_dsn(&format!("sqlite3:{}", store.display())).unwrap(),
    )
    .with_workers(3);
    let report = run_import(&config).unwrap();

    assert!(report.is_success());
    assert_eq!(report.workers, 3);
    let conn = open(&store);
    assert_eq!(count_rows(&conn, FILE_TABLE).unwrap(), 3);
    assert_eq!(count_rows(&conn, ITEM_TABLE).unwrap(), 6);
    assert_eq!(count_rows(&conn, VALUE_TABLE).unwrap(), 18);
    let counted: i64 = conn
        .query_row("SELECT SUM(item_count) FROM k10_file", [], |row| row.get(0))
        .unwrap();
    assert_eq!(counted, 6);
}

#[test]
fn test_shared_store_denormalized() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("in");
    write_inputs(&source);
    let store = dir.path().join("k10.sqlite");

    let config = ImportConfig::new(&source, Target::Shared(StoreConfig::sqlite(&store)))
        .with_workers(0)
        .with_mode(WriteMode::Denormalized)
        .with_layout(RecordLayout::Sharded);
    let report = run_import(&config).unwrap();
    assert!(report.is_success(), "{report:?}");

    let conn = open(&store);
    assert_eq!(count_rows(&conn, "k10_record_00").unwrap(), 6);
    assert_eq!(count_rows(&conn, "k10_record_02").unwrap(), 6);
    let title: String = conn
        .query_row(
            r#"SELECT "021Aa" FROM k10_record_02 WHERE identifier = '5'"#,
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(title, "Title 5");
}

#[test]
fn test_dry_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (source, output) = (dir.path().join("in"), dir.path().join("out"));
    write_inputs(&source);

    let config = per_file(&source, &output).with_mode(WriteMode::DryRun);
    let report = run_import(&config).unwrap();

    assert!(report.is_success());
    assert_eq!(report.total_items(), 6);
    assert!(!output.exists());
}

#[test]
fn test_gzip_input() {
    let dir = tempfile::tempdir().unwrap();
    let (source, output) = (dir.path().join("in"), dir.path().join("out"));
    fs::create_dir_all(&source).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(
        fs::File::create(source.join("z.pp.gz")).unwrap(),
        flate2::Compression::default(),
    );
    encoder.write_all(dump(&["1", "2"]).as_bytes()).unwrap();
    encoder.finish().unwrap();

    let report = run_import(&per_file(&source, &output)).unwrap();
    assert!(report.is_success());
    let conn = open(&output.join("z.sqlite"));
    assert_eq!(count_rows(&conn, ITEM_TABLE).unwrap(), 2);
}

#[test]
fn test_inputs_sharing_a_shard_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (source, output) = (dir.path().join("in"), dir.path().join("out"));
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("a.pp"), dump(&["1"])).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(
        fs::File::create(source.join("a.pp.gz")).unwrap(),
        flate2::Compression::default(),
    );
    encoder.write_all(dump(&["2", "3"]).as_bytes()).unwrap();
    encoder.finish().unwrap();

    let err = run_import(&per_file(&source, &output).with_workers(1)).unwrap_err();
    assert!(matches!(err, ImportError::ConfigError(ref msg) if msg.contains("a.sqlite")), "{err}");
    assert!(!output.join("a.sqlite").exists());

    // Without shards there is nothing to collide.
    let dry_run = per_file(&source, &output).with_mode(WriteMode::DryRun);
    let report = run_import(&dry_run).unwrap();
    assert_eq!(report.total_items(), 3);
}

#[test]
fn test_in_memory_shared_target_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("in");
    write_inputs(&source);

    let config =
        ImportConfig::new(&source, Target::from_dsn("sqlite3::memory:").unwrap()).with_workers(2);
    assert!(matches!(run_import(&config), Err(ImportError::ConfigError(_))));
}

#[test]
fn test_failed_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (source, output) = (dir.path().join("in"), dir.path().join("out"));
    fs::create_dir_all(&source).unwrap();
    // Duplicate identifiers violate the record tables' unique constraint.
    fs::write(source.join("a.pp"), dump(&["1", "1"])).unwrap();
    fs::write(source.join("b.pp"), dump(&["2"])).unwrap();

    let config = per_file(&source, &output)
        .with_workers(1)
        .with_mode(WriteMode::Denormalized);
    let report = run_import(&config).unwrap();

    assert!(!report.is_success());
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].path.ends_with("a.pp"));
    assert_eq!(failures[0].items, 1);
    assert!(failures[0].error.is_some());
    // The failed shard keeps its marker and is rebuilt on the next run.
    assert!(recovery_marker_path(&output.join("a.sqlite")).exists());
}

#[test]
fn test_invalid_source_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = per_file(&dir.path().join("missing"), &dir.path().join("out"));
    assert!(run_import(&config).is_err());
}
