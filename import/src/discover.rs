//! Input discovery and opening.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use pica_sqlite::SHARD_EXTENSION;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::Result;

/// Read buffer per input file.
const INPUT_BUFFER_SIZE: usize = 1 << 20;

/// Returns the configured suffix `path`'s file name ends with, if any.
///
/// The longest matching suffix wins, so `pp.gz` beats `gz`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use pica_import::matching_extension;
///
/// let extensions = vec!["pp".to_string(), "pp.gz".to_string()];
/// assert_eq!(matching_extension(Path::new("a/b.pp"), &extensions), Some("pp"));
/// assert_eq!(matching_extension(Path::new("b.pp.gz"), &extensions), Some("pp.gz"));
/// assert_eq!(matching_extension(Path::new("b.ppx"), &extensions), None);
/// ```
pub fn matching_extension<'a>(path: &Path, extensions: &'a [String]) -> Option<&'a str> {
    let name = path.file_name()?.to_str()?;
    extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.'))
        .filter(|ext| !ext.is_empty())
        .filter(|ext| {
            name.len() > ext.len() + 1
                && name.ends_with(ext)
                && name[..name.len() - ext.len()].ends_with('.')
        })
        .max_by_key(|ext| ext.len())
}

/// Lists input files below `dir`, recursively, sorted by file name.
///
/// # Errors
///
/// Returns [`IoError`](crate::ImportError::IoError) if the directory tree
/// cannot be read.
pub fn discover_inputs(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && matching_extension(entry.path(), extensions).is_some() {
            inputs.push(entry.into_path());
        }
    }
    debug!(dir = %dir.display(), files = inputs.len(), "Discovered inputs");
    Ok(inputs)
}

/// Opens an input file for line reading; `.gz` files are decompressed.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    let gzipped = path.extension().is_some_and(|ext| ext == "gz");
    if gzipped {
        Ok(Box::new(BufReader::with_capacity(
            INPUT_BUFFER_SIZE,
            MultiGzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(INPUT_BUFFER_SIZE, file)))
    }
}

/// Returns the shard database for `input` below `output_dir`.
///
/// The path relative to `source_dir` is kept; the input suffix is replaced
/// by `.sqlite`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use pica_import::shard_path;
///
/// let extensions = vec!["pp".to_string(), "pp.gz".to_string()];
/// let shard = shard_path(
///     Path::new("dumps"),
///     Path::new("dumps/2024/part1.pp.gz"),
///     Path::new("out"),
///     &extensions,
/// );
/// assert_eq!(shard, Path::new("out/2024/part1.sqlite"));
/// ```
pub fn shard_path(
    source_dir: &Path,
    input: &Path,
    output_dir: &Path,
    extensions: &[String],
) -> PathBuf {
    let relative = input
        .strip_prefix(source_dir)
        .ok()
        .filter(|rel| rel.file_name().is_some())
        .or_else(|| input.file_name().map(Path::new))
        .unwrap_or(input);

    let name = relative
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match matching_extension(relative, extensions) {
        Some(ext) => name[..name.len() - ext.len() - 1].to_string(),
        None => name,
    };

    let mut shard = output_dir.join(relative);
    shard.set_file_name(format!("{stem}.{SHARD_EXTENSION}"));
    shard
}
