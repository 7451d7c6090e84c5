//! Input discovery: find workbooks on disk and import their sheet lists

use crate::error::{Error, FileFailure, Result};
use crate::reader::WorkbookReader;
use crate::spreadsheet::is_supported;
use crate::table::FileSelection;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Result of scanning input roots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Roots that were scanned
    pub roots: Vec<PathBuf>,
    /// Supported workbook files, sorted by path
    pub files: Vec<PathBuf>,
}

impl ScanResult {
    pub fn total_files(&self) -> usize {
        self.files.len()
    }
}

/// Collect supported workbook files under each root
///
/// Directories are walked recursively. A root that is itself a file is kept
/// as long as its extension is supported. Unreadable entries below a root
/// are skipped with a warning; a root that cannot be read is an error.
pub fn scan_inputs<P: AsRef<Path>>(roots: &[P]) -> Result<ScanResult> {
    let mut files = Vec::new();

    for root in roots {
        let root = root.as_ref();

        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(Error::WalkDir(e)),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().is_file() && is_supported(path) && !is_lock_file(path) {
                files.push(path.to_path_buf());
            }
        }
    }

    files.sort();
    files.dedup();
    debug!(files = files.len(), "scan complete");

    Ok(ScanResult {
        roots: roots.iter().map(|r| r.as_ref().to_path_buf()).collect(),
        files,
    })
}

/// Office lock files (`~$book.xlsx`) share the workbook extension
fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("~$"))
}

/// List the sheets of every file and select those with a header row
///
/// Files are read in parallel. Every file that fails is reported in a single
/// [`Error::ReadFailures`].
pub fn import_selections<P>(paths: &[P], reader: &dyn WorkbookReader) -> Result<Vec<FileSelection>>
where
    P: AsRef<Path> + Sync,
{
    let results: Vec<Result<FileSelection>> = paths
        .par_iter()
        .map(|path| import_one(path.as_ref(), reader))
        .collect();

    let mut selections = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (path, result) in paths.iter().zip(results) {
        match result {
            Ok(selection) => selections.push(selection),
            Err(e) => {
                warn!(path = %path.as_ref().display(), error = %e, "failed to import workbook");
                failures.push(FileFailure::new(path.as_ref(), &e));
            }
        }
    }

    if failures.is_empty() {
        Ok(selections)
    } else {
        Err(Error::ReadFailures(failures))
    }
}

fn import_one(path: &Path, reader: &dyn WorkbookReader) -> Result<FileSelection> {
    let sheets = reader.list_sheets(path)?;
    let available: Vec<String> = sheets.iter().map(|s| s.sheet_name.clone()).collect();
    let eligible: Vec<&str> = sheets
        .iter()
        .filter(|s| s.is_eligible())
        .map(|s| s.sheet_name.as_str())
        .collect();
    debug!(
        path = %path.display(),
        sheets = available.len(),
        selected = eligible.len(),
        "imported workbook"
    );
    FileSelection::with_sheets(path, available, &eligible)
}
