//! Error types for sheetjoin-core

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sheetjoin-core
#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied an unusable argument (blank key, empty selection, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// One or more input files could not be read
    #[error("failed to read {} file(s):\n{}", .0.len(), list_lines(.0))]
    ReadFailures(Vec<FileFailure>),

    /// The key column is absent from one or more selected sheets
    #[error(
        "key column '{key}' not found in {} sheet(s): {}",
        .sheets.len(),
        list_inline(.sheets)
    )]
    MissingKeyColumn { key: String, sheets: Vec<SheetRef> },

    /// The merge was cancelled by the caller
    #[error("merge cancelled")]
    Cancelled,

    /// A merge is already running in this session
    #[error("a merge is already in progress")]
    MergeInProgress,

    /// Requested sheet does not exist in the workbook
    #[error("sheet '{sheet}' not found in '{path}'")]
    SheetNotFound { path: PathBuf, sheet: String },

    /// File extension is not a supported workbook format
    #[error("unsupported workbook format: '{path}'")]
    UnsupportedFormat { path: PathBuf },

    /// Two reads of the same sheet disagreed
    #[error("sheet '{sheet}' in '{path}' changed between passes: {message}")]
    InconsistentSource {
        path: PathBuf,
        sheet: String,
        message: String,
    },

    /// A sink write addressed a cell outside the declared grid
    #[error("cell ({row}, {column}) is outside the sink grid")]
    CellOutOfBounds { row: usize, column: usize },

    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV parsing error from the csv crate
    #[error("CSV error in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Spreadsheet error from calamine
    #[error("spreadsheet error in '{path}': {source}")]
    Spreadsheet {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    /// Directory traversal error
    #[error("failed to traverse directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when the error is a user cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// A single file that failed during a read phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

impl FileFailure {
    pub fn new(path: impl Into<PathBuf>, error: &Error) -> Self {
        Self {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// A `file:sheet` pair used in aggregated reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRef {
    pub file_name: String,
    pub sheet_name: String,
}

impl SheetRef {
    pub fn new(file_name: impl Into<String>, sheet_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            sheet_name: sheet_name.into(),
        }
    }
}

impl fmt::Display for SheetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_name, self.sheet_name)
    }
}

fn list_lines<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("  {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn list_inline<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_lists_every_sheet() {
        let err = Error::MissingKeyColumn {
            key: "id".to_string(),
            sheets: vec![SheetRef::new("a.xlsx", "One"), SheetRef::new("b.xlsx", "Two")],
        };
        let message = err.to_string();
        assert!(message.contains("a.xlsx:One"));
        assert!(message.contains("b.xlsx:Two"));
        assert!(message.contains("2 sheet(s)"));
    }

    #[test]
    fn test_read_failures_lists_every_file() {
        let err = Error::ReadFailures(vec![
            FileFailure {
                path: PathBuf::from("x.csv"),
                message: "boom".to_string(),
            },
            FileFailure {
                path: PathBuf::from("y.csv"),
                message: "bang".to_string(),
            },
        ]);
        let message = err.to_string();
        assert!(message.contains("x.csv: boom"));
        assert!(message.contains("y.csv: bang"));
    }

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::InvalidArgument("key".to_string()).is_cancelled());
    }
}
