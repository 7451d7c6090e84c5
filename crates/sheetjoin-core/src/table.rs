//! Core table types: selections, sheet headers, rows and the merged output

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the leading output column holding the join key
pub const KEY_COLUMN: &str = "Key";

/// A workbook chosen for merging, with the subset of its sheets to include
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSelection {
    /// Full path to the workbook
    pub file_path: PathBuf,
    /// File name including extension (e.g., "sales.xlsx")
    pub file_name: String,
    /// Every sheet the workbook exposes, in workbook order
    pub available_sheets: Vec<String>,
    /// Sheets chosen for the merge, always a subset of `available_sheets`
    selected_sheets: Vec<String>,
}

impl FileSelection {
    /// Create a selection with every available sheet selected
    pub fn new(file_path: impl Into<PathBuf>, available_sheets: Vec<String>) -> Self {
        let file_path = file_path.into();
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.to_string_lossy().into_owned());
        Self {
            file_path,
            file_name,
            selected_sheets: available_sheets.clone(),
            available_sheets,
        }
    }

    /// Create a selection with an explicit sheet subset
    pub fn with_sheets<S: AsRef<str>>(
        file_path: impl Into<PathBuf>,
        available_sheets: Vec<String>,
        selected: &[S],
    ) -> Result<Self> {
        let mut selection = Self::new(file_path, available_sheets);
        selection.select(selected)?;
        Ok(selection)
    }

    /// Replace the selected sheets, keeping workbook order
    ///
    /// Every name must be one of `available_sheets`.
    pub fn select<S: AsRef<str>>(&mut self, sheets: &[S]) -> Result<()> {
        let unknown: Vec<&str> = sheets
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| !self.available_sheets.iter().any(|a| a == s))
            .collect();
        if !unknown.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "sheet(s) {} not available in '{}'",
                unknown.join(", "),
                self.file_name
            )));
        }

        self.selected_sheets = self
            .available_sheets
            .iter()
            .filter(|a| sheets.iter().any(|s| s.as_ref() == a.as_str()))
            .cloned()
            .collect();
        Ok(())
    }

    /// Sheets chosen for the merge
    pub fn selected_sheets(&self) -> &[String] {
        &self.selected_sheets
    }

    /// File name without its extension, used to prefix output columns
    pub fn base_name(&self) -> String {
        base_name(&self.file_path)
    }
}

/// File stem of a path, falling back to the full file name
pub(crate) fn base_name(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Header row of one sheet, original casing and order preserved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetHeaders {
    pub file_name: String,
    pub sheet_name: String,
    pub headers: Vec<String>,
}

impl SheetHeaders {
    pub fn new(
        file_name: impl Into<String>,
        sheet_name: impl Into<String>,
        headers: Vec<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            sheet_name: sheet_name.into(),
            headers,
        }
    }

    /// Only sheets with at least one header take part in a merge
    pub fn is_eligible(&self) -> bool {
        !self.headers.is_empty()
    }
}

/// A row of data, one cell per header position
///
/// Values are opaque text; `None` is an empty cell. Cells line up with the
/// header list the row was read against, so two headers with the same text
/// keep separate values. A row may be shorter than its header list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    cells: Vec<Option<String>>,
}

impl Row {
    /// Create a new empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from values in header order
    pub fn from_values<V: Into<String>>(values: impl IntoIterator<Item = Option<V>>) -> Self {
        Self {
            cells: values.into_iter().map(|v| v.map(Into::into)).collect(),
        }
    }

    /// Append the next cell
    pub fn push(&mut self, value: Option<String>) {
        self.cells.push(value);
    }

    /// Get a cell value by header position; missing and empty cells are `None`
    pub fn get(&self, column: usize) -> Option<&str> {
        self.cells.get(column).and_then(|v| v.as_deref())
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Check if the row has no cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// A sheet loaded in full
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetData {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

/// The joined output table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedTable {
    /// Output column names, `Key` first
    pub headers: Vec<String>,
    /// Rows in key order; every row is exactly `headers.len()` wide
    pub rows: Vec<MergedRow>,
}

impl MergedTable {
    /// Create a table with headers and no rows
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Get the number of columns
    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Position of an output column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Get a cell value by row position and column name
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// All rows produced for one key, in occurrence order
    pub fn rows_for_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a MergedRow> + 'a {
        self.rows.iter().filter(move |r| r.key() == Some(key))
    }
}

/// One output row, aligned with `MergedTable::headers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRow {
    pub cells: Vec<Option<String>>,
}

impl MergedRow {
    /// Create a row of `width` empty cells
    pub fn empty(width: usize) -> Self {
        Self {
            cells: vec![None; width],
        }
    }

    /// The key value (first cell)
    pub fn key(&self) -> Option<&str> {
        self.get(0)
    }

    /// Get a cell value by column index
    pub fn get(&self, index: usize) -> Option<&str> {
        self.cells.get(index).and_then(|c| c.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_selection_defaults_to_all_sheets() {
        let selection = FileSelection::new("/data/sales.xlsx", sheets(&["Q1", "Q2"]));
        assert_eq!(selection.file_name, "sales.xlsx");
        assert_eq!(selection.base_name(), "sales");
        assert_eq!(selection.selected_sheets(), &["Q1", "Q2"]);
    }

    #[test]
    fn test_selection_rejects_unknown_sheet() {
        let mut selection = FileSelection::new("sales.xlsx", sheets(&["Q1", "Q2"]));
        let err = selection.select(&["Q3"]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        // Selection is left untouched on failure
        assert_eq!(selection.selected_sheets().len(), 2);
    }

    #[test]
    fn test_selection_keeps_workbook_order() {
        let selection =
            FileSelection::with_sheets("sales.xlsx", sheets(&["Q1", "Q2", "Q3"]), &["Q3", "Q1"])
                .unwrap();
        assert_eq!(selection.selected_sheets(), &["Q1", "Q3"]);
    }

    #[test]
    fn test_row_get_flattens_empty_cells() {
        let row = Row::from_values([Some("1"), None]);
        assert_eq!(row.get(0), Some("1"));
        assert_eq!(row.get(1), None);
        assert_eq!(row.get(5), None);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_merged_table_lookup() {
        let mut table = MergedTable::new(sheets(&[KEY_COLUMN, "a:S:Name"]));
        table.rows.push(MergedRow {
            cells: vec![Some("1".to_string()), Some("Ann".to_string())],
        });
        table.rows.push(MergedRow::empty(2));

        assert_eq!(table.column_count(), 2);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.value(0, "a:S:Name"), Some("Ann"));
        assert_eq!(table.value(1, "a:S:Name"), None);
        assert_eq!(table.rows_for_key("1").count(), 1);
    }
}
