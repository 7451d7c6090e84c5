//! Output contracts: whole-table writers and cell-addressed sinks

use crate::error::{Error, Result};
use crate::table::{MergedRow, MergedTable};
use std::path::PathBuf;

/// Persists a fully materialized table (batch and streaming strategies)
pub trait TableWriter {
    /// Write the table, returning where it ended up if it has a location
    fn write_table(&mut self, table: &MergedTable) -> Result<Option<PathBuf>>;
}

/// Cell-addressed destination used by the direct-to-sink strategy
///
/// Row indices are 0-based data rows; the header row is handed over in
/// [`CellSink::begin`]. Sinks do not default cells: every cell of the grid is
/// written explicitly by the engine.
pub trait CellSink {
    /// Declare the header row and the number of data rows
    fn begin(&mut self, headers: &[String], rows: usize) -> Result<()>;

    /// Write a single cell; `None` is an empty cell
    fn write_cell(&mut self, row: usize, column: usize, value: Option<&str>) -> Result<()>;

    /// Persist the grid, returning its final location if it has one
    fn finish(&mut self) -> Result<Option<PathBuf>>;
}

/// In-memory cell grid
///
/// Tracks which cells were never written so callers can verify that a
/// producer filled the whole grid.
#[derive(Debug, Default)]
pub struct GridSink {
    headers: Vec<String>,
    rows: usize,
    cells: Vec<Option<Option<String>>>,
}

impl GridSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn width(&self) -> usize {
        self.headers.len()
    }

    /// Cells not yet written
    pub fn unwritten_cells(&self) -> usize {
        self.cells.iter().filter(|c| c.is_none()).count()
    }

    /// Read back a written cell
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        if column >= self.width() {
            return None;
        }
        self.cells
            .get(row * self.width() + column)
            .and_then(|c| c.as_ref())
            .and_then(|v| v.as_deref())
    }

    /// Convert the grid to a table; unwritten cells become empty
    pub fn into_table(self) -> MergedTable {
        let width = self.headers.len();
        let mut table = MergedTable::new(self.headers);
        if width == 0 {
            return table;
        }
        let mut cells = self.cells.into_iter().map(Option::flatten);
        for _ in 0..self.rows {
            table.rows.push(MergedRow {
                cells: cells.by_ref().take(width).collect(),
            });
        }
        table
    }
}

impl CellSink for GridSink {
    fn begin(&mut self, headers: &[String], rows: usize) -> Result<()> {
        self.headers = headers.to_vec();
        self.rows = rows;
        self.cells = vec![None; rows * headers.len()];
        Ok(())
    }

    fn write_cell(&mut self, row: usize, column: usize, value: Option<&str>) -> Result<()> {
        if row >= self.rows || column >= self.width() {
            return Err(Error::CellOutOfBounds { row, column });
        }
        let idx = row * self.width() + column;
        self.cells[idx] = Some(value.map(str::to_string));
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Replay a materialized table into a cell sink, row by row
pub fn copy_to_sink(table: &MergedTable, sink: &mut dyn CellSink) -> Result<Option<PathBuf>> {
    sink.begin(&table.headers, table.row_count())?;
    for (r, row) in table.rows.iter().enumerate() {
        for (c, cell) in row.cells.iter().enumerate() {
            sink.write_cell(r, c, cell.as_deref())?;
        }
    }
    sink.finish()
}
