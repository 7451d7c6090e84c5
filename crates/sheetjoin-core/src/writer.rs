//! File-backed writers for merged output

use crate::error::{Error, Result};
use crate::sink::{CellSink, GridSink, TableWriter};
use crate::table::MergedTable;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Write a table as CSV; empty cells become empty fields
pub fn write_csv<W: Write>(table: &MergedTable, out: W) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row.cells.iter().map(|c| c.as_deref().unwrap_or("")))?;
    }
    writer.flush()?;
    Ok(())
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

/// Writes a merged table to a CSV file
#[derive(Debug, Clone)]
pub struct CsvTableWriter {
    path: PathBuf,
}

impl CsvTableWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TableWriter for CsvTableWriter {
    fn write_table(&mut self, table: &MergedTable) -> Result<Option<PathBuf>> {
        let file = create(&self.path)?;
        write_csv(table, file).map_err(|e| Error::Csv {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(Some(self.path.clone()))
    }
}

/// Writes a merged table to a pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct JsonTableWriter {
    path: PathBuf,
}

impl JsonTableWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TableWriter for JsonTableWriter {
    fn write_table(&mut self, table: &MergedTable) -> Result<Option<PathBuf>> {
        let mut file = create(&self.path)?;
        serde_json::to_writer_pretty(&mut file, table)?;
        writeln!(file)?;
        file.flush()?;
        Ok(Some(self.path.clone()))
    }
}

/// Cell sink that buffers the grid and writes it as CSV on `finish`
///
/// CSV cannot be written out of order, and the direct strategy writes every
/// key cell before any value, so the whole grid lives in memory until the
/// merge completes. The direct strategy's memory bound covers the engine
/// only; with this sink peak memory is that of a materialized table. A sink
/// that writes cells in place keeps the bound. Nothing is written if the
/// merge is abandoned.
#[derive(Debug)]
pub struct CsvGridSink {
    path: PathBuf,
    grid: GridSink,
}

impl CsvGridSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            grid: GridSink::new(),
        }
    }
}

impl CellSink for CsvGridSink {
    fn begin(&mut self, headers: &[String], rows: usize) -> Result<()> {
        self.grid.begin(headers, rows)
    }

    fn write_cell(&mut self, row: usize, column: usize, value: Option<&str>) -> Result<()> {
        self.grid.write_cell(row, column, value)
    }

    fn finish(&mut self) -> Result<Option<PathBuf>> {
        let table = std::mem::take(&mut self.grid).into_table();
        CsvTableWriter::new(self.path.clone()).write_table(&table)
    }
}
