//! CSV workbook reader
//!
//! A CSV file is treated as a workbook with exactly one sheet, named after
//! the file stem.

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::reader::{display_file_name, project_columns, RowStream, WorkbookReader};
use crate::table::{base_name, Row, SheetData, SheetHeaders};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Reads `.csv` files through the csv crate
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvWorkbookReader;

impl CsvWorkbookReader {
    pub fn new() -> Self {
        Self
    }

    fn open(path: &Path) -> Result<csv::Reader<BufReader<File>>> {
        let file = File::open(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(csv_reader(BufReader::new(file)))
    }

    fn check_sheet(path: &Path, sheet: &str) -> Result<()> {
        if base_name(path) == sheet {
            Ok(())
        } else {
            Err(Error::SheetNotFound {
                path: path.to_path_buf(),
                sheet: sheet.to_string(),
            })
        }
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true) // Allow varying number of fields
        .from_reader(reader)
}

fn read_headers<R: Read>(reader: &mut csv::Reader<R>, path: &Path) -> Result<Vec<String>> {
    let headers = reader.headers().map_err(|e| Error::Csv {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(headers.iter().map(str::to_string).collect())
}

/// Convert a record to a row holding the fields at `columns`
///
/// Fields past the end of a short record are empty; empty fields become `None`.
fn record_to_row(record: &csv::StringRecord, columns: &[usize]) -> Row {
    Row::from_values(
        columns
            .iter()
            .map(|&idx| record.get(idx).filter(|field| !field.is_empty())),
    )
}

/// Parse CSV from any reader into headers and rows
fn parse_csv_reader<R: Read>(reader: R, path: &Path) -> Result<SheetData> {
    let mut csv_reader = csv_reader(reader);
    let headers = read_headers(&mut csv_reader, path)?;
    let columns: Vec<usize> = (0..headers.len()).collect();

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result.map_err(|e| Error::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
        rows.push(record_to_row(&record, &columns));
    }

    Ok(SheetData { headers, rows })
}

/// Parse a CSV file into headers and rows
pub fn parse_csv<P: AsRef<Path>>(path: P) -> Result<SheetData> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_csv_reader(BufReader::new(file), path)
}

/// Parse CSV from a string (useful for testing)
pub fn parse_csv_str(content: &str, source_name: &str) -> Result<SheetData> {
    parse_csv_reader(content.as_bytes(), Path::new(source_name))
}

impl WorkbookReader for CsvWorkbookReader {
    fn list_sheets(&self, path: &Path) -> Result<Vec<SheetHeaders>> {
        let mut reader = Self::open(path)?;
        let headers = read_headers(&mut reader, path)?;
        Ok(vec![SheetHeaders::new(
            display_file_name(path),
            base_name(path),
            headers,
        )])
    }

    fn load_sheet(&self, path: &Path, sheet: &str) -> Result<SheetData> {
        Self::check_sheet(path, sheet)?;
        parse_csv(path)
    }

    fn stream_rows<'a>(
        &'a self,
        path: &Path,
        sheet: &str,
        headers: &[String],
        chunk_size: usize,
        cancel: &CancellationToken,
    ) -> Result<RowStream<'a>> {
        Self::check_sheet(path, sheet)?;
        let mut reader = Self::open(path)?;
        let actual = read_headers(&mut reader, path)?;
        let columns = project_columns(path, sheet, &actual, headers)?;

        let source = path.to_path_buf();
        let rows = reader.into_records().map(move |result| {
            result
                .map(|record| record_to_row(&record, &columns))
                .map_err(|e| Error::Csv {
                    path: source.clone(),
                    source: e,
                })
        });
        Ok(RowStream::new(rows, chunk_size, cancel))
    }
}
