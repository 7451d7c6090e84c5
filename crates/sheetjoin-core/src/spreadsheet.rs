//! Excel and OpenDocument workbook reading via calamine
//!
//! The first row of each sheet is its header row. Header cells that are
//! blank are ignored along with the values beneath them. Rows are read from
//! the sheet's used range, so leading empty rows and columns are skipped.

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::parser::CsvWorkbookReader;
use crate::reader::{display_file_name, project_columns, RowStream, WorkbookReader};
use crate::table::{Row, SheetData, SheetHeaders};
use calamine::{open_workbook_auto, Cell, Data, DataRef, Range, Reader, Sheets, XlsxError};
use std::ffi::OsStr;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// File extensions handled by [`SpreadsheetReader`]
pub const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlam", "xlsb", "xls", "xla", "ods"];

/// Every extension [`AutoReader`] accepts
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["csv", "xlsx", "xlsm", "xlam", "xlsb", "xls", "xla", "ods"];

/// Lowercased extension of a path
fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|e| e.to_ascii_lowercase())
}

/// True when the path has an extension [`AutoReader`] can open
pub fn is_supported(path: &Path) -> bool {
    extension(path).is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
}

/// Reads Excel (.xlsx, .xlsm, .xlsb, .xls) and OpenDocument (.ods) workbooks
#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadsheetReader;

type Workbook = Sheets<BufReader<File>>;

impl SpreadsheetReader {
    pub fn new() -> Self {
        Self
    }

    fn open(path: &Path) -> Result<Workbook> {
        open_workbook_auto(path).map_err(|e| Error::Spreadsheet {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn check_sheet(workbook: &Workbook, path: &Path, sheet: &str) -> Result<()> {
        if workbook.sheet_names().iter().any(|name| name == sheet) {
            Ok(())
        } else {
            Err(Error::SheetNotFound {
                path: path.to_path_buf(),
                sheet: sheet.to_string(),
            })
        }
    }

    fn range(path: &Path, sheet: &str) -> Result<Range<Data>> {
        let mut workbook = Self::open(path)?;
        Self::check_sheet(&workbook, path, sheet)?;
        workbook
            .worksheet_range(sheet)
            .map_err(|e| Error::Spreadsheet {
                path: path.to_path_buf(),
                source: e,
            })
    }

    /// Header rows of `sheets`, decoding nothing else
    fn headers_of(
        workbook: &mut Workbook,
        path: &Path,
        sheets: &[String],
    ) -> Result<Vec<SheetHeaders>> {
        let file_name = display_file_name(path);
        sheets
            .iter()
            .map(|sheet| {
                Self::check_sheet(workbook, path, sheet)?;
                let headers = read_header_row(workbook, sheet).map_err(|e| Error::Spreadsheet {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                Ok(SheetHeaders::new(file_name.clone(), sheet.clone(), headers))
            })
            .collect()
    }
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) if s.is_empty() => None,
        other => Some(other.to_string()),
    }
}

fn header_name(cell: &Data) -> Option<String> {
    cell_text(cell).filter(|name| !name.trim().is_empty())
}

/// Header row of a range as `(column position, header)` pairs
fn header_columns(range: &Range<Data>) -> Vec<(usize, String)> {
    range
        .rows()
        .next()
        .map(|cells| {
            cells
                .iter()
                .enumerate()
                .filter_map(|(idx, cell)| header_name(cell).map(|name| (idx, name)))
                .collect()
        })
        .unwrap_or_default()
}

/// Header texts from a cell stream, stopping after the header row
///
/// The header row is the row of the first non-empty cell, the same row a
/// decoded range starts at.
fn first_row_headers<'c, E>(
    cells: impl Iterator<Item = std::result::Result<Cell<DataRef<'c>>, E>>,
) -> std::result::Result<Vec<String>, E> {
    let mut header_row = None;
    let mut headers = Vec::new();
    for cell in cells {
        let cell = cell?;
        if matches!(cell.get_value(), DataRef::Empty) {
            continue;
        }
        let (row, _) = cell.get_position();
        match header_row {
            None => header_row = Some(row),
            Some(first) if row > first => break,
            Some(_) => {}
        }
        if let Some(name) = header_name(&Data::from(cell.get_value().clone())) {
            headers.push(name);
        }
    }
    Ok(headers)
}

/// Read one sheet's header row
///
/// Xlsx and xlsb sheets are read cell by cell and only up to the end of the
/// header row. Xls and ods have no cell reader, so the sheet is decoded.
fn read_header_row(
    workbook: &mut Workbook,
    sheet: &str,
) -> std::result::Result<Vec<String>, calamine::Error> {
    match workbook {
        Sheets::Xlsx(xlsx) => match xlsx.worksheet_cells_reader(sheet) {
            Ok(mut cells) => Ok(first_row_headers(std::iter::from_fn(|| {
                cells.next_cell().transpose()
            }))?),
            // Chart sheets decode to an empty range
            Err(XlsxError::NotAWorksheet(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        },
        Sheets::Xlsb(xlsb) => {
            let mut cells = xlsb.worksheet_cells_reader(sheet)?;
            Ok(first_row_headers(std::iter::from_fn(|| {
                cells.next_cell().transpose()
            }))?)
        }
        other => {
            let range = other.worksheet_range(sheet)?;
            Ok(header_columns(&range).into_iter().map(|(_, h)| h).collect())
        }
    }
}

/// Cells of range row `row` at the given range columns
fn row_at(range: &Range<Data>, row: usize, columns: &[usize]) -> Row {
    Row::from_values(
        columns
            .iter()
            .map(|&col| range.get((row, col)).and_then(cell_text)),
    )
}

/// Headers and every row of a decoded sheet
fn sheet_data(range: &Range<Data>) -> SheetData {
    let (columns, headers): (Vec<usize>, Vec<String>) = header_columns(range).into_iter().unzip();
    let rows = (1..range.height())
        .map(|r| row_at(range, r, &columns))
        .collect();
    SheetData { headers, rows }
}

/// Rows of a decoded sheet projected onto `headers`
fn range_rows(
    range: Range<Data>,
    path: &Path,
    sheet: &str,
    headers: &[String],
) -> Result<impl Iterator<Item = Result<Row>>> {
    let positions = header_columns(&range);
    let actual: Vec<String> = positions.iter().map(|(_, h)| h.clone()).collect();
    let columns: Vec<usize> = project_columns(path, sheet, &actual, headers)?
        .into_iter()
        .map(|idx| positions[idx].0)
        .collect();

    Ok((1..range.height()).map(move |r| Ok(row_at(&range, r, &columns))))
}

impl WorkbookReader for SpreadsheetReader {
    fn list_sheets(&self, path: &Path) -> Result<Vec<SheetHeaders>> {
        let mut workbook = Self::open(path)?;
        let names = workbook.sheet_names();
        Self::headers_of(&mut workbook, path, &names)
    }

    fn sheet_headers(&self, path: &Path, sheets: &[String]) -> Result<Vec<SheetHeaders>> {
        let mut workbook = Self::open(path)?;
        Self::headers_of(&mut workbook, path, sheets)
    }

    fn load_sheet(&self, path: &Path, sheet: &str) -> Result<SheetData> {
        Ok(sheet_data(&Self::range(path, sheet)?))
    }

    fn stream_rows<'a>(
        &'a self,
        path: &Path,
        sheet: &str,
        headers: &[String],
        chunk_size: usize,
        cancel: &CancellationToken,
    ) -> Result<RowStream<'a>> {
        // calamine decodes a whole sheet at once; chunking bounds what the
        // engine holds, not what the decoder holds.
        let range = Self::range(path, sheet)?;
        let rows = range_rows(range, path, sheet, headers)?;
        Ok(RowStream::new(rows, chunk_size, cancel))
    }
}

/// Picks a reader from the file extension
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoReader {
    csv: CsvWorkbookReader,
    spreadsheet: SpreadsheetReader,
}

impl AutoReader {
    pub fn new() -> Self {
        Self::default()
    }

    fn pick(&self, path: &Path) -> Result<&dyn WorkbookReader> {
        match extension(path).as_deref() {
            Some("csv") => Ok(&self.csv),
            Some(ext) if SPREADSHEET_EXTENSIONS.contains(&ext) => Ok(&self.spreadsheet),
            _ => Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

impl WorkbookReader for AutoReader {
    fn list_sheets(&self, path: &Path) -> Result<Vec<SheetHeaders>> {
        self.pick(path)?.list_sheets(path)
    }

    fn sheet_headers(&self, path: &Path, sheets: &[String]) -> Result<Vec<SheetHeaders>> {
        self.pick(path)?.sheet_headers(path, sheets)
    }

    fn load_sheet(&self, path: &Path, sheet: &str) -> Result<SheetData> {
        self.pick(path)?.load_sheet(path, sheet)
    }

    fn stream_rows<'a>(
        &'a self,
        path: &Path,
        sheet: &str,
        headers: &[String],
        chunk_size: usize,
        cancel: &CancellationToken,
    ) -> Result<RowStream<'a>> {
        self.pick(path)?
            .stream_rows(path, sheet, headers, chunk_size, cancel)
    }
}
