//! Reader capability contract and an in-memory implementation

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::table::{Row, SheetData, SheetHeaders};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rows per chunk when the caller does not choose
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;

/// What the merge engine needs from a workbook reader
///
/// Implementations own the file format. The engine only sees headers and
/// rows of opaque text.
pub trait WorkbookReader: Send + Sync {
    /// Sheet names with their header rows; no row data is loaded
    fn list_sheets(&self, path: &Path) -> Result<Vec<SheetHeaders>>;

    /// Header rows of the named sheets only, in the order asked for
    ///
    /// Readers that can decode one sheet at a time should override this so
    /// that unselected sheets are never touched.
    fn sheet_headers(&self, path: &Path, sheets: &[String]) -> Result<Vec<SheetHeaders>> {
        let mut listed = self.list_sheets(path)?;
        sheets
            .iter()
            .map(|sheet| {
                listed
                    .iter()
                    .position(|h| &h.sheet_name == sheet)
                    .map(|pos| listed.swap_remove(pos))
                    .ok_or_else(|| Error::SheetNotFound {
                        path: path.to_path_buf(),
                        sheet: sheet.clone(),
                    })
            })
            .collect()
    }

    /// Load one sheet fully
    fn load_sheet(&self, path: &Path, sheet: &str) -> Result<SheetData>;

    /// Stream one sheet's rows in chunks of `chunk_size`
    ///
    /// Each row holds one cell per entry of `headers`, in that order. Every
    /// header must exist in the sheet; repeating a header text selects the
    /// next column carrying it. The stream checks `cancel` before every row.
    fn stream_rows<'a>(
        &'a self,
        path: &Path,
        sheet: &str,
        headers: &[String],
        chunk_size: usize,
        cancel: &CancellationToken,
    ) -> Result<RowStream<'a>>;
}

/// Forward-only, non-restartable stream of row chunks
pub struct RowStream<'a> {
    rows: Box<dyn Iterator<Item = Result<Row>> + 'a>,
    chunk_size: usize,
    cancel: CancellationToken,
    finished: bool,
}

impl<'a> RowStream<'a> {
    pub fn new(
        rows: impl Iterator<Item = Result<Row>> + 'a,
        chunk_size: usize,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            rows: Box::new(rows),
            chunk_size: chunk_size.max(1),
            cancel: cancel.clone(),
            finished: false,
        }
    }
}

impl Iterator for RowStream<'_> {
    type Item = Result<Vec<Row>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut chunk = Vec::with_capacity(self.chunk_size);
        while chunk.len() < self.chunk_size {
            if let Err(e) = self.cancel.check() {
                self.finished = true;
                return Some(Err(e));
            }
            match self.rows.next() {
                Some(Ok(row)) => chunk.push(row),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    break;
                }
            }
        }

        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }
}

/// Map each requested header to its column position in `actual`
///
/// The n-th request for a header text maps to the n-th column with that
/// text, so duplicate headers keep their own columns. Fails when a requested
/// header is gone, which means the sheet changed since its headers were
/// listed.
pub(crate) fn project_columns(
    path: &Path,
    sheet: &str,
    actual: &[String],
    wanted: &[String],
) -> Result<Vec<usize>> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    wanted
        .iter()
        .map(|header| {
            let nth = seen.entry(header.as_str()).or_insert(0);
            let found = actual
                .iter()
                .enumerate()
                .filter(|(_, a)| *a == header)
                .nth(*nth)
                .map(|(idx, _)| idx);
            *nth += 1;
            found.ok_or_else(|| Error::InconsistentSource {
                path: path.to_path_buf(),
                sheet: sheet.to_string(),
                message: format!("header '{}' is no longer present", header),
            })
        })
        .collect()
}

/// Cells of `row` at `columns`, in that order
pub(crate) fn project_row(row: &Row, columns: &[usize]) -> Row {
    Row::from_values(columns.iter().map(|&c| row.get(c)))
}

/// Name shown for a workbook in reports
pub(crate) fn display_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Clone)]
struct MemorySheet {
    name: String,
    headers: Vec<String>,
    rows: Vec<Row>,
}

/// Workbooks held in memory, keyed by path
///
/// Useful for embedding callers that already hold their data and for tests.
/// Unknown paths fail like a missing file.
#[derive(Debug, Default)]
pub struct MemoryWorkbookReader {
    workbooks: BTreeMap<PathBuf, Vec<MemorySheet>>,
    streams_opened: AtomicUsize,
}

impl MemoryWorkbookReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sheet to a workbook, creating the workbook on first use
    pub fn with_sheet(
        mut self,
        path: impl Into<PathBuf>,
        sheet: impl Into<String>,
        headers: &[&str],
        rows: Vec<Row>,
    ) -> Self {
        self.add_sheet(path, sheet, headers, rows);
        self
    }

    pub fn add_sheet(
        &mut self,
        path: impl Into<PathBuf>,
        sheet: impl Into<String>,
        headers: &[&str],
        rows: Vec<Row>,
    ) {
        self.workbooks.entry(path.into()).or_default().push(MemorySheet {
            name: sheet.into(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
        });
    }

    /// How many row streams have been opened so far
    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }

    fn workbook(&self, path: &Path) -> Result<&[MemorySheet]> {
        self.workbooks
            .get(path)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::FileRead {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such workbook"),
            })
    }

    fn sheet(&self, path: &Path, sheet: &str) -> Result<&MemorySheet> {
        self.workbook(path)?
            .iter()
            .find(|s| s.name == sheet)
            .ok_or_else(|| Error::SheetNotFound {
                path: path.to_path_buf(),
                sheet: sheet.to_string(),
            })
    }
}

impl WorkbookReader for MemoryWorkbookReader {
    fn list_sheets(&self, path: &Path) -> Result<Vec<SheetHeaders>> {
        let file_name = display_file_name(path);
        Ok(self
            .workbook(path)?
            .iter()
            .map(|s| SheetHeaders::new(file_name.clone(), s.name.clone(), s.headers.clone()))
            .collect())
    }

    fn load_sheet(&self, path: &Path, sheet: &str) -> Result<SheetData> {
        let sheet = self.sheet(path, sheet)?;
        Ok(SheetData {
            headers: sheet.headers.clone(),
            rows: sheet.rows.clone(),
        })
    }

    fn stream_rows<'a>(
        &'a self,
        path: &Path,
        sheet: &str,
        headers: &[String],
        chunk_size: usize,
        cancel: &CancellationToken,
    ) -> Result<RowStream<'a>> {
        let data = self.sheet(path, sheet)?;
        let columns = project_columns(path, sheet, &data.headers, headers)?;
        self.streams_opened.fetch_add(1, Ordering::SeqCst);
        let rows = data
            .rows
            .iter()
            .map(move |row| Ok(project_row(row, &columns)));
        Ok(RowStream::new(rows, chunk_size, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row::from_values([Some(i.to_string())]))
            .collect()
    }

    #[test]
    fn test_stream_chunks_rows() {
        let reader = MemoryWorkbookReader::new().with_sheet("a.xlsx", "S", &["ID"], numbered_rows(5));
        let token = CancellationToken::new();
        let chunks: Vec<Vec<Row>> = reader
            .stream_rows(Path::new("a.xlsx"), "S", &["ID".to_string()], 2, &token)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(reader.streams_opened(), 1);
    }

    #[test]
    fn test_stream_stops_on_cancel() {
        let reader = MemoryWorkbookReader::new().with_sheet("a.xlsx", "S", &["ID"], numbered_rows(5));
        let token = CancellationToken::new();
        let mut stream = reader
            .stream_rows(Path::new("a.xlsx"), "S", &["ID".to_string()], 2, &token)
            .unwrap();

        assert!(stream.next().unwrap().is_ok());
        token.cancel();
        assert!(stream.next().unwrap().unwrap_err().is_cancelled());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_stream_rejects_unknown_header() {
        let reader = MemoryWorkbookReader::new().with_sheet("a.xlsx", "S", &["ID"], Vec::new());
        let token = CancellationToken::new();
        let result = reader.stream_rows(
            Path::new("a.xlsx"),
            "S",
            &["Other".to_string()],
            10,
            &token,
        );
        assert!(matches!(result, Err(Error::InconsistentSource { .. })));
    }

    #[test]
    fn test_unknown_workbook_is_read_error() {
        let reader = MemoryWorkbookReader::new();
        let err = reader.list_sheets(Path::new("missing.xlsx")).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }

    #[test]
    fn test_unknown_sheet() {
        let reader = MemoryWorkbookReader::new().with_sheet("a.xlsx", "S", &["ID"], Vec::new());
        let err = reader.load_sheet(Path::new("a.xlsx"), "T").unwrap_err();
        assert!(matches!(err, Error::SheetNotFound { .. }));
    }

    #[test]
    fn test_duplicate_headers_keep_their_columns() {
        let actual: Vec<String> = ["ID", "Name", "Name"].iter().map(|s| s.to_string()).collect();
        let path = Path::new("a.csv");

        let wanted: Vec<String> = ["Name", "ID", "Name"].iter().map(|s| s.to_string()).collect();
        assert_eq!(project_columns(path, "a", &actual, &wanted).unwrap(), vec![1, 0, 2]);

        let too_many = vec!["Name".to_string(); 3];
        assert!(matches!(
            project_columns(path, "a", &actual, &too_many),
            Err(Error::InconsistentSource { .. })
        ));
    }

    #[test]
    fn test_stream_projects_requested_columns() {
        let reader = MemoryWorkbookReader::new().with_sheet(
            "a.xlsx",
            "S",
            &["ID", "Name", "Name"],
            vec![Row::from_values([Some("1"), Some("first"), Some("second")])],
        );
        let token = CancellationToken::new();
        let wanted = vec!["Name".to_string(), "ID".to_string(), "Name".to_string()];
        let chunk = reader
            .stream_rows(Path::new("a.xlsx"), "S", &wanted, 10, &token)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();

        assert_eq!(
            chunk[0],
            Row::from_values([Some("first"), Some("1"), Some("second")])
        );
    }

    #[test]
    fn test_sheet_headers_in_requested_order() {
        let reader = MemoryWorkbookReader::new()
            .with_sheet("a.xlsx", "S1", &["ID"], Vec::new())
            .with_sheet("a.xlsx", "S2", &["ID", "X"], Vec::new());
        let headers = reader
            .sheet_headers(Path::new("a.xlsx"), &["S2".to_string(), "S1".to_string()])
            .unwrap();
        let names: Vec<&str> = headers.iter().map(|h| h.sheet_name.as_str()).collect();
        assert_eq!(names, vec!["S2", "S1"]);

        let err = reader
            .sheet_headers(Path::new("a.xlsx"), &["S3".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::SheetNotFound { .. }));
    }
}
