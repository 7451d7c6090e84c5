//! sheetjoin-core: Core library for joining spreadsheet sheets on a key column
//!
//! This library provides functionality to:
//! - Discover workbooks (CSV, Excel, OpenDocument) and list their sheets
//! - Normalize headers so the key column matches across sheets
//! - Full-outer join every selected sheet on the key, keeping duplicate keys
//!   as separate rows with per-sheet provenance in the column names
//! - Run the join in batch, two-pass streaming or direct-to-sink mode
//! - Write the result as CSV or JSON, or cell by cell into a sink

pub mod cancel;
pub mod direct;
pub mod error;
pub mod index;
pub mod job;
pub mod merger;
pub mod normalize;
pub mod parser;
pub mod progress;
pub mod reader;
pub mod scanner;
pub mod schema;
pub mod session;
pub mod sink;
pub mod spreadsheet;
pub mod table;
pub mod writer;

pub use cancel::CancellationToken;
pub use direct::DirectOutcome;
pub use error::{Error, FileFailure, Result, SheetRef};
pub use index::{KeyIndex, KeyIndexBuilder, MaxOccurrences, SheetKeyCounts, SheetKeyIndex};
pub use job::{JobInput, MergeJob, OutputFormat};
pub use merger::{MergeEngine, MergeOptions, Strategy};
pub use normalize::{normalize_header, HeaderNormalizer, NormalizedHeaderIndex, UnicodeHeaderNormalizer};
pub use parser::{parse_csv, parse_csv_str, CsvWorkbookReader};
pub use progress::{ChannelProgress, MergeEvent, NoProgress, ProgressSink};
pub use reader::{MemoryWorkbookReader, RowStream, WorkbookReader};
pub use scanner::{import_selections, scan_inputs, ScanResult};
pub use schema::{OutputSchema, OutputSchemaBuilder, SheetColumns};
pub use session::{Destination, MergeReport, MergeSession, SessionState};
pub use sink::{copy_to_sink, CellSink, GridSink, TableWriter};
pub use spreadsheet::{is_supported, AutoReader, SpreadsheetReader};
pub use table::{FileSelection, MergedRow, MergedTable, Row, SheetData, SheetHeaders, KEY_COLUMN};
pub use writer::{write_csv, CsvGridSink, CsvTableWriter, JsonTableWriter};
