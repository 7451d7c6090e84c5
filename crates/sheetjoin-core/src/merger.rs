//! Merge engine: full-outer join of many sheets on one normalized key column
//!
//! Every strategy runs the same pre-flight and produces the same table:
//!
//! 1. Arguments are checked before any I/O (blank key, nothing selected).
//! 2. Headers are read for every selected sheet. Read failures are collected
//!    per file and reported together.
//! 3. The key column is located in every sheet by normalized name. Sheets
//!    lacking it are collected and reported together.
//! 4. Distinct keys are emitted in byte-wise ascending order. Key `K` gets
//!    `max(1, most occurrences of K in any sheet)` rows, and the i-th row
//!    takes each sheet's i-th occurrence of `K`, or nulls if it has none.
//!
//! The strategies differ only in how they read: batch loads whole files in
//! parallel, streaming reads headers first and then rows in chunks, and
//! direct-to-sink (see `direct.rs`) never materializes the table at all.

use crate::cancel::CancellationToken;
use crate::error::{Error, FileFailure, Result, SheetRef};
use crate::index::{KeyIndex, KeyIndexBuilder, MaxOccurrences, SheetKeyIndex};
use crate::normalize::{HeaderNormalizer, NormalizedHeaderIndex, UnicodeHeaderNormalizer};
use crate::progress::{MergeEvent, NoProgress, ProgressSink};
use crate::reader::{RowStream, WorkbookReader, DEFAULT_CHUNK_SIZE};
use crate::schema::{OutputSchema, OutputSchemaBuilder, SheetColumns};
use crate::sink::GridSink;
use crate::table::{FileSelection, MergedRow, MergedTable, Row, SheetData, SheetHeaders};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Keys emitted between cancellation checks
pub const DEFAULT_KEY_BATCH: usize = 256;

/// How a merge reads its inputs and produces output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Load every sheet fully, one parallel task per file
    #[default]
    Batch,
    /// Headers first, then rows in bounded chunks
    Streaming,
    /// Count, then write values straight into a cell sink
    Direct,
}

impl Strategy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Strategy::Batch => "batch",
            Strategy::Streaming => "streaming",
            Strategy::Direct => "direct",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(Strategy::Batch),
            "streaming" | "stream" => Ok(Strategy::Streaming),
            "direct" | "direct-to-sink" => Ok(Strategy::Direct),
            other => Err(Error::InvalidArgument(format!(
                "unknown strategy '{}', expected batch, streaming or direct",
                other
            ))),
        }
    }
}

/// Tuning knobs for a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Rows per streamed chunk
    pub chunk_size: usize,
    /// Keys processed between cancellation checks
    pub key_batch: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            key_batch: DEFAULT_KEY_BATCH,
        }
    }
}

/// A selected sheet's headers, paired with the selection it came from
pub(crate) struct Candidate<'s> {
    pub selection: &'s FileSelection,
    pub headers: SheetHeaders,
}

/// A sheet that passed validation
#[derive(Debug, Clone)]
pub(crate) struct SheetPlan {
    /// Position among the candidates the plan was built from
    pub slot: usize,
    pub file_path: PathBuf,
    pub file_name: String,
    pub base_name: String,
    pub sheet_name: String,
    pub headers: Vec<String>,
    /// Position of the key column in `headers`
    pub key_column: usize,
}

/// Runs merges against a reader
///
/// Build one per merge or reuse it; it holds no per-merge state.
pub struct MergeEngine<'a> {
    pub(crate) reader: &'a dyn WorkbookReader,
    pub(crate) normalizer: &'a dyn HeaderNormalizer,
    pub(crate) progress: &'a dyn ProgressSink,
    pub(crate) options: MergeOptions,
    pub(crate) cancel: CancellationToken,
}

impl<'a> MergeEngine<'a> {
    pub fn new(reader: &'a dyn WorkbookReader) -> Self {
        Self {
            reader,
            normalizer: &UnicodeHeaderNormalizer,
            progress: &NoProgress,
            options: MergeOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: &'a dyn HeaderNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_options(mut self, options: MergeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels merges run by this engine
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Merge with any strategy into an in-memory table
    ///
    /// The direct strategy writes into a [`GridSink`] that is converted at
    /// the end.
    pub fn merge(
        &self,
        selections: &[FileSelection],
        key: &str,
        strategy: Strategy,
    ) -> Result<MergedTable> {
        match strategy {
            Strategy::Batch => self.merge_batch(selections, key),
            Strategy::Streaming => self.merge_streaming(selections, key),
            Strategy::Direct => {
                let mut grid = GridSink::new();
                self.merge_direct(selections, key, &mut grid)?;
                Ok(grid.into_table())
            }
        }
    }

    /// Batch strategy: read every selected sheet fully, one task per file
    pub fn merge_batch(&self, selections: &[FileSelection], key: &str) -> Result<MergedTable> {
        let normalized_key = self.validate_arguments(selections, key)?;
        let active = active_selections(selections);

        let loaded: Vec<Result<Vec<SheetData>>> =
            active.par_iter().map(|s| self.load_file(s)).collect();
        let files = collect_file_results(&active, loaded)?;
        self.cancel.check()?;

        let mut candidates = Vec::new();
        let mut sheets: Vec<Option<SheetData>> = Vec::new();
        for (&selection, data) in active.iter().zip(files) {
            for (sheet_name, sheet) in selection.selected_sheets().iter().zip(data) {
                candidates.push(Candidate {
                    selection,
                    headers: SheetHeaders::new(
                        selection.file_name.clone(),
                        sheet_name.clone(),
                        sheet.headers.clone(),
                    ),
                });
                sheets.push(Some(sheet));
            }
        }

        let plans = self.plan_sheets(&candidates, key, &normalized_key)?;
        let schema = self.build_schema(&plans, key);
        self.started(Strategy::Batch, &plans);

        let mut builder = KeyIndexBuilder::new();
        for plan in &plans {
            let rows = sheets[plan.slot]
                .take()
                .map(|sheet| sheet.rows)
                .unwrap_or_default();
            let chunk_size = self.options.chunk_size.max(1);
            let mut index = SheetKeyIndex::new(plan.key_column);
            for (n, row) in rows.into_iter().enumerate() {
                if n % chunk_size == 0 {
                    self.cancel.check()?;
                }
                index.push(row);
            }
            self.sheet_scanned(plan, index.rows_seen(), index.keyless_rows());
            builder.add_sheet(index);
        }

        self.build_table(&schema, builder.finish())
    }

    /// Two-pass streaming strategy: headers first, then rows in chunks
    pub fn merge_streaming(&self, selections: &[FileSelection], key: &str) -> Result<MergedTable> {
        let normalized_key = self.validate_arguments(selections, key)?;
        let active = active_selections(selections);

        let candidates = self.discover_headers(&active)?;
        let plans = self.plan_sheets(&candidates, key, &normalized_key)?;
        let schema = self.build_schema(&plans, key);
        self.started(Strategy::Streaming, &plans);

        let mut builder = KeyIndexBuilder::new();
        for plan in &plans {
            let mut index = SheetKeyIndex::new(plan.key_column);
            for chunk in self.open_stream(plan)? {
                index.extend(chunk.map_err(|e| read_error(&plan.file_path, e))?);
                self.cancel.check()?;
            }
            self.sheet_scanned(plan, index.rows_seen(), index.keyless_rows());
            builder.add_sheet(index);
        }

        self.build_table(&schema, builder.finish())
    }

    /// Reject unusable arguments before touching any file
    ///
    /// Returns the normalized key.
    pub(crate) fn validate_arguments(
        &self,
        selections: &[FileSelection],
        key: &str,
    ) -> Result<String> {
        if key.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "key column name is blank".to_string(),
            ));
        }
        if selections.iter().all(|s| s.selected_sheets().is_empty()) {
            return Err(Error::InvalidArgument(
                "no sheets selected for merge".to_string(),
            ));
        }
        self.cancel.check()?;
        Ok(self.normalizer.normalize(key))
    }

    fn load_file(&self, selection: &FileSelection) -> Result<Vec<SheetData>> {
        let mut sheets = Vec::with_capacity(selection.selected_sheets().len());
        for sheet in selection.selected_sheets() {
            self.cancel.check()?;
            sheets.push(self.reader.load_sheet(&selection.file_path, sheet)?);
        }
        debug!(
            path = %selection.file_path.display(),
            sheets = sheets.len(),
            "loaded workbook"
        );
        self.progress.emit(MergeEvent::FileRead {
            path: selection.file_path.clone(),
            sheets: sheets.len(),
        });
        Ok(sheets)
    }

    fn selected_headers(&self, selection: &FileSelection) -> Result<Vec<SheetHeaders>> {
        self.cancel.check()?;
        let mut headers = self
            .reader
            .sheet_headers(&selection.file_path, selection.selected_sheets())?;
        for found in &mut headers {
            found.file_name = selection.file_name.clone();
        }
        self.progress.emit(MergeEvent::FileRead {
            path: selection.file_path.clone(),
            sheets: headers.len(),
        });
        Ok(headers)
    }

    /// Read headers of every selected sheet, one task per file
    pub(crate) fn discover_headers<'s>(
        &self,
        active: &[&'s FileSelection],
    ) -> Result<Vec<Candidate<'s>>> {
        let listed: Vec<Result<Vec<SheetHeaders>>> =
            active.par_iter().map(|s| self.selected_headers(s)).collect();
        let files = collect_file_results(active, listed)?;
        self.cancel.check()?;

        Ok(active
            .iter()
            .zip(files)
            .flat_map(|(&selection, headers)| {
                headers.into_iter().map(move |headers| Candidate {
                    selection,
                    headers,
                })
            })
            .collect())
    }

    /// Locate the key column in every candidate sheet
    ///
    /// Header-less sheets are skipped. Every sheet lacking the key is
    /// reported in a single error.
    pub(crate) fn plan_sheets(
        &self,
        candidates: &[Candidate<'_>],
        key: &str,
        normalized_key: &str,
    ) -> Result<Vec<SheetPlan>> {
        let mut plans = Vec::new();
        let mut missing = Vec::new();

        for (slot, candidate) in candidates.iter().enumerate() {
            let headers = &candidate.headers;
            if !headers.is_eligible() {
                warn!(
                    file = %candidate.selection.file_name,
                    sheet = %headers.sheet_name,
                    "skipping sheet without headers"
                );
                self.progress.emit(MergeEvent::SheetSkipped {
                    file_name: candidate.selection.file_name.clone(),
                    sheet_name: headers.sheet_name.clone(),
                });
                continue;
            }

            let index = NormalizedHeaderIndex::build(&headers.headers, self.normalizer);
            match index.position(normalized_key) {
                Some(key_column) => plans.push(SheetPlan {
                    slot,
                    file_path: candidate.selection.file_path.clone(),
                    file_name: candidate.selection.file_name.clone(),
                    base_name: candidate.selection.base_name(),
                    sheet_name: headers.sheet_name.clone(),
                    headers: headers.headers.clone(),
                    key_column,
                }),
                None => missing.push(SheetRef::new(
                    candidate.selection.file_name.clone(),
                    headers.sheet_name.clone(),
                )),
            }
        }

        if !missing.is_empty() {
            return Err(Error::MissingKeyColumn {
                key: key.trim().to_string(),
                sheets: missing,
            });
        }
        if plans.is_empty() {
            return Err(Error::InvalidArgument(
                "none of the selected sheets has a header row".to_string(),
            ));
        }
        Ok(plans)
    }

    pub(crate) fn build_schema(&self, plans: &[SheetPlan], key: &str) -> OutputSchema {
        let mut builder = OutputSchemaBuilder::new(self.normalizer, key);
        for plan in plans {
            builder.add_sheet(&plan.base_name, &plan.sheet_name, &plan.headers);
        }
        builder.build()
    }

    pub(crate) fn open_stream(&self, plan: &SheetPlan) -> Result<RowStream<'a>> {
        self.reader
            .stream_rows(
                &plan.file_path,
                &plan.sheet_name,
                &plan.headers,
                self.options.chunk_size,
                &self.cancel,
            )
            .map_err(|e| read_error(&plan.file_path, e))
    }

    pub(crate) fn started(&self, strategy: Strategy, plans: &[SheetPlan]) {
        info!(%strategy, sheets = plans.len(), "merge started");
        self.progress.emit(MergeEvent::Started {
            strategy,
            sheets: plans.len(),
        });
    }

    pub(crate) fn sheet_scanned(&self, plan: &SheetPlan, rows: usize, keyless: usize) {
        debug!(
            file = %plan.file_name,
            sheet = %plan.sheet_name,
            rows,
            "sheet scanned"
        );
        self.progress.emit(MergeEvent::SheetScanned {
            file_name: plan.file_name.clone(),
            sheet_name: plan.sheet_name.clone(),
            rows,
        });
        if keyless > 0 {
            warn!(
                file = %plan.file_name,
                sheet = %plan.sheet_name,
                rows = keyless,
                "dropped rows with a blank key"
            );
            self.progress.emit(MergeEvent::KeylessRowsDropped {
                file_name: plan.file_name.clone(),
                sheet_name: plan.sheet_name.clone(),
                rows: keyless,
            });
        }
    }

    pub(crate) fn keys_collected(&self, max: &MaxOccurrences) {
        if max.is_empty() {
            warn!("no sheet has a row with a non-blank key");
        }
        self.progress.emit(MergeEvent::KeysCollected {
            keys: max.len(),
            rows: max.total_rows(),
        });
    }

    pub(crate) fn finished(&self, rows: usize, columns: usize) {
        info!(rows, columns, "merge finished");
        self.progress.emit(MergeEvent::Finished { rows, columns });
    }

    /// Emit the joined table from complete per-sheet indices
    fn build_table(&self, schema: &OutputSchema, index: KeyIndex) -> Result<MergedTable> {
        let total = index.max.total_rows();
        let width = schema.width();
        self.keys_collected(&index.max);

        let mut table = MergedTable::new(schema.columns.clone());
        table.rows.reserve(total);
        let key_batch = self.options.key_batch.max(1);

        for (n, (key, rows)) in index.max.iter().enumerate() {
            if n % key_batch == 0 {
                self.cancel.check()?;
                self.progress.emit(MergeEvent::RowsEmitted {
                    rows: table.rows.len(),
                    total,
                });
            }
            for occurrence in 0..rows {
                let mut row = MergedRow::empty(width);
                row.cells[0] = Some(key.to_string());
                for (sheet, columns) in index.sheets.iter().zip(&schema.sheets) {
                    if let Some(source) = sheet.occurrence(key, occurrence) {
                        fill_columns(&mut row, source, columns);
                    }
                }
                table.rows.push(row);
            }
        }

        self.finished(table.row_count(), table.column_count());
        Ok(table)
    }
}

fn fill_columns(row: &mut MergedRow, source: &Row, columns: &SheetColumns) {
    for (target, column) in columns.targets() {
        row.cells[target] = source.get(column).map(str::to_string);
    }
}

/// Selections that contribute at least one sheet
pub(crate) fn active_selections(selections: &[FileSelection]) -> Vec<&FileSelection> {
    selections
        .iter()
        .filter(|s| !s.selected_sheets().is_empty())
        .collect()
}

/// Wrap a per-file failure so it reports like an aggregated read failure
pub(crate) fn read_error(path: &Path, error: Error) -> Error {
    match error {
        Error::Cancelled | Error::InconsistentSource { .. } | Error::ReadFailures(_) => error,
        other => Error::ReadFailures(vec![FileFailure::new(path, &other)]),
    }
}

/// Split per-file results into values or one aggregated error
///
/// Cancellation wins over read failures.
pub(crate) fn collect_file_results<T>(
    selections: &[&FileSelection],
    results: Vec<Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    let mut cancelled = false;

    for (selection, result) in selections.iter().zip(results) {
        match result {
            Ok(value) => values.push(value),
            Err(Error::Cancelled) => cancelled = true,
            Err(e) => {
                warn!(path = %selection.file_path.display(), error = %e, "failed to read workbook");
                failures.push(FileFailure::new(selection.file_path.clone(), &e));
            }
        }
    }

    if cancelled {
        Err(Error::Cancelled)
    } else if !failures.is_empty() {
        Err(Error::ReadFailures(failures))
    } else {
        Ok(values)
    }
}
