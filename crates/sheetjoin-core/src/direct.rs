//! Direct-to-sink strategy
//!
//! Never holds the merged table. Memory is bounded by the number of distinct
//! keys and columns, not by row volume. Each sheet is streamed twice:
//!
//! 1. Counting pass: per-sheet occurrence counts for every key.
//! 2. Layout: keys sorted, each given a contiguous block of
//!    `max(1, max occurrence)` destination rows; key cells written up front.
//! 3. Value pass: a per-key cursor assigns each row the next row of its
//!    key's block, and the sheet's values go to its column range.
//! 4. Back-fill: block rows the sheet did not reach are written as empty
//!    cells for its column range, since sinks do not default cells.
//!
//! There is no rollback. A cancelled or failed merge may leave the sink
//! partially written.

use crate::error::{Error, Result};
use crate::index::{row_key, MaxOccurrences, SheetKeyCounts};
use crate::merger::{active_selections, read_error, MergeEngine, SheetPlan, Strategy};
use crate::progress::MergeEvent;
use crate::sink::CellSink;
use crate::table::FileSelection;
use std::collections::HashMap;
use std::path::PathBuf;

/// Result of a direct-to-sink merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectOutcome {
    /// Data rows written (header row excluded)
    pub rows: usize,
    pub columns: usize,
    /// Distinct keys written
    pub keys: usize,
    /// Where the sink persisted its output, if anywhere
    pub location: Option<PathBuf>,
}

fn inconsistent(plan: &SheetPlan, message: String) -> Error {
    Error::InconsistentSource {
        path: plan.file_path.clone(),
        sheet: plan.sheet_name.clone(),
        message,
    }
}

impl<'a> MergeEngine<'a> {
    /// Direct-to-sink strategy: stream every sheet twice into `sink`
    pub fn merge_direct(
        &self,
        selections: &[FileSelection],
        key: &str,
        sink: &mut dyn CellSink,
    ) -> Result<DirectOutcome> {
        let normalized_key = self.validate_arguments(selections, key)?;
        let active = active_selections(selections);

        let candidates = self.discover_headers(&active)?;
        let plans = self.plan_sheets(&candidates, key, &normalized_key)?;
        let schema = self.build_schema(&plans, key);
        self.started(Strategy::Direct, &plans);

        // Counting pass
        let mut max = MaxOccurrences::new();
        let mut sheet_counts = Vec::with_capacity(plans.len());
        for plan in &plans {
            let mut counts = SheetKeyCounts::new(plan.key_column);
            for chunk in self.open_stream(plan)? {
                for row in &chunk.map_err(|e| read_error(&plan.file_path, e))? {
                    counts.push(row);
                }
                self.cancel.check()?;
            }
            self.sheet_scanned(plan, counts.rows_seen(), counts.keyless_rows());
            max.observe_all(counts.counts());
            sheet_counts.push(counts);
        }

        // Layout and key cells
        let total = max.total_rows();
        let key_batch = self.options.key_batch.max(1);
        self.keys_collected(&max);
        sink.begin(&schema.columns, total)?;

        let mut starts: HashMap<&str, usize> = HashMap::with_capacity(max.len());
        let mut next = 0;
        for (n, (k, rows)) in max.iter().enumerate() {
            if n % key_batch == 0 {
                self.cancel.check()?;
            }
            starts.insert(k, next);
            for dest in next..next + rows {
                sink.write_cell(dest, 0, Some(k))?;
            }
            next += rows;
        }

        // Value pass and back-fill, one sheet at a time
        let mut written = 0;
        for ((plan, columns), counts) in plans.iter().zip(&schema.sheets).zip(&sheet_counts) {
            let mut cursors: HashMap<&str, usize> = HashMap::with_capacity(counts.distinct_keys());

            for chunk in self.open_stream(plan)? {
                for row in chunk.map_err(|e| read_error(&plan.file_path, e))? {
                    let Some(k) = row_key(&row, plan.key_column) else {
                        continue;
                    };
                    let Some((&stable, &start)) = starts.get_key_value(k) else {
                        return Err(inconsistent(
                            plan,
                            format!("key '{}' was not seen by the counting pass", k),
                        ));
                    };
                    let cursor = cursors.entry(stable).or_insert(0);
                    if *cursor >= counts.count(k) {
                        return Err(inconsistent(
                            plan,
                            format!("key '{}' has more rows than counted", k),
                        ));
                    }
                    let dest = start + *cursor;
                    *cursor += 1;

                    for (target, column) in columns.targets() {
                        sink.write_cell(dest, target, row.get(column))?;
                    }
                }
                self.cancel.check()?;
            }

            for (n, (k, rows)) in max.iter().enumerate() {
                if n % key_batch == 0 {
                    self.cancel.check()?;
                }
                let filled = cursors.get(k).copied().unwrap_or(0);
                if filled != counts.count(k) {
                    return Err(inconsistent(
                        plan,
                        format!("key '{}' has fewer rows than counted", k),
                    ));
                }
                let start = starts[k];
                for dest in start + filled..start + rows {
                    for column in columns.range() {
                        sink.write_cell(dest, column, None)?;
                    }
                }
            }

            written += 1;
            self.progress.emit(MergeEvent::RowsEmitted {
                rows: total * written / plans.len(),
                total,
            });
        }

        let location = sink.finish()?;
        self.finished(total, schema.width());
        Ok(DirectOutcome {
            rows: total,
            columns: schema.width(),
            keys: max.len(),
            location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::reader::{MemoryWorkbookReader, RowStream, WorkbookReader};
    use crate::sink::GridSink;
    use crate::table::{Row, SheetData, SheetHeaders};
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn row(id: &str, value: &str) -> Row {
        Row::from_values([Some(id), Some(value)])
    }

    fn flipped(id: &str, value: &str) -> Row {
        Row::from_values([Some(value), Some(id)])
    }

    fn reader() -> MemoryWorkbookReader {
        MemoryWorkbookReader::new()
            .with_sheet(
                "a.xlsx",
                "One",
                &["ID", "Value"],
                vec![row("k1", "a1"), row("k2", "a2"), row("k2", "a2b"), row(" ", "lost")],
            )
            .with_sheet(
                "b.xlsx",
                "Two",
                &["Value", "ID"],
                vec![flipped("k3", "b3"), flipped("k2", "b2")],
            )
    }

    fn selections() -> Vec<FileSelection> {
        vec![
            FileSelection::new("a.xlsx", vec!["One".to_string()]),
            FileSelection::new("b.xlsx", vec!["Two".to_string()]),
        ]
    }

    #[test]
    fn test_every_cell_written() {
        let reader = reader();
        let mut grid = GridSink::new();
        let outcome = MergeEngine::new(&reader)
            .merge_direct(&selections(), "id", &mut grid)
            .unwrap();

        assert_eq!(outcome.rows, 4);
        assert_eq!(outcome.columns, 3);
        assert_eq!(outcome.keys, 3);
        assert_eq!(outcome.location, None);
        assert_eq!(grid.unwritten_cells(), 0);

        // k2 block: rows 1 and 2; sheet Two only has one k2 row
        assert_eq!(grid.cell(1, 2), Some("b2"));
        assert_eq!(grid.cell(2, 1), Some("a2b"));
        assert_eq!(grid.cell(2, 2), None);
    }

    #[test]
    fn test_each_sheet_streamed_twice() {
        let reader = reader();
        let mut grid = GridSink::new();
        MergeEngine::new(&reader)
            .merge_direct(&selections(), "id", &mut grid)
            .unwrap();
        assert_eq!(reader.streams_opened(), 4);
    }

    #[test]
    fn test_counted_keys_equal_written_keys() {
        let reader = reader();
        let mut grid = GridSink::new();
        MergeEngine::new(&reader)
            .merge_direct(&selections(), "id", &mut grid)
            .unwrap();
        let table = grid.into_table();

        let mut counted = MaxOccurrences::new();
        for (path, sheet) in [("a.xlsx", "One"), ("b.xlsx", "Two")] {
            let data = reader.load_sheet(Path::new(path), sheet).unwrap();
            let key_column = data.headers.iter().position(|h| h == "ID").unwrap();
            let mut counts = SheetKeyCounts::new(key_column);
            data.rows.iter().for_each(|r| counts.push(r));
            counted.observe_all(counts.counts());
        }
        let counted: BTreeSet<&str> = counted.keys().collect();

        let written: BTreeSet<&str> = table
            .rows
            .iter()
            .filter(|r| r.cells[1..].iter().any(Option::is_some))
            .filter_map(|r| r.key())
            .collect();
        assert_eq!(counted, written);
    }

    #[test]
    fn test_cancel_mid_write_leaves_partial_sink() {
        let reader = reader();
        let token = CancellationToken::new();
        let trigger = token.clone();
        let progress = move |event: MergeEvent| {
            if matches!(event, MergeEvent::RowsEmitted { .. }) {
                trigger.cancel();
            }
        };
        let mut grid = GridSink::new();

        let err = MergeEngine::new(&reader)
            .with_cancellation(token)
            .with_progress(&progress)
            .merge_direct(&selections(), "id", &mut grid)
            .unwrap_err();

        assert!(err.is_cancelled());
        // First sheet is done, second sheet never started
        assert!(grid.unwritten_cells() > 0);
        assert_eq!(grid.cell(0, 1), Some("a1"));
    }

    /// Drops the last row of every sheet after the first stream is opened
    struct ShrinkingReader {
        inner: MemoryWorkbookReader,
        opened: AtomicUsize,
    }

    impl WorkbookReader for ShrinkingReader {
        fn list_sheets(&self, path: &Path) -> Result<Vec<SheetHeaders>> {
            self.inner.list_sheets(path)
        }

        fn load_sheet(&self, path: &Path, sheet: &str) -> Result<SheetData> {
            self.inner.load_sheet(path, sheet)
        }

        fn stream_rows<'a>(
            &'a self,
            path: &Path,
            sheet: &str,
            _headers: &[String],
            chunk_size: usize,
            cancel: &CancellationToken,
        ) -> Result<RowStream<'a>> {
            let mut rows = self.inner.load_sheet(path, sheet)?.rows;
            if self.opened.fetch_add(1, Ordering::SeqCst) > 0 {
                rows.pop();
            }
            Ok(RowStream::new(rows.into_iter().map(Ok), chunk_size, cancel))
        }
    }

    #[test]
    fn test_source_change_between_passes() {
        let reader = ShrinkingReader {
            inner: MemoryWorkbookReader::new().with_sheet(
                "a.xlsx",
                "One",
                &["ID", "Value"],
                vec![row("k1", "a"), row("k2", "b")],
            ),
            opened: AtomicUsize::new(0),
        };
        let selections = vec![FileSelection::new("a.xlsx", vec!["One".to_string()])];
        let mut grid = GridSink::new();

        let err = MergeEngine::new(&reader)
            .merge_direct(&selections, "id", &mut grid)
            .unwrap_err();
        assert!(matches!(err, Error::InconsistentSource { .. }));
    }
}
