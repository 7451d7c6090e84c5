//! Merge session: imported selections, one merge at a time, and its outcome
//!
//! A session owns the list of selected workbooks and at most one running
//! merge. Starting a second merge while one is running fails with
//! [`Error::MergeInProgress`]. The running merge can be cancelled from any
//! thread holding a reference to the session.

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::merger::{MergeEngine, Strategy};
use crate::reader::WorkbookReader;
use crate::scanner::import_selections;
use crate::sink::{copy_to_sink, CellSink, TableWriter};
use crate::table::FileSelection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// Summary of a completed merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub strategy: Strategy,
    /// Data rows produced
    pub rows: usize,
    pub columns: usize,
    /// Where the output was persisted, if anywhere
    pub location: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Where a merge is going
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running {
        strategy: Strategy,
        started_at: DateTime<Utc>,
    },
    Completed(MergeReport),
    Failed { message: String },
    Cancelled,
}

/// Output of a merge run through a session
pub enum Destination<'o> {
    /// Whole-table writer; the direct strategy fills an in-memory grid first
    Table(&'o mut dyn TableWriter),
    /// Cell sink; batch and streaming results are replayed into it
    Cells(&'o mut dyn CellSink),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    cancel: Option<CancellationToken>,
    history: Vec<MergeReport>,
}

/// Holds selections and serializes merges
#[derive(Debug)]
pub struct MergeSession {
    selections: Mutex<Vec<FileSelection>>,
    inner: Mutex<Inner>,
}

impl Default for MergeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeSession {
    pub fn new() -> Self {
        Self {
            selections: Mutex::new(Vec::new()),
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                cancel: None,
                history: Vec::new(),
            }),
        }
    }

    /// Import workbooks and add them to the session
    ///
    /// A workbook already in the session is replaced by its fresh import.
    /// Returns how many workbooks were imported.
    pub fn import<P>(&self, paths: &[P], reader: &dyn WorkbookReader) -> Result<usize>
    where
        P: AsRef<Path> + Sync,
    {
        let imported = import_selections(paths, reader)?;
        let count = imported.len();
        for selection in imported {
            self.add_selection(selection);
        }
        Ok(count)
    }

    /// Add or replace a selection, matched by file path
    pub fn add_selection(&self, selection: FileSelection) {
        let mut selections = lock(&self.selections);
        match selections
            .iter_mut()
            .find(|s| s.file_path == selection.file_path)
        {
            Some(existing) => *existing = selection,
            None => selections.push(selection),
        }
    }

    /// Change which sheets of an imported workbook take part
    pub fn select_sheets<S: AsRef<str>>(&self, path: &Path, sheets: &[S]) -> Result<()> {
        let mut selections = lock(&self.selections);
        let selection = selections
            .iter_mut()
            .find(|s| s.file_path == path)
            .ok_or_else(|| {
                Error::InvalidArgument(format!("'{}' has not been imported", path.display()))
            })?;
        selection.select(sheets)
    }

    /// Drop a workbook from the session; true if it was present
    pub fn remove(&self, path: &Path) -> bool {
        let mut selections = lock(&self.selections);
        let before = selections.len();
        selections.retain(|s| s.file_path != path);
        selections.len() != before
    }

    pub fn clear(&self) {
        lock(&self.selections).clear();
    }

    /// Snapshot of the current selections
    pub fn selections(&self) -> Vec<FileSelection> {
        lock(&self.selections).clone()
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(lock(&self.inner).state, SessionState::Running { .. })
    }

    /// Reports of every merge completed in this session, oldest first
    pub fn history(&self) -> Vec<MergeReport> {
        lock(&self.inner).history.clone()
    }

    /// Cancel the running merge; false when nothing is running
    pub fn cancel(&self) -> bool {
        match &lock(&self.inner).cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Claim the session for a merge
    ///
    /// The returned guard must be completed with the merge outcome. Dropping
    /// it without completing marks the merge as failed.
    pub(crate) fn begin(&self, strategy: Strategy) -> Result<InFlight<'_>> {
        let mut inner = lock(&self.inner);
        if matches!(inner.state, SessionState::Running { .. }) {
            return Err(Error::MergeInProgress);
        }

        let started_at = Utc::now();
        let token = CancellationToken::new();
        inner.state = SessionState::Running {
            strategy,
            started_at,
        };
        inner.cancel = Some(token.clone());

        Ok(InFlight {
            session: self,
            strategy,
            started_at,
            token,
            done: false,
        })
    }

    /// Run one merge over the session's selections into `destination`
    ///
    /// The engine's cancellation token is replaced by the session's so that
    /// [`MergeSession::cancel`] reaches it.
    pub fn run(
        &self,
        engine: MergeEngine<'_>,
        key: &str,
        strategy: Strategy,
        destination: Destination<'_>,
    ) -> Result<MergeReport> {
        let selections = self.selections();
        let flight = self.begin(strategy)?;
        let engine = engine.with_cancellation(flight.token().clone());

        let result = execute(&engine, &selections, key, strategy, destination);
        flight.complete(result)
    }
}

/// Counts and location of a finished merge
struct Produced {
    rows: usize,
    columns: usize,
    location: Option<PathBuf>,
}

fn execute(
    engine: &MergeEngine<'_>,
    selections: &[FileSelection],
    key: &str,
    strategy: Strategy,
    destination: Destination<'_>,
) -> Result<Produced> {
    match (strategy, destination) {
        (Strategy::Direct, Destination::Cells(sink)) => {
            let outcome = engine.merge_direct(selections, key, sink)?;
            Ok(Produced {
                rows: outcome.rows,
                columns: outcome.columns,
                location: outcome.location,
            })
        }
        (strategy, Destination::Cells(sink)) => {
            let table = engine.merge(selections, key, strategy)?;
            engine.cancellation().check()?;
            let location = copy_to_sink(&table, sink)?;
            Ok(Produced {
                rows: table.row_count(),
                columns: table.column_count(),
                location,
            })
        }
        (strategy, Destination::Table(writer)) => {
            let table = engine.merge(selections, key, strategy)?;
            engine.cancellation().check()?;
            let location = writer.write_table(&table)?;
            Ok(Produced {
                rows: table.row_count(),
                columns: table.column_count(),
                location,
            })
        }
    }
}

/// A claimed session slot for one running merge
pub(crate) struct InFlight<'s> {
    session: &'s MergeSession,
    strategy: Strategy,
    started_at: DateTime<Utc>,
    token: CancellationToken,
    done: bool,
}

impl InFlight<'_> {
    /// Token the running merge must observe
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Record the merge outcome and release the session
    fn complete(mut self, result: Result<Produced>) -> Result<MergeReport> {
        self.done = true;
        let mut inner = lock(&self.session.inner);
        inner.cancel = None;

        match result {
            Ok(produced) => {
                let report = MergeReport {
                    strategy: self.strategy,
                    rows: produced.rows,
                    columns: produced.columns,
                    location: produced.location,
                    started_at: self.started_at,
                    finished_at: Utc::now(),
                };
                info!(
                    strategy = %report.strategy,
                    rows = report.rows,
                    columns = report.columns,
                    "merge completed"
                );
                inner.state = SessionState::Completed(report.clone());
                inner.history.push(report.clone());
                Ok(report)
            }
            Err(Error::Cancelled) => {
                info!(strategy = %self.strategy, "merge cancelled");
                inner.state = SessionState::Cancelled;
                Err(Error::Cancelled)
            }
            Err(e) => {
                warn!(strategy = %self.strategy, error = %e, "merge failed");
                inner.state = SessionState::Failed {
                    message: e.to_string(),
                };
                Err(e)
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut inner = lock(&self.session.inner);
        inner.cancel = None;
        inner.state = SessionState::Failed {
            message: "merge abandoned before completion".to_string(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::MergeEvent;
    use crate::reader::MemoryWorkbookReader;
    use crate::sink::GridSink;
    use crate::table::{MergedTable, Row};

    /// Captures the table handed to it
    #[derive(Default)]
    struct Captured(Option<MergedTable>);

    impl TableWriter for Captured {
        fn write_table(&mut self, table: &MergedTable) -> Result<Option<PathBuf>> {
            self.0 = Some(table.clone());
            Ok(None)
        }
    }

    fn reader() -> MemoryWorkbookReader {
        MemoryWorkbookReader::new()
            .with_sheet(
                "a.xlsx",
                "S",
                &["ID", "Name"],
                vec![Row::from_values([Some("1"), Some("Ann")])],
            )
            .with_sheet(
                "b.xlsx",
                "T",
                &["ID", "City"],
                vec![Row::from_values([Some("2"), Some("Oslo")])],
            )
    }

    fn session(reader: &MemoryWorkbookReader) -> MergeSession {
        let session = MergeSession::new();
        session.import(&["a.xlsx", "b.xlsx"], reader).unwrap();
        session
    }

    #[test]
    fn test_run_records_report() {
        let reader = reader();
        let session = session(&reader);
        let mut captured = Captured::default();

        let report = session
            .run(
                MergeEngine::new(&reader),
                "id",
                Strategy::Streaming,
                Destination::Table(&mut captured),
            )
            .unwrap();

        assert_eq!(report.rows, 2);
        assert_eq!(report.columns, 3);
        assert!(report.finished_at >= report.started_at);
        assert_eq!(session.state(), SessionState::Completed(report.clone()));
        assert_eq!(session.history(), vec![report]);
        assert_eq!(captured.0.unwrap().row_count(), 2);
    }

    #[test]
    fn test_every_destination_gets_same_table() {
        let reader = reader();
        let session = session(&reader);

        for strategy in [Strategy::Batch, Strategy::Streaming, Strategy::Direct] {
            let mut captured = Captured::default();
            session
                .run(MergeEngine::new(&reader), "id", strategy, Destination::Table(&mut captured))
                .unwrap();

            let mut grid = GridSink::new();
            session
                .run(MergeEngine::new(&reader), "id", strategy, Destination::Cells(&mut grid))
                .unwrap();

            assert_eq!(grid.unwritten_cells(), 0);
            assert_eq!(captured.0.unwrap(), grid.into_table());
        }
    }

    #[test]
    fn test_second_merge_rejected_while_running() {
        let reader = reader();
        let session = session(&reader);

        let flight = session.begin(Strategy::Batch).unwrap();
        assert!(session.is_running());
        assert!(matches!(
            session.begin(Strategy::Batch),
            Err(Error::MergeInProgress)
        ));

        let mut grid = GridSink::new();
        let err = session
            .run(MergeEngine::new(&reader), "id", Strategy::Direct, Destination::Cells(&mut grid))
            .unwrap_err();
        assert!(matches!(err, Error::MergeInProgress));

        drop(flight);
        assert!(matches!(session.state(), SessionState::Failed { .. }));
        assert!(session.begin(Strategy::Batch).is_ok());
    }

    #[test]
    fn test_cancel_running_merge() {
        let reader = reader();
        let session = session(&reader);
        let progress = |event: MergeEvent| {
            if matches!(event, MergeEvent::KeysCollected { .. }) {
                assert!(session.cancel());
            }
        };
        let mut grid = GridSink::new();

        let err = session
            .run(
                MergeEngine::new(&reader).with_progress(&progress),
                "id",
                Strategy::Batch,
                Destination::Cells(&mut grid),
            )
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(!session.cancel());
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_failure_recorded() {
        let reader = reader();
        let session = session(&reader);
        let mut grid = GridSink::new();

        let err = session
            .run(MergeEngine::new(&reader), "missing", Strategy::Batch, Destination::Cells(&mut grid))
            .unwrap_err();

        assert!(matches!(err, Error::MissingKeyColumn { .. }));
        assert!(matches!(session.state(), SessionState::Failed { .. }));
    }

    #[test]
    fn test_selection_management() {
        let reader = reader();
        let session = session(&reader);
        assert_eq!(session.selections().len(), 2);

        session.import(&["a.xlsx"], &reader).unwrap();
        assert_eq!(session.selections().len(), 2);

        session.select_sheets::<&str>(Path::new("a.xlsx"), &[]).unwrap();
        assert!(session.selections()[0].selected_sheets().is_empty());
        assert!(session.select_sheets(Path::new("zzz.xlsx"), &["S"]).is_err());

        assert!(session.remove(Path::new("b.xlsx")));
        assert!(!session.remove(Path::new("b.xlsx")));
        session.clear();
        assert!(session.selections().is_empty());
    }
}
