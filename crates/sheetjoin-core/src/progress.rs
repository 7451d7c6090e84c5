//! Progress events emitted while a merge runs
//!
//! Events are plain values handed to a [`ProgressSink`]. How they are shown
//! (log line, status bar, nothing at all) is up to the receiver.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use crate::merger::Strategy;

/// A step in the life of a merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MergeEvent {
    /// Validation passed and the strategy is starting
    Started { strategy: Strategy, sheets: usize },
    /// A selected sheet had no headers and was left out
    SheetSkipped { file_name: String, sheet_name: String },
    /// A file finished its read phase
    FileRead { path: PathBuf, sheets: usize },
    /// A sheet finished a pass over its rows
    SheetScanned {
        file_name: String,
        sheet_name: String,
        rows: usize,
    },
    /// Rows with a blank key were dropped from a sheet
    KeylessRowsDropped {
        file_name: String,
        sheet_name: String,
        rows: usize,
    },
    /// Distinct keys are known and output rows are sized
    KeysCollected { keys: usize, rows: usize },
    /// Output rows emitted so far
    RowsEmitted { rows: usize, total: usize },
    /// The merge finished
    Finished { rows: usize, columns: usize },
}

/// Receiver of merge progress
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: MergeEvent);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: MergeEvent) {}
}

impl<F> ProgressSink for F
where
    F: Fn(MergeEvent) + Send + Sync,
{
    fn emit(&self, event: MergeEvent) {
        self(event)
    }
}

/// Forwards events over an `mpsc` channel
#[derive(Debug, Clone)]
pub struct ChannelProgress(pub Sender<MergeEvent>);

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: MergeEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.0.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Mutex;

    #[test]
    fn test_channel_sink_forwards_events() {
        let (tx, rx) = mpsc::channel();
        ChannelProgress(tx).emit(MergeEvent::Finished { rows: 4, columns: 3 });
        assert_eq!(
            rx.recv().unwrap(),
            MergeEvent::Finished { rows: 4, columns: 3 }
        );
    }

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |event: MergeEvent| seen.lock().unwrap().push(event);
        sink.emit(MergeEvent::KeysCollected { keys: 2, rows: 3 });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_string(&MergeEvent::RowsEmitted { rows: 1, total: 2 }).unwrap();
        assert_eq!(json, r#"{"event":"rows_emitted","rows":1,"total":2}"#);
    }
}
