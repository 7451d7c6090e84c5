//! Repeatable merge jobs stored as JSON

use crate::error::{Error, FileFailure, Result};
use crate::merger::{MergeEngine, MergeOptions, Strategy};
use crate::progress::ProgressSink;
use crate::reader::{WorkbookReader, DEFAULT_CHUNK_SIZE};
use crate::scanner::import_selections;
use crate::session::{Destination, MergeReport, MergeSession};
use crate::table::FileSelection;
use crate::writer::{CsvGridSink, CsvTableWriter, JsonTableWriter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File format of a job's output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Csv => f.write_str("csv"),
            OutputFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            other => Err(Error::InvalidArgument(format!(
                "unknown output format '{}', expected csv or json",
                other
            ))),
        }
    }
}

/// One workbook in a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInput {
    pub path: PathBuf,
    /// Sheets to merge; every sheet with headers when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheets: Option<Vec<String>>,
}

impl JobInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sheets: None,
        }
    }

    pub fn with_sheets(path: impl Into<PathBuf>, sheets: Vec<String>) -> Self {
        Self {
            path: path.into(),
            sheets: Some(sheets),
        }
    }
}

/// A merge job that can be saved, edited and re-run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeJob {
    pub inputs: Vec<JobInput>,
    /// Key column name, matched after header normalization
    pub key: String,
    #[serde(default)]
    pub strategy: Strategy,
    /// Rows per streamed chunk; the engine default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    pub output: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
}

impl MergeJob {
    /// Load a job from JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| Error::FileRead {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(Error::Json)
    }

    /// Save the job to JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Example job used by `create-job`
    pub fn template() -> Self {
        Self {
            inputs: vec![
                JobInput::new("customers.xlsx"),
                JobInput::with_sheets("orders.xlsx", vec!["2024".to_string()]),
            ],
            key: "Customer ID".to_string(),
            strategy: Strategy::Batch,
            chunk_size: Some(DEFAULT_CHUNK_SIZE),
            output: PathBuf::from("merged.csv"),
            format: OutputFormat::Csv,
        }
    }

    pub fn options(&self) -> MergeOptions {
        let mut options = MergeOptions::default();
        if let Some(chunk_size) = self.chunk_size {
            options.chunk_size = chunk_size;
        }
        options
    }

    /// Import every input and apply its sheet list
    ///
    /// Unreadable files and unknown sheet names are all reported together.
    pub fn selections(&self, reader: &dyn WorkbookReader) -> Result<Vec<FileSelection>> {
        let paths: Vec<&Path> = self.inputs.iter().map(|i| i.path.as_path()).collect();
        let mut selections = import_selections(&paths, reader)?;

        let mut failures = Vec::new();
        for (input, selection) in self.inputs.iter().zip(selections.iter_mut()) {
            if let Some(sheets) = &input.sheets {
                if let Err(e) = selection.select(sheets) {
                    failures.push(FileFailure::new(input.path.clone(), &e));
                }
            }
        }

        if failures.is_empty() {
            Ok(selections)
        } else {
            Err(Error::ReadFailures(failures))
        }
    }

    /// Import the inputs into `session` and run the merge to `output`
    ///
    /// Direct jobs with CSV output go through [`CsvGridSink`], which holds
    /// the whole grid until the merge finishes.
    pub fn run(
        &self,
        session: &MergeSession,
        reader: &dyn WorkbookReader,
        progress: &dyn ProgressSink,
    ) -> Result<MergeReport> {
        for selection in self.selections(reader)? {
            session.add_selection(selection);
        }

        let engine = MergeEngine::new(reader)
            .with_progress(progress)
            .with_options(self.options());

        match (self.strategy, self.format) {
            (Strategy::Direct, OutputFormat::Csv) => {
                let mut sink = CsvGridSink::new(&self.output);
                session.run(engine, &self.key, self.strategy, Destination::Cells(&mut sink))
            }
            (_, OutputFormat::Csv) => {
                let mut writer = CsvTableWriter::new(&self.output);
                session.run(engine, &self.key, self.strategy, Destination::Table(&mut writer))
            }
            (_, OutputFormat::Json) => {
                let mut writer = JsonTableWriter::new(&self.output);
                session.run(engine, &self.key, self.strategy, Destination::Table(&mut writer))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::reader::MemoryWorkbookReader;
    use crate::table::Row;
    use tempfile::TempDir;

    fn reader() -> MemoryWorkbookReader {
        MemoryWorkbookReader::new()
            .with_sheet(
                "a.xlsx",
                "S1",
                &["ID", "X"],
                vec![Row::from_values([Some("1"), Some("x")])],
            )
            .with_sheet(
                "a.xlsx",
                "S2",
                &["ID", "Y"],
                vec![Row::from_values([Some("1"), Some("y")])],
            )
    }

    #[test]
    fn test_job_round_trips_through_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.json");
        let job = MergeJob::template();

        job.save(&path).unwrap();
        assert_eq!(MergeJob::load(&path).unwrap(), job);
    }

    #[test]
    fn test_job_defaults() {
        let job: MergeJob = serde_json::from_str(
            r#"{"inputs": [{"path": "a.xlsx"}], "key": "id", "output": "out.csv"}"#,
        )
        .unwrap();

        assert_eq!(job.strategy, Strategy::Batch);
        assert_eq!(job.format, OutputFormat::Csv);
        assert_eq!(job.options(), MergeOptions::default());
        assert_eq!(job.inputs[0].sheets, None);
    }

    #[test]
    fn test_selections_apply_sheet_lists() {
        let job = MergeJob {
            inputs: vec![JobInput::with_sheets("a.xlsx", vec!["S2".to_string()])],
            key: "id".to_string(),
            strategy: Strategy::Streaming,
            chunk_size: Some(1),
            output: PathBuf::from("out.csv"),
            format: OutputFormat::Csv,
        };

        let selections = job.selections(&reader()).unwrap();
        assert_eq!(selections[0].selected_sheets(), ["S2".to_string()]);
        assert_eq!(job.options().chunk_size, 1);
    }

    #[test]
    fn test_unknown_sheet_reported() {
        let mut job = MergeJob::template();
        job.inputs = vec![JobInput::with_sheets("a.xlsx", vec!["Nope".to_string()])];
        assert!(matches!(
            job.selections(&reader()),
            Err(Error::ReadFailures(ref f)) if f.len() == 1
        ));
    }

    #[test]
    fn test_run_writes_every_format() {
        let dir = TempDir::new().unwrap();
        let reader = reader();

        for (strategy, format, name) in [
            (Strategy::Direct, OutputFormat::Csv, "direct.csv"),
            (Strategy::Batch, OutputFormat::Csv, "batch.csv"),
            (Strategy::Streaming, OutputFormat::Json, "streaming.json"),
        ] {
            let job = MergeJob {
                inputs: vec![JobInput::new("a.xlsx")],
                key: "id".to_string(),
                strategy,
                chunk_size: None,
                output: dir.path().join(name),
                format,
            };
            let session = MergeSession::new();
            let report = job.run(&session, &reader, &NoProgress).unwrap();

            assert_eq!(report.rows, 1);
            assert_eq!(report.columns, 3);
            assert_eq!(report.location.as_deref(), Some(job.output.as_path()));
            assert!(job.output.exists());
        }

        let csv = fs::read_to_string(dir.path().join("direct.csv")).unwrap();
        assert_eq!(csv, "Key,a:S1:X,a:S2:Y\n1,x,y\n");
        assert_eq!(
            csv,
            fs::read_to_string(dir.path().join("batch.csv")).unwrap()
        );
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
