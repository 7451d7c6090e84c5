//! sheetjoin CLI
//!
//! Command-line tool for discovering workbooks and joining their sheets on a
//! shared key column.

use clap::{Parser, Subcommand};
use sheetjoin_core::{
    scan_inputs, AutoReader, JobInput, MergeEngine, MergeEvent, MergeJob, MergeSession,
    MergedTable, ProgressSink, WorkbookReader,
};
use std::path::{Path, PathBuf};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sheetjoin")]
#[command(about = "Join spreadsheet sheets on a shared key column", long_about = None)]
#[command(version)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find workbooks under one or more roots
    Scan {
        /// Root directories or files to scan
        #[arg(short, long, required = true)]
        root: Vec<PathBuf>,
    },

    /// List the sheets and headers of workbooks
    Sheets {
        /// Workbook files
        #[arg(short, long, required = true)]
        file: Vec<PathBuf>,
    },

    /// Merge sheets on a key column
    Merge {
        /// Workbook to include, optionally limited to sheets: PATH[@Sheet1,Sheet2]
        #[arg(short, long, required = true)]
        file: Vec<String>,

        /// Key column name
        #[arg(short, long)]
        key: String,

        /// Merge strategy (batch, streaming or direct). Direct output to a
        /// CSV file is buffered in memory until the merge completes
        #[arg(short, long, default_value = "batch")]
        strategy: String,

        /// Rows per streamed chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Output file; prints a preview when absent
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format (csv or json)
        #[arg(long, default_value = "csv")]
        format: String,

        /// Maximum number of rows to preview
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Print progress events to stderr as JSON lines
        #[arg(long)]
        progress: bool,
    },

    /// Run a saved merge job
    Run {
        /// Path to job file (JSON)
        #[arg(short, long)]
        job: PathBuf,

        /// Print progress events to stderr as JSON lines
        #[arg(long)]
        progress: bool,
    },

    /// Create a merge job template
    CreateJob {
        /// Output path for the job file
        #[arg(short, long)]
        output: PathBuf,

        /// Workbooks to include: PATH[@Sheet1,Sheet2]
        #[arg(short, long)]
        file: Vec<String>,

        /// Key column name
        #[arg(short, long)]
        key: Option<String>,
    },
}

fn main() {
    match run() {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {
            eprintln!("Cancelled");
            std::process::exit(130);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> sheetjoin_core::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::WARN.into())
    };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    match cli.command {
        Commands::Scan { root } => cmd_scan(&root),
        Commands::Sheets { file } => cmd_sheets(&file),
        Commands::Merge {
            file,
            key,
            strategy,
            chunk_size,
            output,
            format,
            limit,
            progress,
        } => {
            let job = MergeJob {
                inputs: file.iter().map(|f| parse_input(f)).collect(),
                key,
                strategy: strategy.parse()?,
                chunk_size,
                output: output.clone().unwrap_or_default(),
                format: format.parse()?,
            };
            match output {
                Some(_) => cmd_run_job(&job, progress),
                None => cmd_preview(&job, limit, progress),
            }
        }
        Commands::Run { job, progress } => cmd_run_job(&MergeJob::load(&job)?, progress),
        Commands::CreateJob { output, file, key } => cmd_create_job(&output, &file, key),
    }
}

/// Split `PATH[@Sheet1,Sheet2]` at the last '@'
///
/// An argument naming an existing file is taken as a plain path, so paths
/// containing '@' still work without a sheet list.
fn parse_input(arg: &str) -> JobInput {
    if Path::new(arg).exists() {
        return JobInput::new(arg);
    }
    match arg.rsplit_once('@') {
        Some((path, sheets)) if !path.is_empty() => {
            let sheets: Vec<String> = sheets
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            JobInput::with_sheets(path, sheets)
        }
        _ => JobInput::new(arg),
    }
}

/// Writes every merge event to stderr as one JSON line
struct JsonLines;

impl ProgressSink for JsonLines {
    fn emit(&self, event: MergeEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            eprintln!("{}", line);
        }
    }
}

/// Logs merge events at debug level
struct LogProgress;

impl ProgressSink for LogProgress {
    fn emit(&self, event: MergeEvent) {
        debug!(?event, "progress");
    }
}

fn progress_sink(json: bool) -> &'static dyn ProgressSink {
    if json {
        &JsonLines
    } else {
        &LogProgress
    }
}

fn cmd_scan(roots: &[PathBuf]) -> sheetjoin_core::Result<()> {
    let result = scan_inputs(roots)?;

    println!("Scanned {} root(s):", result.roots.len());
    for root in &result.roots {
        println!("  {}", root.display());
    }
    println!();
    println!("Found {} workbook(s)", result.total_files());
    for file in &result.files {
        println!("  {}", file.display());
    }

    Ok(())
}

fn cmd_sheets(files: &[PathBuf]) -> sheetjoin_core::Result<()> {
    let reader = AutoReader::new();

    for file in files {
        let sheets = reader.list_sheets(file)?;
        println!("{} ({} sheets)", file.display(), sheets.len());
        for sheet in &sheets {
            if sheet.is_eligible() {
                println!("  {} [{}]", sheet.sheet_name, sheet.headers.join(", "));
            } else {
                println!("  {} (no headers, skipped)", sheet.sheet_name);
            }
        }
        println!();
    }

    Ok(())
}

fn cmd_preview(job: &MergeJob, limit: usize, progress: bool) -> sheetjoin_core::Result<()> {
    let reader = AutoReader::new();
    let selections = job.selections(&reader)?;
    let table = MergeEngine::new(&reader)
        .with_progress(progress_sink(progress))
        .with_options(job.options())
        .merge(&selections, &job.key, job.strategy)?;

    print_table(&table, limit);
    Ok(())
}

fn cmd_run_job(job: &MergeJob, progress: bool) -> sheetjoin_core::Result<()> {
    let reader = AutoReader::new();
    let session = MergeSession::new();
    let report = job.run(&session, &reader, progress_sink(progress))?;

    let elapsed = report.finished_at - report.started_at;
    println!(
        "Merged {} rows x {} columns using the {} strategy in {} ms",
        report.rows,
        report.columns,
        report.strategy,
        elapsed.num_milliseconds()
    );
    if let Some(location) = &report.location {
        println!("Wrote {}", location.display());
    }

    Ok(())
}

fn cmd_create_job(output: &Path, files: &[String], key: Option<String>) -> sheetjoin_core::Result<()> {
    let mut job = MergeJob::template();
    if !files.is_empty() {
        job.inputs = files.iter().map(|f| parse_input(f)).collect();
    }
    if let Some(key) = key {
        job.key = key;
    }

    job.save(output)?;
    println!("Created job file: {}", output.display());
    println!("Inputs: {}", job.inputs.len());
    println!("Key: {}", job.key);
    println!();
    println!("Edit the file to configure your merge, then run:");
    println!("  sheetjoin run --job {}", output.display());

    Ok(())
}

fn print_table(table: &MergedTable, limit: usize) {
    println!("{}", table.headers.join("\t"));
    println!("{}", "-".repeat(table.column_count() * 12));

    for row in table.rows.iter().take(limit) {
        let values: Vec<&str> = row
            .cells
            .iter()
            .map(|c| c.as_deref().unwrap_or(""))
            .collect();
        println!("{}", values.join("\t"));
    }

    if table.row_count() > limit {
        println!("... ({} more rows)", table.row_count() - limit);
    }
    println!();
    println!("{} rows x {} columns", table.row_count(), table.column_count());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_with_sheets() {
        let input = parse_input("data/sales.xlsx@Q1, Q2");
        assert_eq!(input.path, PathBuf::from("data/sales.xlsx"));
        assert_eq!(input.sheets, Some(vec!["Q1".to_string(), "Q2".to_string()]));
    }

    #[test]
    fn test_parse_input_splits_at_last_at() {
        let input = parse_input("me@home/book.xlsx@Sheet1");
        assert_eq!(input.path, PathBuf::from("me@home/book.xlsx"));
        assert_eq!(input.sheets, Some(vec!["Sheet1".to_string()]));
    }

    #[test]
    fn test_parse_input_plain_path() {
        let input = parse_input("book.xlsx");
        assert_eq!(input.sheets, None);
    }

    #[test]
    fn test_cli_parses_merge() {
        let cli = Cli::try_parse_from([
            "sheetjoin", "merge", "-f", "a.csv", "-f", "b.xlsx@S", "-k", "ID", "--strategy",
            "direct", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Merge { ref file, .. } if file.len() == 2));
    }
}
