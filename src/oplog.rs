//! The operation log: one entry per processed file plus run totals.
//!
//! JSON and CSV reports can be fed back to `recovery` to revert or replay a
//! run. The summary report is for people only.

use crate::config::LogFormat;
use crate::engine::Occurrence;
use crate::errors::Result;
use crate::scheduler::JobResult;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// What happened to a single file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub timestamp: String,
    pub file_path: PathBuf,
    #[serde(default)]
    pub original_size: u64,
    #[serde(default)]
    pub new_size: u64,
    #[serde(default)]
    pub modified: bool,
    #[serde(rename = "replacements", default, skip_serializing_if = "Vec::is_empty")]
    pub occurrences: Vec<Occurrence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntry {
    /// Builds the entry for a finished job.
    ///
    /// Failed jobs keep only the error and backup path; sizes and
    /// occurrences are recorded for successful ones.
    pub fn from_result(result: &JobResult) -> Self {
        let mut entry = LogEntry {
            timestamp: Local::now().to_rfc3339(),
            file_path: result.job.path.clone(),
            original_size: 0,
            new_size: 0,
            modified: false,
            occurrences: Vec::new(),
            backup_path: result.backup_path.clone(),
            error: result.error.as_ref().map(|e| e.to_string()),
        };

        if entry.error.is_none() {
            if let Some(outcome) = &result.outcome {
                entry.original_size = outcome.original_size;
                entry.new_size = outcome.new_size;
                entry.modified = outcome.modified;
                entry.occurrences = outcome.occurrences.clone();
            }
        }
        entry
    }

    /// Entries eligible for revert or apply.
    pub fn is_replayable(&self) -> bool {
        self.modified && self.error.is_none()
    }
}

/// Aggregate counts for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total_files: usize,
    pub modified_files: usize,
    pub total_replacements: usize,
    pub error_count: usize,
    pub processing_time_ms: u64,
    pub dry_run: bool,
}

impl Summary {
    fn mode(&self) -> &'static str {
        if self.dry_run { "dry-run" } else { "production" }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    summary: &'a Summary,
    entries: &'a [LogEntry],
}

/// Collects job results and renders them as a report.
#[derive(Debug, Default)]
pub struct OperationLog {
    entries: Vec<LogEntry>,
    summary: Summary,
}

impl OperationLog {
    pub fn new(dry_run: bool) -> Self {
        Self {
            entries: Vec::new(),
            summary: Summary {
                dry_run,
                ..Summary::default()
            },
        }
    }

    /// Adds one job result to the log and updates the totals.
    pub fn record(&mut self, result: &JobResult) {
        let entry = LogEntry::from_result(result);

        if entry.error.is_some() {
            self.summary.error_count += 1;
        } else if entry.modified {
            self.summary.modified_files += 1;
            self.summary.total_replacements += entry.occurrences.len();
        }
        self.summary.total_files += 1;
        self.entries.push(entry);
    }

    pub fn set_processing_time(&mut self, elapsed: Duration) {
        self.summary.processing_time_ms = elapsed.as_millis() as u64;
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn has_errors(&self) -> bool {
        self.summary.error_count > 0
    }

    /// Writes the report in `format` to `writer`.
    pub fn write_report<W: Write>(&self, writer: &mut W, format: LogFormat) -> Result<()> {
        match format {
            LogFormat::Json => self.write_json(writer),
            LogFormat::Csv => self.write_csv(writer),
            LogFormat::Summary => self.write_summary(writer),
        }
    }

    fn write_json<W: Write>(&self, writer: &mut W) -> Result<()> {
        let report = Report {
            summary: &self.summary,
            entries: &self.entries,
        };
        serde_json::to_writer_pretty(&mut *writer, &report)?;
        writeln!(writer)?;
        Ok(())
    }

    /// One row per occurrence, then `#` comment lines with the totals.
    fn write_csv<W: Write>(&self, writer: &mut W) -> Result<()> {
        {
            let mut wtr = csv::Writer::from_writer(&mut *writer);
            wtr.write_record(["file_path", "old_string", "new_string", "line", "column"])?;

            for entry in &self.entries {
                let path = entry.file_path.display().to_string();
                for occ in &entry.occurrences {
                    let line = occ.line.to_string();
                    let column = occ.column.to_string();
                    wtr.write_record([
                        path.as_str(),
                        occ.from.as_str(),
                        occ.to.as_str(),
                        line.as_str(),
                        column.as_str(),
                    ])?;
                }
            }
            wtr.flush()?;
        }

        let s = &self.summary;
        writeln!(writer, "# Remap CSV Report ({})", s.mode())?;
        writeln!(writer, "# Total files processed: {}", s.total_files)?;
        writeln!(writer, "# Files modified: {}", s.modified_files)?;
        writeln!(writer, "# Total replacements: {}", s.total_replacements)?;
        writeln!(writer, "# Errors: {}", s.error_count)?;
        writeln!(writer, "# Processing time: {:?}", self.processing_time())?;
        writeln!(writer, "#")?;
        Ok(())
    }

    fn write_summary<W: Write>(&self, writer: &mut W) -> Result<()> {
        let s = &self.summary;
        writeln!(writer, "\n=== Remap Summary ({}) ===", s.mode())?;
        writeln!(writer, "Total files processed: {}", s.total_files)?;
        writeln!(writer, "Files modified: {}", s.modified_files)?;
        writeln!(writer, "Total replacements: {}", s.total_replacements)?;
        writeln!(writer, "Errors: {}", s.error_count)?;
        writeln!(writer, "Processing time: {:?}", self.processing_time())?;

        if s.error_count > 0 {
            writeln!(writer, "\nErrors encountered:")?;
            for entry in &self.entries {
                if let Some(err) = &entry.error {
                    writeln!(writer, "  {}: {}", entry.file_path.display(), err)?;
                }
            }
        }
        Ok(())
    }

    fn processing_time(&self) -> Duration {
        Duration::from_millis(self.summary.processing_time_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::FileDescriptor;
    use crate::engine::FileOutcome;
    use crate::errors::Error;
    use crate::scheduler::Job;

    fn occurrence(from: &str, to: &str, line: usize, column: usize) -> Occurrence {
        Occurrence {
            from: from.into(),
            to: to.into(),
            line,
            column,
            line_text: format!("{from} here"),
            byte_offset: 0,
            new_text: None,
        }
    }

    fn job(path: &str) -> Job {
        Job::from(FileDescriptor {
            path: PathBuf::from(path),
            size: 10,
            modified: None,
        })
    }

    fn results() -> Vec<JobResult> {
        vec![
            JobResult {
                job: job("/tmp/a.txt"),
                outcome: Some(FileOutcome {
                    path: PathBuf::from("/tmp/a.txt"),
                    occurrences: vec![occurrence("old1", "new1", 1, 1), occurrence("old2", "new2", 3, 7)],
                    modified: true,
                    original_size: 10,
                    new_size: 10,
                }),
                backup_path: Some(PathBuf::from("/tmp/a.txt.20240101_120000.bak")),
                error: None,
            },
            JobResult {
                job: job("/tmp/b.txt"),
                outcome: Some(FileOutcome {
                    path: PathBuf::from("/tmp/b.txt"),
                    ..FileOutcome::default()
                }),
                backup_path: None,
                error: None,
            },
            JobResult {
                job: job("/tmp/c.txt"),
                outcome: None,
                backup_path: None,
                error: Some(Error::file("/tmp/c.txt", "file not found")),
            },
        ]
    }

    fn log() -> OperationLog {
        let mut log = OperationLog::new(false);
        for r in results() {
            log.record(&r);
        }
        log.set_processing_time(Duration::from_millis(1500));
        log
    }

    fn render(log: &OperationLog, format: LogFormat) -> String {
        let mut out = Vec::new();
        log.write_report(&mut out, format).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn summary_counts() {
        let log = log();
        assert_eq!(
            log.summary(),
            &Summary {
                total_files: 3,
                modified_files: 1,
                total_replacements: 2,
                error_count: 1,
                processing_time_ms: 1500,
                dry_run: false,
            }
        );
        assert!(log.has_errors());
        assert!(log.entries()[0].is_replayable());
        assert!(!log.entries()[2].is_replayable());
    }

    #[test]
    fn json_report_round_trips_entries() {
        let log = log();
        let json = render(&log, LogFormat::Json);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["total_replacements"], 2);
        assert_eq!(value["entries"][0]["replacements"][1]["column"], 7);
        assert!(value["entries"][1].get("replacements").is_none());
        assert!(value["entries"][0]["replacements"][0].get("new_text").is_none());

        #[derive(Deserialize)]
        struct Parsed {
            entries: Vec<LogEntry>,
        }
        let parsed: Parsed = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.entries, log.entries());
    }

    #[test]
    fn csv_report_has_one_row_per_occurrence() {
        let csv = render(&log(), LogFormat::Csv);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "file_path,old_string,new_string,line,column");
        assert_eq!(lines[1], "/tmp/a.txt,old1,new1,1,1");
        assert_eq!(lines[2], "/tmp/a.txt,old2,new2,3,7");
        assert_eq!(lines[3], "# Remap CSV Report (production)");
        assert!(lines[3..].iter().all(|l| l.starts_with('#')));
        assert!(csv.contains("# Errors: 1"));
    }

    #[test]
    fn summary_report_lists_errors() {
        let mut log = log();
        log.summary.dry_run = true;
        let text = render(&log, LogFormat::Summary);

        assert!(text.contains("=== Remap Summary (dry-run) ==="));
        assert!(text.contains("Files modified: 1"));
        assert!(text.contains("Errors encountered:"));
        assert!(text.contains("/tmp/c.txt: file error for /tmp/c.txt: file not found"));
    }
}
