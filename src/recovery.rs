//! Reverting and replaying runs from their operation logs.

use crate::atomic;
use crate::backup::BackupStore;
use crate::config::LogFormat;
use crate::engine::{replace_all, Occurrence};
use crate::errors::{file_error, Error, Result};
use crate::mapping::strip_csv_noise;
use crate::oplog::LogEntry;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Number of columns in a CSV log row.
const CSV_COLUMNS: usize = 5;

/// Statistics from a revert or apply pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Entries whose file was restored or rewritten.
    pub succeeded: usize,
    /// Entries that were not modified or recorded an error.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    fn verb(self) -> &'static str {
        match self {
            Direction::Forward => "apply",
            Direction::Reverse => "revert",
        }
    }

    fn pair(self, occ: &Occurrence) -> (&str, &str) {
        match self {
            Direction::Forward => (occ.from.as_str(), occ.to.as_str()),
            Direction::Reverse => (occ.to.as_str(), occ.from.as_str()),
        }
    }
}

/// Reads the entries of a JSON or CSV operation log.
pub fn parse_log(path: &Path, format: LogFormat) -> Result<Vec<LogEntry>> {
    let content = fs::read_to_string(path).map_err(|e| file_error(path, e))?;
    match format {
        LogFormat::Json => parse_json(path, &content),
        LogFormat::Csv => parse_csv(path, &content),
        LogFormat::Summary => Err(Error::parsing(path, "unsupported log format: summary")),
    }
}

/// Parses a JSON report. Anything before the first `{` is ignored.
fn parse_json(path: &Path, content: &str) -> Result<Vec<LogEntry>> {
    #[derive(Deserialize)]
    struct LoggedRun {
        #[serde(default)]
        entries: Vec<LogEntry>,
    }

    let start = content
        .find('{')
        .ok_or_else(|| Error::parsing(path, "no JSON content found in log file"))?;
    let run: LoggedRun = serde_json::from_str(&content[start..])
        .map_err(|e| Error::parsing(path, "invalid JSON log").with_source(e))?;
    Ok(run.entries)
}

/// Rebuilds entries from a CSV report by grouping occurrence rows per file.
///
/// Every file that appears is treated as modified. Blank and `#` lines are
/// ignored wherever they appear, short rows are skipped and entries keep the
/// order in which their file first appears.
fn parse_csv(path: &Path, content: &str) -> Result<Vec<LogEntry>> {
    let content = strip_csv_noise(content);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(content.as_bytes());

    let header = reader
        .headers()
        .map_err(|e| Error::parsing(path, "failed to parse CSV data").with_source(e))?;
    if header.is_empty() {
        return Err(Error::parsing(path, "no CSV data found in log file"));
    }

    let mut entries: Vec<LogEntry> = Vec::new();
    let mut index: HashMap<PathBuf, usize> = HashMap::new();

    for record in reader.records() {
        let record = record.map_err(|e| Error::parsing(path, "failed to parse CSV data").with_source(e))?;
        if record.len() < CSV_COLUMNS {
            let line = record.position().map_or(0, |p| p.line());
            log::warn!("Skipping malformed CSV log row at line {line}");
            continue;
        }

        let file_path = PathBuf::from(&record[0]);
        let slot = *index.entry(file_path.clone()).or_insert_with(|| {
            entries.push(LogEntry {
                timestamp: String::new(),
                file_path,
                original_size: 0,
                new_size: 0,
                modified: true,
                occurrences: Vec::new(),
                backup_path: None,
                error: None,
            });
            entries.len() - 1
        });
        entries[slot].occurrences.push(csv_occurrence(&record));
    }

    Ok(entries)
}

fn csv_occurrence(record: &StringRecord) -> Occurrence {
    Occurrence {
        from: record[1].to_string(),
        to: record[2].to_string(),
        line: record[3].parse().unwrap_or(0),
        column: record[4].parse().unwrap_or(0),
        line_text: String::new(),
        byte_offset: 0,
        new_text: None,
    }
}

/// Undoes or redoes the changes recorded in an operation log.
///
/// Both passes are best-effort: every eligible entry is attempted, and the
/// call fails afterwards if any of them failed, carrying the first error.
#[derive(Debug, Clone, Copy)]
pub struct Replayer {
    backups: BackupStore,
    clean_backups: bool,
}

impl Default for Replayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Replayer {
    pub fn new() -> Self {
        Self {
            backups: BackupStore::new(true),
            clean_backups: false,
        }
    }

    /// Removes backup files after they have been restored.
    pub fn with_backup_cleanup(mut self, clean: bool) -> Self {
        self.clean_backups = clean;
        self
    }

    pub fn revert_from_log(&self, log_path: &Path, format: LogFormat) -> Result<ReplaySummary> {
        let entries = parse_log(log_path, format)?;
        self.revert(&entries, log_path)
    }

    pub fn apply_from_log(&self, log_path: &Path, format: LogFormat) -> Result<ReplaySummary> {
        let entries = parse_log(log_path, format)?;
        self.apply(&entries, log_path)
    }

    /// Restores each modified file from its backup, or reverses its recorded
    /// occurrences when no backup was taken.
    pub fn revert(&self, entries: &[LogEntry], source: &Path) -> Result<ReplaySummary> {
        self.replay(entries, source, Direction::Reverse)
    }

    /// Re-applies each modified file's recorded occurrences.
    pub fn apply(&self, entries: &[LogEntry], source: &Path) -> Result<ReplaySummary> {
        self.replay(entries, source, Direction::Forward)
    }

    fn replay(&self, entries: &[LogEntry], source: &Path, direction: Direction) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();
        let mut errors = Vec::new();

        for entry in entries {
            if !entry.is_replayable() {
                summary.skipped += 1;
                continue;
            }
            let outcome = match direction {
                Direction::Reverse => self.revert_entry(entry),
                Direction::Forward => rewrite(entry, direction),
            };
            match outcome {
                Ok(()) => summary.succeeded += 1,
                Err(err) => {
                    log::warn!("{} failed for {}: {}", direction.verb(), entry.file_path.display(), err);
                    errors.push(err);
                }
            }
        }

        let failed = errors.len();
        match errors.into_iter().next() {
            None => Ok(summary),
            Some(first) => Err(Error::backup(
                source,
                format!(
                    "{} completed with {} successes and {} errors",
                    direction.verb(),
                    summary.succeeded,
                    failed
                ),
            )
            .with_source(first)),
        }
    }

    fn revert_entry(&self, entry: &LogEntry) -> Result<()> {
        match entry.backup_path.as_deref() {
            Some(backup) if !backup.as_os_str().is_empty() => {
                self.backups.restore(&entry.file_path, backup)?;
                if self.clean_backups {
                    self.backups.cleanup(backup)?;
                }
                log::info!("Restored {} from {}", entry.file_path.display(), backup.display());
                Ok(())
            }
            _ => rewrite(entry, Direction::Reverse),
        }
    }
}

/// Substitutes each recorded occurrence in log order, case-sensitively.
fn rewrite(entry: &LogEntry, direction: Direction) -> Result<()> {
    let path = &entry.file_path;
    let mut content = fs::read(path).map_err(|e| file_error(path, e))?;
    let mut changed = false;

    for occ in &entry.occurrences {
        let (from, to) = direction.pair(occ);
        if let Some(updated) = replace_all(&content, from.as_bytes(), to.as_bytes(), true) {
            content = updated;
            changed = true;
        }
    }

    if changed {
        atomic::rewrite_preserving_permissions(path, &content)?;
        log::info!("{}: {}", direction.verb(), path.display());
    }
    Ok(())
}
