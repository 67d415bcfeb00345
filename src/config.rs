use crate::errors::{Error, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Output formats for the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty-printed `{summary, entries}` object. Replayable.
    Json,
    /// One row per occurrence plus trailing `#` comment lines. Replayable.
    Csv,
    /// Human-readable summary block. Not replayable.
    Summary,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "csv" => Ok(LogFormat::Csv),
            "summary" | "text" => Ok(LogFormat::Summary),
            other => Err(Error::config(format!(
                "log format must be 'json', 'csv' or 'summary', got '{other}'"
            ))),
        }
    }
}

/// Formats accepted for the mapping source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingFormat {
    Csv,
    Json,
    Yaml,
}

impl MappingFormat {
    /// Guesses the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" => Some(MappingFormat::Csv),
            "json" => Some(MappingFormat::Json),
            "yaml" | "yml" => Some(MappingFormat::Yaml),
            _ => None,
        }
    }
}

impl FromStr for MappingFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(MappingFormat::Csv),
            "json" => Ok(MappingFormat::Json),
            "yaml" | "yml" => Ok(MappingFormat::Yaml),
            other => Err(Error::config(format!(
                "mapping type must be 'csv', 'json' or 'yaml', got '{other}'"
            ))),
        }
    }
}

/// What a run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Scan the directory and substitute according to the mapping table.
    #[default]
    Replace,
    /// Undo a previous run from its operation log.
    Revert,
    /// Replay a previous run's substitutions from its operation log.
    Apply,
}

/// The fully resolved configuration for a run.
///
/// Built by the command-line layer and checked with [`Config::validate`]
/// before any component sees it. The core never reads flags or globals.
#[derive(Debug, Clone)]
pub struct Config {
    pub directory: Option<PathBuf>,
    pub mapping_file: Option<PathBuf>,
    pub mapping_format: Option<MappingFormat>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub extensions: Vec<String>,
    pub dry_run: bool,
    pub case_sensitive: bool,
    pub backup: bool,
    pub mode: RunMode,
    /// Delete backups once a revert has restored them.
    pub clean_backups: bool,
    pub log_file: Option<PathBuf>,
    pub log_format: Option<LogFormat>,
    pub verbose: bool,
    pub debug: bool,
    pub quiet: bool,
    pub workers: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory: None,
            mapping_file: None,
            mapping_format: None,
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_dirs: Vec::new(),
            extensions: Vec::new(),
            dry_run: false,
            case_sensitive: false,
            backup: true,
            mode: RunMode::Replace,
            clean_backups: false,
            log_file: None,
            log_format: None,
            verbose: false,
            debug: false,
            quiet: false,
            workers: None,
        }
    }
}

/// The subset of configuration the replacement engine consumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub case_sensitive: bool,
    pub dry_run: bool,
}

impl Config {
    /// Checks and normalises the configuration.
    ///
    /// Paths become absolute, the mapping and log formats are resolved and
    /// extensions are lowercased with a leading dot. Any failure is a
    /// configuration error and processing must not start.
    pub fn validate(mut self) -> Result<Self> {
        if self.quiet && (self.verbose || self.debug) {
            return Err(Error::config("--quiet cannot be combined with --verbose or --debug"));
        }
        if self.workers == Some(0) {
            return Err(Error::config("worker count must be at least 1"));
        }

        match self.mode {
            RunMode::Replace => self.validate_replace()?,
            RunMode::Revert | RunMode::Apply => self.validate_replay()?,
        }

        self.extensions = normalize_extensions(&self.extensions);
        Ok(self)
    }

    fn validate_replace(&mut self) -> Result<()> {
        let directory = self
            .directory
            .take()
            .ok_or_else(|| Error::config("directory is required"))?;
        self.directory = Some(absolutize(&directory, "invalid directory path")?);

        let mapping = self
            .mapping_file
            .take()
            .ok_or_else(|| Error::config("mapping file is required (use --csv, --json or --yaml)"))?;
        let mapping = absolutize(&mapping, "invalid mapping file path")?;

        if self.mapping_format.is_none() {
            self.mapping_format = Some(MappingFormat::from_path(&mapping).ok_or_else(|| {
                Error::config("cannot infer mapping type from file extension, use --mapping-type")
                    .with_path(&mapping)
            })?);
        }
        self.mapping_file = Some(mapping);

        if self.log_format.is_none() {
            self.log_format = Some(if self.log_file.is_some() {
                LogFormat::Json
            } else {
                LogFormat::Summary
            });
        }
        Ok(())
    }

    fn validate_replay(&mut self) -> Result<()> {
        let log_file = self.log_file.take().ok_or_else(|| {
            Error::config("log file is required for revert and apply operations")
        })?;
        let log_file = absolutize(&log_file, "invalid log file path")?;

        let format = self.log_format.unwrap_or_else(|| {
            match log_file.extension().and_then(|e| e.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("csv") => LogFormat::Csv,
                _ => LogFormat::Json,
            }
        });
        if format == LogFormat::Summary {
            return Err(Error::config("summary logs cannot be replayed, use a json or csv log"));
        }

        self.log_format = Some(format);
        self.log_file = Some(log_file);
        Ok(())
    }

    /// The log format after validation. Defaults to JSON on an unvalidated config.
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or(LogFormat::Json)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            case_sensitive: self.case_sensitive,
            dry_run: self.dry_run,
        }
    }

    /// Backups are taken only when enabled and files are actually rewritten.
    pub fn should_create_backup(&self) -> bool {
        self.backup && !self.dry_run
    }

    /// Maps the verbosity flags to a log filter for the binary's logger.
    pub fn log_level(&self) -> log::LevelFilter {
        if self.quiet {
            log::LevelFilter::Error
        } else if self.debug {
            log::LevelFilter::Debug
        } else if self.verbose {
            log::LevelFilter::Info
        } else {
            log::LevelFilter::Warn
        }
    }

    /// Returns `true` if files with extension `ext` are eligible.
    pub fn should_process_extension(&self, ext: &str) -> bool {
        extension_allowed(&self.extensions, ext)
    }
}

/// Checks `ext` against a normalised allow-list. An empty list allows all.
pub fn extension_allowed(allowed: &[String], ext: &str) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let ext = normalize_extension(ext);
    allowed.iter().any(|a| *a == ext)
}

fn absolutize(path: &Path, message: &str) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| Error::config(message).with_path(path).with_source(e))
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') { ext } else { format!(".{ext}") }
}

fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .filter(|e| !e.trim().is_empty())
        .map(|e| normalize_extension(e))
        .collect()
}
