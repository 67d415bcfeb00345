use crate::config::{Config, LogFormat, MappingFormat, RunMode};
use crate::errors::Result;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// Replace strings in files recursively based on mapping tables.
///
/// Every literal `old` string from the mapping is replaced by its `new`
/// string in all matching files under the directory. Longer strings are
/// replaced first, files are processed in parallel and each modified file is
/// backed up before it is rewritten.
#[derive(Parser, Debug)]
#[command(
    name = "remap",
    author,
    version,
    about = "Replace strings in files recursively based on mapping tables",
    long_about = "remap - bulk literal string replacement driven by a mapping table.

QUICK EXAMPLES:
  remap --csv mapping.csv src/                    # Replace in every file under src/
  remap --json map.json --extensions .go,.md .    # Only Go and Markdown files
  remap --csv map.csv --dry-run -v .              # Preview without touching files
  remap --csv map.csv --log run.json .            # Keep a replayable log
  remap --revert --log run.json                   # Undo that run
  remap --apply --log run.csv                     # Redo a logged run

Mapping CSV format (header optional, # comments allowed):
  old,new
  colour,color
  Colour,Color"
)]
#[command(group(ArgGroup::new("mapping").args(["csv", "json", "yaml"]).multiple(false)))]
pub struct Args {
    /// The directory to process. Not needed with --revert or --apply.
    pub directory: Option<PathBuf>,

    /// CSV mapping file (columns: old,new).
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,

    /// JSON mapping file (array of {"old": ..., "new": ...}).
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,

    /// YAML mapping file (list of old/new maps).
    #[arg(long, value_name = "FILE")]
    pub yaml: Option<PathBuf>,

    /// Override the mapping format instead of inferring it from the extension.
    #[arg(long = "mapping-type", value_name = "TYPE")]
    pub mapping_type: Option<String>,

    /// Include file patterns (glob, repeatable).
    #[arg(long, value_name = "GLOB")]
    pub include: Vec<String>,

    /// Exclude file patterns (glob, repeatable).
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Exclude directories by name, path or glob (repeatable).
    #[arg(long = "exclude-dir", value_name = "DIR")]
    pub exclude_dir: Vec<String>,

    /// A comma-separated list of file extensions to process (e.g. `.txt,.go`).
    #[arg(long, value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Simulate without making changes.
    #[arg(long, visible_alias = "fake")]
    pub dry_run: bool,

    /// Revert the transformations recorded in the --log file.
    #[arg(short, long, conflicts_with = "apply")]
    pub revert: bool,

    /// Apply the transformations recorded in the --log file.
    #[arg(long)]
    pub apply: bool,

    /// Delete backup files after --revert restores them.
    #[arg(long, requires = "revert")]
    pub clean_backups: bool,

    /// Disable backup file creation.
    #[arg(long)]
    pub nobackup: bool,

    /// Case-sensitive search (default: insensitive).
    #[arg(long)]
    pub case_sensitive: bool,

    /// Print every processed file.
    #[arg(short, long)]
    pub verbose: bool,

    /// Print every replacement as well.
    #[arg(long)]
    pub debug: bool,

    /// Only print errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Log file for the run report, or the log to replay with --revert/--apply.
    #[arg(long = "log", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Log format: json, csv or summary.
    #[arg(long = "log-format", value_name = "FORMAT")]
    pub log_format: Option<String>,

    /// The number of parallel worker threads to use. Defaults to min(cores, 8).
    #[arg(short = 'w', long = "workers", env = "REMAP_WORKERS")]
    pub workers: Option<usize>,
}

impl Args {
    /// Converts the parsed flags into an unvalidated [`Config`].
    pub fn into_config(self) -> Result<Config> {
        let mode = if self.revert {
            RunMode::Revert
        } else if self.apply {
            RunMode::Apply
        } else {
            RunMode::Replace
        };

        let (mapping_file, inferred) = match (self.csv, self.json, self.yaml) {
            (Some(p), _, _) => (Some(p), Some(MappingFormat::Csv)),
            (_, Some(p), _) => (Some(p), Some(MappingFormat::Json)),
            (_, _, Some(p)) => (Some(p), Some(MappingFormat::Yaml)),
            _ => (None, None),
        };
        let mapping_format = match self.mapping_type {
            Some(t) => Some(t.parse::<MappingFormat>()?),
            None => inferred,
        };
        let log_format = self.log_format.map(|f| f.parse::<LogFormat>()).transpose()?;

        Ok(Config {
            directory: self.directory,
            mapping_file,
            mapping_format,
            include: self.include,
            exclude: self.exclude,
            exclude_dirs: self.exclude_dir,
            extensions: self.extensions,
            dry_run: self.dry_run,
            case_sensitive: self.case_sensitive,
            backup: !self.nobackup,
            mode,
            clean_backups: self.clean_backups,
            log_file: self.log_file,
            log_format,
            verbose: self.verbose,
            debug: self.debug,
            quiet: self.quiet,
            workers: self.workers,
        })
    }
}

/// Parses command-line arguments and returns the populated `Args` struct.
pub fn parse_args() -> Args {
    Args::parse()
}
