//! The main entry point for the `remap` command-line application.
//!
//! Parses arguments into a validated configuration and dispatches to a
//! replace run or a revert/apply replay.

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use remap::cli;
use remap::config::{Config, LogFormat, RunMode};
use remap::discovery::FileDiscovery;
use remap::mapping::load_rule_table;
use remap::oplog::OperationLog;
use remap::recovery::Replayer;
use remap::scheduler::{CancellationToken, Scheduler};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::process;
use std::sync::Arc;
use std::time::Instant;

fn main() {
    let args = cli::parse_args();

    match run(args) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when the run finished but some files failed.
fn run(args: cli::Args) -> anyhow::Result<bool> {
    let config = args.into_config()?.validate()?;
    init_logging(&config);

    match config.mode {
        RunMode::Replace => run_replace(&config),
        RunMode::Revert | RunMode::Apply => run_replay(&config),
    }
}

fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_env("RUST_LOG")
        .format_timestamp(None)
        .init();
}

fn run_replace(config: &Config) -> anyhow::Result<bool> {
    let mapping = config
        .mapping_file
        .as_deref()
        .context("mapping file is required")?;
    let format = config.mapping_format.context("mapping type is required")?;

    let rules = Arc::new(load_rule_table(mapping, format)?);
    log::info!("Loaded {} mapping rules from {}", rules.size(), mapping.display());

    let files = FileDiscovery::new(config)?.discover()?;
    let scheduler = Scheduler::from_config(config, rules);
    log::info!("Processing {} files with {} workers", files.len(), scheduler.workers());

    let progress = progress_bar(files.len() as u64, config);
    let start = Instant::now();
    let mut oplog = OperationLog::new(config.dry_run);

    for result in scheduler.process_files(files, &CancellationToken::new())? {
        progress.inc(1);
        progress.set_message(result.job.path.display().to_string());
        oplog.record(&result);
    }
    progress.finish_and_clear();
    oplog.set_processing_time(start.elapsed());

    write_report(config, &oplog)?;
    Ok(!oplog.has_errors())
}

fn run_replay(config: &Config) -> anyhow::Result<bool> {
    let log_path = config.log_file.as_deref().context("log file is required")?;
    let format = config.log_format();
    let replayer = Replayer::new().with_backup_cleanup(config.clean_backups);

    let (verb, summary) = match config.mode {
        RunMode::Apply => ("Applied", replayer.apply_from_log(log_path, format)?),
        _ => ("Reverted", replayer.revert_from_log(log_path, format)?),
    };

    if !config.quiet {
        println!("{verb} {} files ({} skipped)", summary.succeeded, summary.skipped);
    }
    Ok(true)
}

/// Writes the run report to the log file, or to stdout when there is none.
fn write_report(config: &Config, oplog: &OperationLog) -> anyhow::Result<()> {
    let format = config.log_format();

    match &config.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            let mut out = BufWriter::new(file);
            oplog.write_report(&mut out, format)?;
            out.flush()?;

            if !config.quiet && format != LogFormat::Summary {
                oplog.write_report(&mut io::stdout().lock(), LogFormat::Summary)?;
            }
        }
        None if !config.quiet => oplog.write_report(&mut io::stdout().lock(), format)?,
        None => {}
    }
    Ok(())
}

fn progress_bar(len: u64, config: &Config) -> ProgressBar {
    // Per-file log lines would tear the bar apart.
    if config.quiet || config.verbose || config.debug {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}
