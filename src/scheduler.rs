//! Parallel per-file processing.
//!
//! A run moves through dispatch, processing, draining and done. A feeder
//! thread enqueues one [`Job`] per file, a fixed set of workers on a Rayon
//! pool pulls jobs and pushes [`JobResult`]s, and a coordinator closes the
//! result stream once every worker has returned. Results arrive in
//! completion order, not input order.
//!
//! Each file belongs to exactly one job, and the only state workers share is
//! the read-only rule table and backup flag, so there is no locking.

use crate::atomic;
use crate::backup::BackupStore;
use crate::config::{Config, EngineOptions};
use crate::discovery::FileDescriptor;
use crate::engine::{Engine, FileOutcome, Transform};
use crate::errors::{file_error, Error, Result};
use crate::mapping::RuleTable;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Workers never exceed this count unless explicitly requested.
pub const MAX_DEFAULT_WORKERS: usize = 8;

/// A cooperative stop signal shared by the feeder, workers and caller.
///
/// Cancelling prevents new jobs from starting; a job already reading,
/// transforming or writing its file runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub path: PathBuf,
    pub file: FileDescriptor,
}

impl From<FileDescriptor> for Job {
    fn from(file: FileDescriptor) -> Self {
        Self {
            path: file.path.clone(),
            file,
        }
    }
}

/// The terminal record for one job.
///
/// `outcome` is present whenever detection ran. `error` is set when reading,
/// backing up or writing failed; both can be present if the failure came
/// after detection.
#[derive(Debug)]
pub struct JobResult {
    pub job: Job,
    pub outcome: Option<FileOutcome>,
    pub backup_path: Option<PathBuf>,
    pub error: Option<Error>,
}

impl JobResult {
    pub fn is_modified(&self) -> bool {
        self.error.is_none() && self.outcome.as_ref().is_some_and(|o| o.modified)
    }
}

/// Writes substituted content over a file.
type WriteFn = fn(&Path, &[u8]) -> Result<()>;

/// Everything a worker needs to process a job. Shared read-only.
#[derive(Clone)]
struct JobRunner {
    engine: Engine,
    rules: Arc<RuleTable>,
    backups: BackupStore,
    writer: WriteFn,
}

/// Distributes file jobs over a fixed-size worker pool.
pub struct Scheduler {
    runner: JobRunner,
    workers: usize,
}

/// `min(available parallelism, 8)`, at least one.
pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, MAX_DEFAULT_WORKERS)
}

impl Scheduler {
    pub fn new(options: EngineOptions, rules: Arc<RuleTable>, backup_enabled: bool) -> Self {
        Self {
            runner: JobRunner {
                engine: Engine::new(options),
                rules,
                backups: BackupStore::new(backup_enabled && !options.dry_run),
                writer: atomic::rewrite_preserving_permissions,
            },
            workers: default_worker_count(),
        }
    }

    pub fn from_config(config: &Config, rules: Arc<RuleTable>) -> Self {
        let scheduler = Self::new(config.engine_options(), rules, config.should_create_backup());
        match config.workers {
            Some(n) => scheduler.with_workers(n),
            None => scheduler,
        }
    }

    /// Overrides the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Starts processing `files` and returns the stream of results.
    ///
    /// The stream ends once every worker has finished: after all jobs are
    /// done, or after cancellation stops new jobs from being taken.
    pub fn process_files(
        &self,
        files: Vec<FileDescriptor>,
        cancel: &CancellationToken,
    ) -> Result<Receiver<JobResult>> {
        // Both queues hold every job, so neither side ever blocks on a full
        // buffer; cancellation only has to stop new work.
        let capacity = files.len().max(1);
        let (job_tx, job_rx) = bounded::<Job>(capacity);
        let (result_tx, result_rx) = bounded::<JobResult>(capacity);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("remap-worker-{i}"))
            .build()?;

        let feeder_cancel = cancel.clone();
        thread::Builder::new()
            .name("remap-feeder".into())
            .spawn(move || feed(files, job_tx, feeder_cancel))
            .map_err(|e| Error::config("failed to start feeder thread").with_source(e))?;

        let runner = Arc::new(self.runner.clone());
        let workers = self.workers;
        let worker_cancel = cancel.clone();
        thread::Builder::new()
            .name("remap-coordinator".into())
            .spawn(move || {
                pool.scope(|s| {
                    for id in 0..workers {
                        let runner = Arc::clone(&runner);
                        let jobs = job_rx.clone();
                        let results = result_tx.clone();
                        let cancel = worker_cancel.clone();
                        s.spawn(move |_| runner.work(id, jobs, results, cancel));
                    }
                });
                // Last sender goes away here and the result stream closes.
                drop(result_tx);
                log::debug!("All {workers} workers finished");
            })
            .map_err(|e| Error::config("failed to start coordinator thread").with_source(e))?;

        Ok(result_rx)
    }

    /// Processes `files` and collects every result.
    pub fn run(&self, files: Vec<FileDescriptor>, cancel: &CancellationToken) -> Result<Vec<JobResult>> {
        Ok(self.process_files(files, cancel)?.iter().collect())
    }

    /// Processes one job on the calling thread.
    pub fn process_job(&self, job: Job) -> JobResult {
        self.runner.process(job)
    }

    #[cfg(test)]
    fn with_writer(mut self, writer: WriteFn) -> Self {
        self.runner.writer = writer;
        self
    }
}

fn feed(files: Vec<FileDescriptor>, jobs: Sender<Job>, cancel: CancellationToken) {
    for file in files {
        if cancel.is_cancelled() {
            log::debug!("Cancelled, no more jobs dispatched");
            break;
        }
        if jobs.send(Job::from(file)).is_err() {
            break;
        }
    }
}

impl JobRunner {
    fn work(&self, id: usize, jobs: Receiver<Job>, results: Sender<JobResult>, cancel: CancellationToken) {
        // Checked before taking a job, so a job in hand is always finished.
        while !cancel.is_cancelled() {
            let Ok(job) = jobs.recv() else {
                break;
            };
            log::debug!("worker {id}: {}", job.path.display());
            let result = self.process(job);
            if results.send(result).is_err() {
                // Nobody is listening anymore.
                break;
            }
        }
    }

    /// Read, transform, back up, then atomically rewrite one file.
    fn process(&self, job: Job) -> JobResult {
        let path = job.path.clone();
        let mut result = JobResult {
            job,
            outcome: None,
            backup_path: None,
            error: None,
        };

        let original = match fs::read(&path) {
            Ok(content) => content,
            Err(e) => {
                result.error = Some(file_error(&path, e));
                return self.finish(result);
            }
        };

        let Transform {
            outcome,
            content,
            error,
        } = self.engine.process(&path, &original, &self.rules);
        let modified = outcome.modified;
        result.outcome = Some(outcome);

        if let Some(err) = error {
            result.error = Some(err);
            return self.finish(result);
        }
        if !modified {
            return self.finish(result);
        }

        match self.backups.backup(&path) {
            Ok(backup) => result.backup_path = backup,
            Err(err) => {
                result.error = Some(err);
                return self.finish(result);
            }
        }

        if !self.engine.options().dry_run {
            if let Err(err) = (self.writer)(&path, &content) {
                if let Some(backup) = &result.backup_path {
                    log::warn!("Write to {} failed, restoring from backup", path.display());
                    if let Err(restore_err) = self.backups.restore(&path, backup) {
                        log::warn!("Restore of {} failed: {}", path.display(), restore_err);
                    }
                }
                result.error = Some(err);
            }
        }

        self.finish(result)
    }

    fn finish(&self, result: JobResult) -> JobResult {
        let path = result.job.path.display();
        match (&result.error, &result.outcome) {
            (Some(err), _) => log::warn!("ERROR: {path} - {err}"),
            (None, Some(o)) if o.modified => {
                log::info!("MODIFIED: {path} ({} replacements)", o.occurrences.len());
                for occ in &o.occurrences {
                    log::debug!("  Line {}:{}: '{}' -> '{}'", occ.line, occ.column, occ.from, occ.to);
                }
            }
            _ => log::info!("SKIPPED: {path} (no changes)"),
        }
        result
    }
}
