//! `remap` is a library for bulk literal string replacement across a directory tree.
//!
//! It provides the core logic for the `remap` command-line tool but can also be used
//! as a standalone library. The main components are:
//!
//! - `mapping`: Loads `old -> new` rule tables from CSV, JSON or YAML and orders
//!   them longest-first.
//! - `engine`: A staged pipeline that detects occurrences and substitutes them in
//!   one file's content.
//! - `scheduler`: Runs the engine over many files on a fixed-size worker pool,
//!   taking backups and writing results atomically.
//! - `oplog`: Records per-file outcomes and renders JSON, CSV or summary reports.
//! - `recovery`: Reverts or replays a run from its JSON or CSV report.
//!
//! Configuration is resolved once by `cli` and `config`; the core never reads
//! flags or environment variables.

pub mod atomic;
pub mod backup;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod errors;
pub mod mapping;
pub mod oplog;
pub mod recovery;
pub mod scheduler;

// Re-export main types for easier access by library users.
pub use config::Config;
pub use engine::Engine;
pub use errors::{Error, ErrorKind, Result};
pub use mapping::{Rule, RuleTable};
pub use oplog::OperationLog;
pub use recovery::Replayer;
pub use scheduler::Scheduler;
