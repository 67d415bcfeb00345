use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The category of an [`Error`].
///
/// Callers branch on the kind rather than on the message: configuration
/// errors abort a run before any file is touched, file and backup errors are
/// attached to a single job, parsing errors come from mapping or log sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid or missing settings.
    Config,
    /// I/O failure on a specific path.
    File,
    /// Malformed mapping or log source.
    Parsing,
    /// Backup copy, restore or cleanup failure.
    Backup,
    /// Failure inside the substitution logic.
    Replacement,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::File => "file",
            ErrorKind::Parsing => "parsing",
            ErrorKind::Backup => "backup",
            ErrorKind::Replacement => "replacement",
        };
        f.write_str(name)
    }
}

type Cause = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type for all operations in `remap`.
///
/// Every error carries a kind, an optional path it relates to, a
/// human-readable message and optionally the error that caused it.
#[derive(Error, Debug)]
pub struct Error {
    kind: ErrorKind,
    path: Option<PathBuf>,
    message: String,
    #[source]
    source: Option<Cause>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} error for {}: {}", self.kind, path.display(), self.message)?,
            None => write!(f, "{} error: {}", self.kind, self.message)?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

/// A convenient type alias for `Result<T, remap::errors::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: None,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the path this error relates to.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attaches the underlying cause.
    pub fn with_source(mut self, source: impl Into<Cause>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::File, message).with_path(path)
    }

    pub fn parsing(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parsing, message).with_path(path)
    }

    pub fn backup(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Backup, message).with_path(path)
    }

    pub fn replacement(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Replacement, message).with_path(path)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` if this error belongs to the given category.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

/// Classifies an I/O error on `path` into a file error with a fitting message.
pub fn file_error(path: &Path, err: io::Error) -> Error {
    let message = match err.kind() {
        io::ErrorKind::NotFound => "file not found",
        io::ErrorKind::PermissionDenied => "file not writable",
        _ => "file operation failed",
    };
    let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    Error::file(path, message).with_source(err)
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::new(ErrorKind::File, "I/O failure").with_source(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::Parsing, "invalid JSON").with_source(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::new(ErrorKind::Parsing, "invalid YAML").with_source(err)
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::new(ErrorKind::Parsing, "invalid CSV").with_source(err)
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Error::new(ErrorKind::Config, "failed to build worker pool").with_source(err)
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        let path = err.file.path().to_path_buf();
        Error::file(path, "failed to persist temporary file").with_source(err.error)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::config(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::config(s)
    }
}
