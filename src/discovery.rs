use crate::config::{extension_allowed, Config};
use crate::errors::{Error, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Metadata about a file selected for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Walks a directory tree and selects the files a run should touch.
pub struct FileDiscovery {
    root: PathBuf,
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    exclude_dirs: Vec<String>,
    exclude_dir_globs: Option<GlobSet>,
    extensions: Vec<String>,
}

impl FileDiscovery {
    /// Builds the filters from a validated configuration.
    ///
    /// Invalid glob patterns are configuration errors.
    pub fn new(config: &Config) -> Result<Self> {
        let root = config
            .directory
            .clone()
            .ok_or_else(|| Error::config("directory is required"))?;

        Ok(Self {
            root,
            include: build_globset(&config.include, "include")?,
            exclude: build_globset(&config.exclude, "exclude")?,
            exclude_dirs: config.exclude_dirs.clone(),
            exclude_dir_globs: build_globset(&config.exclude_dirs, "exclude-dir")?,
            extensions: config.extensions.clone(),
        })
    }

    /// Returns every eligible file under the root, sorted by path.
    pub fn discover(&self) -> Result<Vec<FileDescriptor>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && e.depth() > 0 && self.is_excluded_dir(e.path())));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if is_permission_denied(&e) => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
                Err(e) => {
                    let path = e.path().unwrap_or(self.root.as_path()).to_path_buf();
                    return Err(Error::file(path, "directory traversal failed").with_source(e));
                }
            };

            if !entry.file_type().is_file() || !self.should_process(entry.path()) {
                continue;
            }

            let meta = entry
                .metadata()
                .map_err(|e| Error::file(entry.path(), "failed to read metadata").with_source(e))?;
            files.push(FileDescriptor {
                path: entry.path().to_path_buf(),
                size: meta.len(),
                modified: meta.modified().ok(),
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        log::debug!("Discovered {} files under {}", files.len(), self.root.display());
        Ok(files)
    }

    fn is_excluded_dir(&self, path: &Path) -> bool {
        let base = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        if self.exclude_dirs.iter().any(|d| *d == base || Path::new(d) == path) {
            return true;
        }
        self.exclude_dir_globs
            .as_ref()
            .is_some_and(|set| set.is_match(&*base) || set.is_match(path))
    }

    /// Applies the extension, include, exclude and hidden/backup filters.
    fn should_process(&self, path: &Path) -> bool {
        let base = match path.file_name() {
            Some(name) => name.to_string_lossy(),
            None => return false,
        };
        if base.starts_with('.') || base.ends_with(".bak") {
            return false;
        }

        let ext = path.extension().map(|e| e.to_string_lossy()).unwrap_or_default();
        if !extension_allowed(&self.extensions, &ext) {
            return false;
        }

        let matches = |set: &GlobSet| {
            set.is_match(&*base) || set.is_match(path) || set.is_match(self.relative(path))
        };
        if let Some(include) = &self.include {
            if !matches(include) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if matches(exclude) {
                return false;
            }
        }
        true
    }

    fn relative<'p>(&self, path: &'p Path) -> &'p Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

fn build_globset(patterns: &[String], what: &str) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::config(format!("invalid {what} pattern: {pattern}")).with_source(e)
        })?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| Error::config(format!("invalid {what} patterns")).with_source(e))?;
    Ok(Some(set))
}

fn is_permission_denied(err: &walkdir::Error) -> bool {
    err.io_error()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::PermissionDenied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("src/main.go"), "x").unwrap();
        fs::write(root.join("src/nested/util.go"), "x").unwrap();
        fs::write(root.join("src/readme.txt"), "x").unwrap();
        fs::write(root.join("src/old.go.20240101_000000.bak"), "x").unwrap();
        fs::write(root.join(".hidden.go"), "x").unwrap();
        fs::write(root.join("node_modules/pkg/index.go"), "x").unwrap();
        dir
    }

    fn discover(dir: &TempDir, edit: impl FnOnce(&mut Config)) -> Vec<String> {
        let mut cfg = Config {
            directory: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        edit(&mut cfg);
        let files = FileDiscovery::new(&cfg).unwrap().discover().unwrap();
        files
            .iter()
            .map(|f| f.path.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn skips_hidden_and_backup_files() {
        let dir = tree();
        let found = discover(&dir, |_| {});
        assert_eq!(
            found,
            vec![
                "node_modules/pkg/index.go",
                "src/main.go",
                "src/nested/util.go",
                "src/readme.txt",
            ]
        );
    }

    #[test]
    fn extension_and_dir_filters() {
        let dir = tree();
        let found = discover(&dir, |c| {
            c.extensions = vec![".go".into()];
            c.exclude_dirs = vec!["node_modules".into()];
        });
        assert_eq!(found, vec!["src/main.go", "src/nested/util.go"]);
    }

    #[test]
    fn include_and_exclude_globs() {
        let dir = tree();
        let found = discover(&dir, |c| c.include = vec!["*.go".into()]);
        assert_eq!(found.len(), 3);

        let found = discover(&dir, |c| {
            c.include = vec!["src/**".into()];
            c.exclude = vec!["util.*".into()];
        });
        assert_eq!(found, vec!["src/main.go", "src/readme.txt"]);
    }

    #[test]
    fn invalid_glob_is_config_error() {
        let dir = tree();
        let cfg = Config {
            directory: Some(dir.path().to_path_buf()),
            include: vec!["[".into()],
            ..Config::default()
        };
        let err = FileDiscovery::new(&cfg).err().unwrap();
        assert!(err.is(crate::errors::ErrorKind::Config));
    }

    #[test]
    fn records_size() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let cfg = Config {
            directory: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        let files = FileDiscovery::new(&cfg).unwrap().discover().unwrap();
        assert_eq!(files[0].size, 5);
    }
}
