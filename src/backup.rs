use crate::atomic;
use crate::errors::{Error, Result};
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// Upper bound on same-second name suffixes tried before giving up.
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Takes and restores timestamped side-copies of files.
///
/// A backup of `dir/name` lives at `dir/name.<YYYYMMDD_HHMMSS>.bak`. When a
/// name for the same second is already taken, `_1`, `_2`, ... is appended to
/// the timestamp, so two backups never share a file.
#[derive(Debug, Clone, Copy)]
pub struct BackupStore {
    enabled: bool,
}

impl BackupStore {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Copies `path` and its permission bits to a fresh backup file.
    ///
    /// Returns `Ok(None)` when backups are disabled. A partially written
    /// backup is removed before the error is returned.
    pub fn backup(&self, path: &Path) -> Result<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }

        let mut source = File::open(path)
            .map_err(|e| Error::backup(path, "failed to open source file").with_source(e))?;
        let (backup_path, mut dest) = create_backup_file(path)?;

        if let Err(e) = io::copy(&mut source, &mut dest).and_then(|_| dest.sync_all()) {
            drop(dest);
            let _ = fs::remove_file(&backup_path);
            return Err(Error::backup(&backup_path, "failed to copy file content").with_source(e));
        }

        match source.metadata() {
            Ok(meta) => {
                if let Err(e) = fs::set_permissions(&backup_path, meta.permissions()) {
                    log::warn!("Could not copy permissions to {}: {}", backup_path.display(), e);
                }
            }
            Err(e) => log::warn!("Could not read permissions of {}: {}", path.display(), e),
        }

        log::debug!("Backed up {} to {}", path.display(), backup_path.display());
        Ok(Some(backup_path))
    }

    /// Overwrites `original` with the content and permission bits of `backup`.
    ///
    /// An empty `backup` path means there is nothing to restore.
    pub fn restore(&self, original: &Path, backup: &Path) -> Result<()> {
        if backup.as_os_str().is_empty() {
            return Ok(());
        }
        if !backup.exists() {
            return Err(Error::backup(backup, "backup file not found"));
        }

        let content = fs::read(backup)
            .map_err(|e| Error::backup(backup, "failed to read backup file").with_source(e))?;
        let perms = fs::metadata(backup)
            .map_err(|e| Error::backup(backup, "failed to read backup file").with_source(e))?
            .permissions();

        atomic::write_atomic(original, &content, Some(perms))
            .map_err(|e| Error::backup(original, "failed to restore file content").with_source(e))?;

        log::debug!("Restored {} from {}", original.display(), backup.display());
        Ok(())
    }

    /// Removes a backup file. A missing file is not an error.
    pub fn cleanup(&self, backup: &Path) -> Result<()> {
        if backup.as_os_str().is_empty() {
            return Ok(());
        }
        match fs::remove_file(backup) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::backup(backup, "failed to remove backup file").with_source(e)),
        }
    }
}

/// Exclusively creates the backup file for `path`, avoiding name collisions.
fn create_backup_file(path: &Path) -> Result<(PathBuf, File)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::backup(path, "path has no file name"))?
        .to_string_lossy()
        .into_owned();
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{file_name}.{stamp}.bak")
        } else {
            format!("{file_name}.{stamp}_{attempt}.bak")
        };
        let candidate = path.with_file_name(name);

        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(Error::backup(&candidate, "failed to create backup file").with_source(e));
            }
        }
    }

    Err(Error::backup(path, "no free backup file name"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind as Kind;
    use tempfile::TempDir;

    #[test]
    fn backup_then_restore_is_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.txt");
        fs::write(&path, b"original\ncontent").unwrap();

        let store = BackupStore::new(true);
        let backup = store.backup(&path).unwrap().unwrap();
        fs::write(&path, b"mangled").unwrap();
        store.restore(&path, &backup).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"original\ncontent");
        assert_eq!(fs::read(&backup).unwrap(), b"original\ncontent");
    }

    #[test]
    fn backup_name_is_timestamped_sibling() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "x").unwrap();

        let backup = BackupStore::new(true).backup(&path).unwrap().unwrap();
        assert_eq!(backup.parent(), path.parent());

        let name = backup.file_name().unwrap().to_str().unwrap();
        let stamp = name
            .strip_prefix("notes.md.")
            .and_then(|s| s.strip_suffix(".bak"))
            .unwrap();
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "_");
        assert!(stamp.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn repeated_backups_never_collide() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        let store = BackupStore::new(true);

        let mut seen = Vec::new();
        for i in 0..5 {
            fs::write(&path, format!("version {i}")).unwrap();
            seen.push(store.backup(&path).unwrap().unwrap());
        }
        for (i, backup) in seen.iter().enumerate() {
            assert_eq!(fs::read_to_string(backup).unwrap(), format!("version {i}"));
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn disabled_store_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "x").unwrap();

        assert_eq!(BackupStore::new(false).backup(&path).unwrap(), None);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn missing_source_and_backup_are_backup_errors() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(true);

        let err = store.backup(&dir.path().join("missing.txt")).unwrap_err();
        assert!(err.is(Kind::Backup));

        let err = store
            .restore(&dir.path().join("a.txt"), &dir.path().join("a.txt.bak"))
            .unwrap_err();
        assert!(err.is(Kind::Backup));
        assert_eq!(err.message(), "backup file not found");

        store.restore(&dir.path().join("a.txt"), Path::new("")).unwrap();
    }

    #[test]
    fn cleanup_tolerates_missing_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "x").unwrap();
        let store = BackupStore::new(true);
        let backup = store.backup(&path).unwrap().unwrap();

        store.cleanup(&backup).unwrap();
        assert!(!backup.exists());
        store.cleanup(&backup).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn permissions_travel_with_backup_and_restore() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.sh");
        fs::write(&path, "#!/bin/sh").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700)).unwrap();

        let store = BackupStore::new(true);
        let backup = store.backup(&path).unwrap().unwrap();
        assert_eq!(fs::metadata(&backup).unwrap().permissions().mode() & 0o777, 0o700);

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        store.restore(&path, &backup).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o700);
    }
}
