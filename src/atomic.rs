use crate::errors::{file_error, Result};
use std::fs::{self, Permissions};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replaces `path` with `content` without ever exposing a half-written file.
///
/// The bytes go to a temporary sibling, are synced, receive `permissions`
/// (when given) and the sibling is then renamed over `path`. A failure at
/// any step leaves `path` untouched and the temporary file removed.
pub fn write_atomic(path: &Path, content: &[u8], permissions: Option<Permissions>) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut temp_file = NamedTempFile::new_in(parent).map_err(|e| file_error(path, e))?;
    temp_file.write_all(content).map_err(|e| file_error(path, e))?;
    temp_file.as_file().sync_all().map_err(|e| file_error(path, e))?;

    if let Some(perms) = permissions {
        fs::set_permissions(temp_file.path(), perms).map_err(|e| file_error(path, e))?;
    }

    temp_file.persist(path)?;
    Ok(())
}

/// Like [`write_atomic`], keeping the current permission bits of `path`.
pub fn rewrite_preserving_permissions(path: &Path, content: &[u8]) -> Result<()> {
    let perms = fs::metadata(path).map_err(|e| file_error(path, e))?.permissions();
    write_atomic(path, content, Some(perms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn replaces_content_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, "old").unwrap();

        rewrite_preserving_permissions(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn keeps_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("script.sh");
        fs::write(&path, "echo hi").unwrap();
        fs::set_permissions(&path, Permissions::from_mode(0o750)).unwrap();

        rewrite_preserving_permissions(&path, b"echo bye").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o750);
    }

    #[test]
    fn missing_target_is_a_file_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.txt");
        let err = rewrite_preserving_permissions(&path, b"x").unwrap_err();
        assert!(err.is(crate::errors::ErrorKind::File));
    }
}
