//! Rendered file output.

use std::fs;
use std::io;
use std::path::Path;

/// Write `content` to `path` unless it already holds exactly that.
///
/// Parent directories are created. Returns whether the file changed.
pub fn write_if_changed(path: &Path, content: &str) -> io::Result<bool> {
    match fs::read_to_string(path) {
        Ok(existing) if existing == content => {
            tracing::debug!(path = %path.display(), "No changes, skipping");
            return Ok(false);
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    tracing::info!(path = %path.display(), "Generated file");
    Ok(true)
}

/// Set unix permission bits. No-op elsewhere.
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_if_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/main.cf");

        assert!(write_if_changed(&path, "x = 1\n").unwrap());
        assert!(!write_if_changed(&path, "x = 1\n").unwrap());
        assert!(write_if_changed(&path, "x = 2\n").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "x = 2\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_set_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        fs::write(&path, "pw").unwrap();
        set_mode(&path, 0o600).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
    }
}
