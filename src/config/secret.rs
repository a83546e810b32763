//! SRS signing secret generation.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{CryptoRng, Rng};

/// Length of generated secrets.
pub const SECRET_LEN: usize = 32;

/// Draw a secret uniformly from `[A-Za-z0-9]`.
pub fn generate_secret<R: Rng + CryptoRng>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}

/// Read the secret stored at `path`, creating it on first use.
///
/// The file is written with mode 0600. A file that exists but is blank is
/// treated as missing and overwritten.
pub fn load_or_create(path: &Path) -> io::Result<String> {
    match fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => {
            tracing::debug!(path = %path.display(), "Loaded persisted SRS secret");
            return Ok(content.trim().to_string());
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let secret = generate_secret(&mut OsRng);
    let mut file = open_private(path)?;
    file.write_all(secret.as_bytes())?;
    file.write_all(b"\n")?;

    tracing::info!(path = %path.display(), "Generated and persisted new SRS secret");
    Ok(secret)
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::File::create(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_secret_shape() {
        let a = generate_secret(&mut OsRng);
        let b = generate_secret(&mut OsRng);
        assert_eq!(a.len(), SECRET_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_persisted_secret_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/srs.secret");

        let first = load_or_create(&path).unwrap();
        let second = load_or_create(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), SECRET_LEN);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_blank_file_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("srs.secret");
        fs::write(&path, "\n").unwrap();

        let secret = load_or_create(&path).unwrap();
        assert_eq!(secret.len(), SECRET_LEN);
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), secret);
    }
}
