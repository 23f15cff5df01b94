use super::SecretStore;
use crate::error::StorageError;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Stores each secret in its own owner-only file.
///
/// Files are written atomically (tempfile in the same directory, then
/// persisted over the target).
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, service: &str, account: &str) -> PathBuf {
        self.root
            .join(sanitize(service))
            .join(format!("{}.secret", sanitize(account)))
    }
}

/// Keeps file names portable: anything outside `[A-Za-z0-9._-]` becomes `_`.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

impl SecretStore for FileSecretStore {
    fn read(&self, service: &str, account: &str) -> Result<Option<String>, StorageError> {
        let path = self.entry_path(service, account);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::read(path, e)),
        }
    }

    fn write(&self, service: &str, account: &str, secret: &str) -> Result<(), StorageError> {
        let path = self.entry_path(service, account);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::write(&dir, e))?;
        restrict_permissions(&dir, 0o700).map_err(|e| StorageError::write(&dir, e))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| StorageError::write(&path, e))?;
        restrict_permissions(tmp.path(), 0o600).map_err(|e| StorageError::write(&path, e))?;
        tmp.write_all(secret.as_bytes())
            .map_err(|e| StorageError::write(&path, e))?;
        tmp.persist(&path)
            .map_err(|e| StorageError::write(&path, e.error))?;
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<(), StorageError> {
        let path = self.entry_path(service, account);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::write(path, e)),
        }
    }
}
