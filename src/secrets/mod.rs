//! Secret persistence, segregated from the plain settings store.
//!
//! `SecretStore` is the seam: a file-backed store under the app home, a
//! command-line backed store (`security` on macOS, `secret-tool` on Linux),
//! and an in-memory fake for tests. Calls are blocking; async callers go
//! through `spawn_blocking`.

pub mod cli_oauth;
pub mod command_store;
pub mod file_store;
#[cfg(test)]
pub mod memory_store;
pub mod system;
pub mod vault;

use crate::error::StorageError;
use command_store::CommandSecretStore;
use file_store::FileSecretStore;
use std::path::Path;
use std::sync::Arc;

pub use cli_oauth::CliOAuthBlob;
pub use system::CliCredentialStore;
pub use vault::{CredentialSet, CredentialVault, SessionKey};

/// Named secret slots addressed by service and account.
///
/// A missing entry is `Ok(None)`, never an error.
pub trait SecretStore: Send + Sync {
    fn read(&self, service: &str, account: &str) -> Result<Option<String>, StorageError>;

    fn write(&self, service: &str, account: &str, secret: &str) -> Result<(), StorageError>;

    /// Removing an absent entry succeeds.
    fn delete(&self, service: &str, account: &str) -> Result<(), StorageError>;
}

/// Picks the vault backend: the OS secret utility when it is on `PATH`,
/// otherwise 0600 files under `secrets_dir`.
pub fn detect_vault_store(secrets_dir: &Path) -> Arc<dyn SecretStore> {
    vault_store(CommandSecretStore::detect(), secrets_dir)
}

fn vault_store(command: Option<CommandSecretStore>, secrets_dir: &Path) -> Arc<dyn SecretStore> {
    match command {
        Some(command) => {
            tracing::info!(tool = ?command.tool(), "Keeping profile secrets in the OS secret store");
            Arc::new(command)
        }
        None => {
            tracing::warn!(
                dir = %secrets_dir.display(),
                "No OS secret store utility found; keeping profile secrets in files"
            );
            Arc::new(FileSecretStore::new(secrets_dir))
        }
    }
}

/// Runs blocking secret or settings I/O off the async runtime.
pub async fn run_blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Command(format!("blocking task failed: {}", e)))?
}

#[cfg(all(test, unix))]
mod tests {
    use super::command_store::CommandTool;
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_vault_prefers_os_utility() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let captured = dir.path().join("captured");
        let tool = dir.path().join("fake-secret-tool");
        std::fs::write(&tool, format!("#!/bin/sh\ncat > '{}'\n", captured.display())).unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        let secrets_dir = dir.path().join("secrets");

        let store = vault_store(
            Some(CommandSecretStore::new(CommandTool::SecretTool, tool)),
            &secrets_dir,
        );
        store.write("meterbar", "acct", "session-key").unwrap();

        assert_eq!(std::fs::read_to_string(&captured).unwrap(), "session-key");
        assert!(!secrets_dir.exists());
    }

    #[test]
    fn test_vault_falls_back_to_files() {
        let dir = TempDir::new().unwrap();
        let store = vault_store(None, dir.path());
        store.write("meterbar", "acct", "session-key").unwrap();

        assert_eq!(
            store.read("meterbar", "acct").unwrap().as_deref(),
            Some("session-key")
        );
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_some());
    }
}
