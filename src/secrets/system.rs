//! The OS-level slot holding the external CLI tool's login.
//!
//! There is exactly one slot per machine user. It is read during credential
//! resolution and activation, and written only during activation.

use super::command_store::{CommandSecretStore, CommandTool};
use super::SecretStore;
use crate::error::StorageError;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Keychain service name the CLI tool stores its login under.
pub const CLI_SERVICE: &str = "Claude Code-credentials";

pub trait CliCredentialStore: Send + Sync {
    /// Returns the raw blob, or `None` when no CLI login exists.
    fn read_blob(&self) -> Result<Option<String>, StorageError>;

    fn write_blob(&self, blob: &str) -> Result<(), StorageError>;

    fn describe(&self) -> String;
}

/// CLI slot kept in a `SecretStore` entry.
pub struct SecretStoreSlot {
    store: Arc<dyn SecretStore>,
    service: String,
    account: String,
}

impl SecretStoreSlot {
    pub fn new(store: Arc<dyn SecretStore>, service: &str, account: &str) -> Self {
        Self {
            store,
            service: service.to_string(),
            account: account.to_string(),
        }
    }
}

impl CliCredentialStore for SecretStoreSlot {
    fn read_blob(&self) -> Result<Option<String>, StorageError> {
        self.store.read(&self.service, &self.account)
    }

    fn write_blob(&self, blob: &str) -> Result<(), StorageError> {
        self.store.write(&self.service, &self.account, blob)
    }

    fn describe(&self) -> String {
        format!("secret store entry '{}'", self.service)
    }
}

/// CLI slot kept as the CLI's plaintext credentials file
/// (`$CLAUDE_CONFIG_DIR/.credentials.json` or `~/.claude/.credentials.json`).
pub struct CredentialsFileSlot {
    path: PathBuf,
}

impl CredentialsFileSlot {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> Option<PathBuf> {
        std::env::var("CLAUDE_CONFIG_DIR")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::home_dir().map(|h| h.join(".claude")))
            .map(|dir| dir.join(".credentials.json"))
    }
}

impl CliCredentialStore for CredentialsFileSlot {
    fn read_blob(&self) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::read(&self.path, e)),
        }
    }

    fn write_blob(&self, blob: &str) -> Result<(), StorageError> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| StorageError::write(&self.path, "path has no parent directory"))?;
        std::fs::create_dir_all(dir).map_err(|e| StorageError::write(dir, e))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| StorageError::write(&self.path, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))
                .map_err(|e| StorageError::write(&self.path, e))?;
        }
        tmp.write_all(blob.as_bytes())
            .map_err(|e| StorageError::write(&self.path, e))?;
        tmp.persist(&self.path)
            .map_err(|e| StorageError::write(&self.path, e.error))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("credentials file {}", self.path.display())
    }
}

/// Picks the CLI slot for this platform.
///
/// macOS always uses the login keychain. Elsewhere the libsecret entry is
/// used when `secret-tool` exists, otherwise the credentials file.
pub fn detect_cli_store() -> Option<Arc<dyn CliCredentialStore>> {
    if let Some(command) = CommandSecretStore::detect() {
        let account = match command.tool() {
            CommandTool::Security => std::env::var("USER").unwrap_or_default(),
            CommandTool::SecretTool => String::new(),
        };
        let slot = SecretStoreSlot::new(Arc::new(command), CLI_SERVICE, &account);
        tracing::debug!(slot = %slot.describe(), "Using OS credential slot");
        return Some(Arc::new(slot));
    }
    let path = CredentialsFileSlot::default_path()?;
    let slot = CredentialsFileSlot::new(path);
    tracing::debug!(slot = %slot.describe(), "Using CLI credentials file");
    Some(Arc::new(slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::memory_store::MemorySecretStore;
    use tempfile::TempDir;

    #[test]
    fn test_file_slot_round_trip() {
        let dir = TempDir::new().unwrap();
        let slot = CredentialsFileSlot::new(dir.path().join(".claude").join(".credentials.json"));
        assert_eq!(slot.read_blob().unwrap(), None);
        slot.write_blob("{\"claudeAiOauth\":{}}").unwrap();
        assert_eq!(
            slot.read_blob().unwrap().as_deref(),
            Some("{\"claudeAiOauth\":{}}")
        );
    }

    #[test]
    fn test_secret_store_slot_uses_service() {
        let store = Arc::new(MemorySecretStore::new());
        let slot = SecretStoreSlot::new(store.clone(), CLI_SERVICE, "alice");
        slot.write_blob("blob").unwrap();
        assert_eq!(
            store.read(CLI_SERVICE, "alice").unwrap().as_deref(),
            Some("blob")
        );
    }
}
