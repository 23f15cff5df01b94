use super::SecretStore;
use crate::error::StorageError;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory `SecretStore` for tests. Can be switched to fail every call.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<(String, String), String>>,
    failing: Mutex<bool>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn check(&self) -> Result<(), StorageError> {
        if *self.failing.lock().unwrap() {
            return Err(StorageError::Command("memory store set to fail".to_string()));
        }
        Ok(())
    }
}

impl SecretStore for MemorySecretStore {
    fn read(&self, service: &str, account: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(&(service.to_string(), account.to_string()))
            .cloned())
    }

    fn write(&self, service: &str, account: &str, secret: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries.lock().unwrap().insert(
            (service.to_string(), account.to_string()),
            secret.to_string(),
        );
        Ok(())
    }

    fn delete(&self, service: &str, account: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .remove(&(service.to_string(), account.to_string()));
        Ok(())
    }
}
