//! Per-profile credential sets.

use super::SecretStore;
use crate::error::{CredentialError, StorageError};
use crate::profiles::ProfileId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

/// Service name for every vault entry; the account is the profile id.
pub const VAULT_SERVICE: &str = "meterbar";

const MIN_SESSION_KEY_LEN: usize = 20;

const SESSION_KEY_PATTERN: &str = r"^sk-ant-[A-Za-z0-9_\-]+$";

fn matches_session_key_pattern(key: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    match PATTERN.get_or_init(|| Regex::new(SESSION_KEY_PATTERN).ok()) {
        Some(re) => re.is_match(key),
        None => key.strip_prefix("sk-ant-").is_some_and(|rest| {
            !rest.is_empty()
                && rest
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }),
    }
}

/// A web session token that has passed format validation.
///
/// Deserialization validates too, so a stored set can never carry an
/// unvalidated key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey(String);

impl SessionKey {
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let key = raw.trim();
        if key.len() < MIN_SESSION_KEY_LEN {
            return Err(CredentialError::InvalidFormat(
                "session key is too short".to_string(),
            ));
        }
        if !matches_session_key_pattern(key) {
            return Err(CredentialError::InvalidFormat(
                "session key must start with sk-ant- and contain no whitespace".to_string(),
            ));
        }
        Ok(Self(key.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Shortened form for logs and status output.
    pub fn masked(&self) -> String {
        let tail: String = self
            .0
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("sk-ant-…{}", tail)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey({})", self.masked())
    }
}

impl TryFrom<String> for SessionKey {
    type Error = CredentialError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SessionKey::parse(&value)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.0
    }
}

/// Secrets owned by one profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<SessionKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Console API key; reaches billing data only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_organization_id: Option<String>,
    /// Raw CLI OAuth blob, kept opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_credentials: Option<String>,
}

impl CredentialSet {
    pub fn is_empty(&self) -> bool {
        self.session_key.is_none()
            && self.api_key.is_none()
            && self.cli_credentials.is_none()
            && self.organization_id.is_none()
    }

    #[cfg(test)]
    pub fn has_usage_credential(&self) -> bool {
        self.session_key.is_some() || self.cli_credentials.is_some()
    }
}

/// Credential sets keyed by profile, held in a `SecretStore`.
#[derive(Clone)]
pub struct CredentialVault {
    store: Arc<dyn SecretStore>,
}

impl CredentialVault {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    fn account(id: &ProfileId) -> String {
        format!("profile-{}", id)
    }

    /// Returns the profile's set, or an empty set when none is stored.
    pub fn load(&self, id: &ProfileId) -> Result<CredentialSet, StorageError> {
        match self.store.read(VAULT_SERVICE, &Self::account(id))? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| StorageError::decode("credential set", e)),
            None => Ok(CredentialSet::default()),
        }
    }

    /// Persists the set; an empty set removes the entry.
    pub fn save(&self, id: &ProfileId, set: &CredentialSet) -> Result<(), StorageError> {
        if set.is_empty() {
            return self.delete(id);
        }
        let raw =
            serde_json::to_string(set).map_err(|e| StorageError::encode("credential set", e))?;
        self.store.write(VAULT_SERVICE, &Self::account(id), &raw)
    }

    /// Loads, applies `change`, and saves.
    pub fn update<F>(&self, id: &ProfileId, change: F) -> Result<CredentialSet, StorageError>
    where
        F: FnOnce(&mut CredentialSet),
    {
        let mut set = self.load(id)?;
        change(&mut set);
        self.save(id, &set)?;
        Ok(set)
    }

    pub fn delete(&self, id: &ProfileId) -> Result<(), StorageError> {
        self.store.delete(VAULT_SERVICE, &Self::account(id))
    }

    /// Reads an entry under an arbitrary account name (legacy migration).
    pub fn load_account(&self, account: &str) -> Result<Option<CredentialSet>, StorageError> {
        match self.store.read(VAULT_SERVICE, account)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError::decode("credential set", e)),
            None => Ok(None),
        }
    }

    pub fn delete_account(&self, account: &str) -> Result<(), StorageError> {
        self.store.delete(VAULT_SERVICE, account)
    }
}

#[cfg(test)]
#[path = "tests/vault_tests.rs"]
mod tests;
