//! Priority fallback over a profile's credential sources.
//!
//! Order: the saved session key (with its organization), the profile's saved
//! CLI OAuth blob, then the CLI login currently in the OS-level slot. The
//! API key is never part of the chain because it reaches billing only.
//! Every attempt is logged with its source and outcome.

use super::{CredentialSource, ResolvedCredential};
use crate::error::{CredentialError, MeterError};
use crate::profiles::ProfileId;
use crate::secrets::{run_blocking, CliCredentialStore, CliOAuthBlob, CredentialSet, CredentialVault};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AuthResolver {
    vault: CredentialVault,
    cli_store: Option<Arc<dyn CliCredentialStore>>,
}

impl AuthResolver {
    pub fn new(vault: CredentialVault, cli_store: Option<Arc<dyn CliCredentialStore>>) -> Self {
        Self { vault, cli_store }
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    /// Resolves the credential to fetch usage with for `profile_id`.
    ///
    /// Fails with `CredentialError::NotFound` when no source is usable, or
    /// `CredentialError::BillingOnly` when only an API key is configured.
    /// Neither is worth retrying without user action.
    pub async fn resolve(&self, profile_id: ProfileId) -> Result<ResolvedCredential, MeterError> {
        let vault = self.vault.clone();
        let set = run_blocking(move || vault.load(&profile_id)).await?;
        let now = Utc::now();

        if let Some(credential) = resolve_saved(profile_id, &set, now) {
            return Ok(credential);
        }

        if let Some(credential) = self.resolve_system(profile_id, now).await {
            return Ok(credential);
        }

        if set.api_key.is_some() {
            warn!(profile_id = %profile_id, "Only an API key is configured; it cannot read usage");
            return Err(CredentialError::BillingOnly.into());
        }
        warn!(profile_id = %profile_id, "No usable credentials");
        Err(CredentialError::NotFound.into())
    }

    async fn resolve_system(&self, profile_id: ProfileId, now: DateTime<Utc>) -> Option<ResolvedCredential> {
        let source = CredentialSource::SystemCliOAuth;
        let Some(cli_store) = self.cli_store.clone() else {
            debug!(profile_id = %profile_id, source = source.as_str(), outcome = "unavailable", "Credential attempt");
            return None;
        };
        let blob = match run_blocking(move || cli_store.read_blob()).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!(profile_id = %profile_id, source = source.as_str(), outcome = "absent", "Credential attempt");
                return None;
            }
            Err(e) => {
                warn!(profile_id = %profile_id, source = source.as_str(), code = e.code(), error = %e, "Credential attempt failed");
                return None;
            }
        };
        oauth_from_blob(profile_id, &blob, source, now)
    }
}

/// Sources 1 and 2: everything that lives in the profile's own vault entry.
pub fn resolve_saved(
    profile_id: ProfileId,
    set: &CredentialSet,
    now: DateTime<Utc>,
) -> Option<ResolvedCredential> {
    let source = CredentialSource::SessionKey;
    match (&set.session_key, &set.organization_id) {
        (Some(key), Some(org)) if !org.trim().is_empty() => {
            info!(profile_id = %profile_id, source = source.as_str(), outcome = "accepted", key = %key.masked(), "Credential attempt");
            return Some(ResolvedCredential::SessionKey {
                key: key.clone(),
                organization_id: org.trim().to_string(),
            });
        }
        (Some(_), _) => {
            let err = CredentialError::MissingOrganization;
            debug!(profile_id = %profile_id, source = source.as_str(), outcome = "rejected", code = err.code(), "Credential attempt");
        }
        (None, _) => {
            debug!(profile_id = %profile_id, source = source.as_str(), outcome = "absent", "Credential attempt");
        }
    }

    let source = CredentialSource::SavedCliOAuth;
    match &set.cli_credentials {
        Some(blob) => oauth_from_blob(profile_id, blob, source, now),
        None => {
            debug!(profile_id = %profile_id, source = source.as_str(), outcome = "absent", "Credential attempt");
            None
        }
    }
}

fn oauth_from_blob(
    profile_id: ProfileId,
    raw: &str,
    source: CredentialSource,
    now: DateTime<Utc>,
) -> Option<ResolvedCredential> {
    let token = CliOAuthBlob::parse(raw)
        .and_then(|blob| blob.usable_token(now).map(str::to_string));
    match token {
        Ok(access_token) => {
            info!(profile_id = %profile_id, source = source.as_str(), outcome = "accepted", "Credential attempt");
            Some(ResolvedCredential::OAuth {
                access_token,
                source,
            })
        }
        Err(e) => {
            debug!(profile_id = %profile_id, source = source.as_str(), outcome = "rejected", code = e.code(), reason = %e, "Credential attempt");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/resolver_tests.rs"]
mod tests;
