//! Usage fetch for one profile: external snapshot first, then the remote API.

use super::api_client::ClaudeApi;
use super::snapshot_file;
use super::types::UsageSnapshot;
use crate::auth::AuthResolver;
use crate::error::MeterError;
use crate::profiles::Profile;
use crate::secrets::run_blocking;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct UsageFetcher {
    api: ClaudeApi,
    resolver: AuthResolver,
    external_max_age: Duration,
}

impl UsageFetcher {
    pub fn new(api: ClaudeApi, resolver: AuthResolver, external_max_age: Duration) -> Self {
        Self {
            api,
            resolver,
            external_max_age,
        }
    }

    pub fn api(&self) -> &ClaudeApi {
        &self.api
    }

    pub fn resolver(&self) -> &AuthResolver {
        &self.resolver
    }

    /// Fetches a fresh snapshot for `profile` without persisting it.
    pub async fn fetch(&self, profile: &Profile) -> Result<UsageSnapshot, MeterError> {
        if let Some(snapshot) = self.read_external(profile).await {
            return Ok(snapshot);
        }
        let credential = self.resolver.resolve(profile.id).await?;
        self.api.fetch_usage(&credential).await
    }

    /// A missing, stale or unreadable external file falls back to the API.
    async fn read_external(&self, profile: &Profile) -> Option<UsageSnapshot> {
        let path = profile.external_snapshot.clone()?;
        let max_age = self.external_max_age;
        let shown = path.display().to_string();
        match run_blocking(move || snapshot_file::read_fresh(&path, max_age, Utc::now())).await {
            Ok(Some(snapshot)) => {
                debug!(profile_id = %profile.id, path = %shown, "Using external usage snapshot");
                Some(snapshot)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(profile_id = %profile.id, path = %shown, code = e.code(), error = %e, "Ignoring external usage snapshot");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiEndpoints;
    use crate::secrets::memory_store::MemorySecretStore;
    use crate::secrets::{CredentialVault, SessionKey};
    use crate::testing::{usage_body, ScriptedTransport};
    use crate::usage::api_client::Method;
    use crate::usage::types::UsageSource;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn fetcher(transport: Arc<ScriptedTransport>, vault: CredentialVault) -> UsageFetcher {
        let api = ClaudeApi::new(transport, ApiEndpoints::default(), Duration::from_secs(5));
        UsageFetcher::new(api, AuthResolver::new(vault, None), Duration::from_secs(300))
    }

    fn vault_with_key(profile: &Profile) -> CredentialVault {
        let vault = CredentialVault::new(Arc::new(MemorySecretStore::new()));
        vault
            .update(&profile.id, |set| {
                set.session_key = Some(SessionKey::parse("sk-ant-REDACTED").unwrap());
                set.organization_id = Some("org-1".to_string());
            })
            .unwrap();
        vault
    }

    #[tokio::test]
    async fn test_fetch_from_api() {
        let profile = Profile::new("Work");
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(Method::Get, "/usage", 200, &usage_body(42.0, 3.0));
        let snapshot = fetcher(transport, vault_with_key(&profile))
            .fetch(&profile)
            .await
            .unwrap();
        assert_eq!(snapshot.session_percent(), 42.0);
    }

    #[tokio::test]
    async fn test_fresh_external_file_skips_api() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latest_snapshot.json");
        let content = serde_json::json!({
            "generated_at": Utc::now().to_rfc3339(),
            "session_window": {"window_minutes": 300, "used_percent": 11.0},
        });
        std::fs::write(&path, content.to_string()).unwrap();

        let mut profile = Profile::new("Local");
        profile.external_snapshot = Some(path);
        let transport = Arc::new(ScriptedTransport::new());
        let snapshot = fetcher(transport.clone(), vault_with_key(&profile))
            .fetch(&profile)
            .await
            .unwrap();
        assert_eq!(snapshot.source, UsageSource::ExternalFile);
        assert_eq!(snapshot.session_percent(), 11.0);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_external_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latest_snapshot.json");
        std::fs::write(&path, "garbage").unwrap();

        let mut profile = Profile::new("Local");
        profile.external_snapshot = Some(path);
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(Method::Get, "/usage", 200, &usage_body(7.0, 3.0));
        let snapshot = fetcher(transport, vault_with_key(&profile))
            .fetch(&profile)
            .await
            .unwrap();
        assert_eq!(snapshot.source, UsageSource::WebSession);
    }
}
