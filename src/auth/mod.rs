//! Authentication resolution: one validated credential per profile.

pub mod resolver;

pub use resolver::AuthResolver;

use crate::secrets::SessionKey;

/// Where a resolved credential came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    SessionKey,
    SavedCliOAuth,
    SystemCliOAuth,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::SessionKey => "session_key",
            CredentialSource::SavedCliOAuth => "saved_cli_oauth",
            CredentialSource::SystemCliOAuth => "system_cli_oauth",
        }
    }
}

/// A credential able to read usage data.
#[derive(Clone, PartialEq, Eq)]
pub enum ResolvedCredential {
    /// Web session cookie scoped to an organization.
    SessionKey {
        key: SessionKey,
        organization_id: String,
    },
    /// Bearer token from a CLI login.
    OAuth {
        access_token: String,
        source: CredentialSource,
    },
}

impl ResolvedCredential {
    #[cfg(test)]
    pub fn source(&self) -> CredentialSource {
        match self {
            ResolvedCredential::SessionKey { .. } => CredentialSource::SessionKey,
            ResolvedCredential::OAuth { source, .. } => *source,
        }
    }
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedCredential::SessionKey {
                key,
                organization_id,
            } => f
                .debug_struct("SessionKey")
                .field("key", key)
                .field("organization_id", organization_id)
                .finish(),
            ResolvedCredential::OAuth { source, .. } => f
                .debug_struct("OAuth")
                .field("access_token", &"<redacted>")
                .field("source", source)
                .finish(),
        }
    }
}
