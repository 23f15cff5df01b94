//! The CLI tool's OAuth credential blob.
//!
//! The blob is stored opaquely (the raw JSON is what gets copied between the
//! vault and the OS-level slot), and parsed only to pull out the access token
//! and expiry:
//!
//! ```json
//! {"claudeAiOauth": {"accessToken": "...", "expiresAt": 1767225600000}}
//! ```

use crate::error::CredentialError;
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOAuthBlob {
    raw: String,
    access_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    subscription_type: Option<String>,
}

impl CliOAuthBlob {
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let json: serde_json::Value = serde_json::from_str(raw.trim())
            .map_err(|e| CredentialError::InvalidFormat(format!("CLI credential blob: {}", e)))?;

        let oauth = &json["claudeAiOauth"];
        if !oauth.is_object() {
            return Err(CredentialError::InvalidFormat(
                "CLI credential blob has no claudeAiOauth section".to_string(),
            ));
        }

        let access_token = oauth["accessToken"]
            .as_str()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from);
        // expiresAt is epoch milliseconds
        let expires_at = oauth["expiresAt"]
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        let subscription_type = oauth["subscriptionType"].as_str().map(String::from);

        Ok(Self {
            raw: raw.trim().to_string(),
            access_token,
            expires_at,
            subscription_type,
        })
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    #[cfg(test)]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    #[cfg(test)]
    pub fn subscription_type(&self) -> Option<&str> {
        self.subscription_type.as_deref()
    }

    /// A blob without an expiry is treated as not expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Returns the access token if the blob is usable at `now`.
    pub fn usable_token(&self, now: DateTime<Utc>) -> Result<&str, CredentialError> {
        if let Some(at) = self.expires_at.filter(|_| self.is_expired(now)) {
            return Err(CredentialError::Expired(at));
        }
        self.access_token().ok_or_else(|| {
            CredentialError::InvalidFormat("CLI credential blob has no access token".to_string())
        })
    }
}
