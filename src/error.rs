//! Error taxonomy for the credential and refresh engine.
//!
//! Every variant carries a stable code (for example `NET-002`) so a log line
//! or notification can be correlated with a support request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Failure domain, used to key circuit breakers and to pick a surfacing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    Credential,
    Network,
    Authorization,
    RateLimit,
    Server,
    Parse,
    Storage,
}

impl ErrorDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorDomain::Credential => "credential",
            ErrorDomain::Network => "network",
            ErrorDomain::Authorization => "authorization",
            ErrorDomain::RateLimit => "rate_limit",
            ErrorDomain::Server => "server",
            ErrorDomain::Parse => "parse",
            ErrorDomain::Storage => "storage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// No source produced a usable credential. Needs user action; never retried.
    #[error("no credentials configured for this profile")]
    NotFound,
    #[error("invalid credential format: {0}")]
    InvalidFormat(String),
    #[error("credential expired at {0}")]
    Expired(DateTime<Utc>),
    /// The API-key credential only reaches billing data.
    #[error("API key credentials grant billing access only, not usage data")]
    BillingOnly,
    #[error("session key has no organization id")]
    MissingOrganization,
}

impl CredentialError {
    pub fn code(&self) -> &'static str {
        match self {
            CredentialError::NotFound => "CRED-001",
            CredentialError::InvalidFormat(_) => "CRED-002",
            CredentialError::Expired(_) => "CRED-003",
            CredentialError::BillingOnly => "CRED-004",
            CredentialError::MissingOrganization => "CRED-005",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("request timed out")]
    Timeout,
    #[error("TLS or DNS failure: {0}")]
    Transport(String),
}

impl NetworkError {
    pub fn code(&self) -> &'static str {
        match self {
            NetworkError::Unreachable(_) => "NET-001",
            NetworkError::Timeout => "NET-002",
            NetworkError::Transport(_) => "NET-003",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("unauthorized (HTTP {0})")]
    Unauthorized(u16),
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("server error (HTTP {0})")]
    Server(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("unexpected status (HTTP {0})")]
    UnexpectedStatus(u16),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "API-001",
            ApiError::RateLimited { .. } => "API-002",
            ApiError::Server(_) => "API-003",
            ApiError::Malformed(_) => "API-004",
            ApiError::UnexpectedStatus(_) => "API-005",
        }
    }

    /// Maps a non-success HTTP status to an error.
    pub fn from_status(status: u16, retry_after_secs: Option<u64>) -> Self {
        match status {
            401 | 403 => ApiError::Unauthorized(status),
            429 => ApiError::RateLimited { retry_after_secs },
            500..=599 => ApiError::Server(status),
            _ => ApiError::UnexpectedStatus(status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },
    #[error("failed to encode {what}: {message}")]
    Encode { what: String, message: String },
    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },
    #[error("secret store command failed: {0}")]
    Command(String),
}

impl StorageError {
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::Read { .. } => "STORE-001",
            StorageError::Write { .. } => "STORE-002",
            StorageError::Encode { .. } => "STORE-003",
            StorageError::Decode { .. } => "STORE-004",
            StorageError::Command(_) => "STORE-005",
        }
    }

    pub fn read(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        StorageError::Read {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        StorageError::Write {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn encode(what: &str, err: impl std::fmt::Display) -> Self {
        StorageError::Encode {
            what: what.to_string(),
            message: err.to_string(),
        }
    }

    pub fn decode(what: &str, err: impl std::fmt::Display) -> Self {
        StorageError::Decode {
            what: what.to_string(),
            message: err.to_string(),
        }
    }
}

/// Any failure the engine can report for a fetch or credential operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeterError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl MeterError {
    pub fn code(&self) -> &'static str {
        match self {
            MeterError::Credential(e) => e.code(),
            MeterError::Network(e) => e.code(),
            MeterError::Api(e) => e.code(),
            MeterError::Storage(e) => e.code(),
        }
    }

    pub fn domain(&self) -> ErrorDomain {
        match self {
            MeterError::Credential(_) => ErrorDomain::Credential,
            MeterError::Network(_) => ErrorDomain::Network,
            MeterError::Api(ApiError::Unauthorized(_)) => ErrorDomain::Authorization,
            MeterError::Api(ApiError::RateLimited { .. }) => ErrorDomain::RateLimit,
            MeterError::Api(ApiError::Server(_)) => ErrorDomain::Server,
            MeterError::Api(ApiError::UnexpectedStatus(_)) => ErrorDomain::Server,
            MeterError::Api(ApiError::Malformed(_)) => ErrorDomain::Parse,
            MeterError::Storage(_) => ErrorDomain::Storage,
        }
    }

    /// True for failures worth retrying in place (timeouts, connection
    /// failures, 5xx).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MeterError::Network(_) | MeterError::Api(ApiError::Server(_))
        )
    }

    /// True when retrying cannot help until the user changes credentials.
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            MeterError::Credential(CredentialError::NotFound)
                | MeterError::Credential(CredentialError::Expired(_))
                | MeterError::Credential(CredentialError::BillingOnly)
                | MeterError::Api(ApiError::Unauthorized(_))
        )
    }
}

/// Profile lifecycle failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("profile not found: {0}")]
    NotFound(String),
    #[error("cannot delete last profile")]
    LastProfile,
    #[error("another profile activation is in progress")]
    ActivationInProgress,
    #[error("invalid profile name: {0}")]
    InvalidName(String),
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProfileError {
    #[cfg(test)]
    pub fn code(&self) -> &'static str {
        match self {
            ProfileError::NotFound(_) => "PROF-001",
            ProfileError::LastProfile => "PROF-002",
            ProfileError::ActivationInProgress => "PROF-003",
            ProfileError::InvalidName(_) => "PROF-004",
            ProfileError::InvalidSetting(_) => "PROF-005",
            ProfileError::Credential(e) => e.code(),
            ProfileError::Storage(e) => e.code(),
        }
    }
}
