//! HTTP access to the usage, organization, billing and conversation APIs.
//!
//! `Transport` is the seam between request building and the wire: production
//! uses `UreqTransport`, tests script responses. Calls are blocking and run on
//! the blocking pool, bounded by the configured request timeout.

use super::parse;
use super::types::{BillingBalance, Organization, UsageSnapshot, UsageSource};
use crate::auth::ResolvedCredential;
use crate::config::ApiEndpoints;
use crate::error::{ApiError, MeterError, NetworkError};
use crate::secrets::SessionKey;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const OAUTH_BETA: &str = "oauth-2025-04-20";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body.into()),
        }
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    #[cfg(test)]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub retry_after_secs: Option<u64>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes one HTTP request. Non-2xx statuses are responses, not errors.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

fn map_ureq_error(err: ureq::Error) -> NetworkError {
    match err {
        ureq::Error::Timeout(_) => NetworkError::Timeout,
        ureq::Error::HostNotFound => NetworkError::Transport("host not found".to_string()),
        ureq::Error::ConnectionFailed => {
            NetworkError::Unreachable("connection failed".to_string())
        }
        ureq::Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => NetworkError::Timeout,
        ureq::Error::Io(e) => NetworkError::Unreachable(e.to_string()),
        other => NetworkError::Transport(other.to_string()),
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        let result = match request.method {
            Method::Get => {
                let mut builder = self.agent.get(&request.url);
                for (k, v) in &request.headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                builder.call()
            }
            Method::Delete => {
                let mut builder = self.agent.delete(&request.url);
                for (k, v) in &request.headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                builder.call()
            }
            Method::Post => {
                let mut builder = self.agent.post(&request.url);
                for (k, v) in &request.headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                builder.send(request.body.as_deref().unwrap_or(""))
            }
        };
        let mut response = result.map_err(map_ureq_error)?;
        let status = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(map_ureq_error)?;
        Ok(HttpResponse {
            status,
            retry_after_secs,
            body,
        })
    }
}

/// Typed client over a `Transport`.
#[derive(Clone)]
pub struct ClaudeApi {
    transport: Arc<dyn Transport>,
    endpoints: ApiEndpoints,
    timeout: Duration,
}

impl ClaudeApi {
    pub fn new(transport: Arc<dyn Transport>, endpoints: ApiEndpoints, timeout: Duration) -> Self {
        Self {
            transport,
            endpoints,
            timeout,
        }
    }

    /// Sends `request` off the runtime and maps non-2xx statuses to `ApiError`.
    async fn send(&self, request: HttpRequest) -> Result<String, MeterError> {
        let transport = self.transport.clone();
        let method = request.method;
        let url = request.url.clone();
        let task = tokio::task::spawn_blocking(move || transport.execute(&request));
        let response = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => return Err(NetworkError::Timeout.into()),
            Ok(Err(join)) => {
                return Err(NetworkError::Transport(format!("request task failed: {}", join)).into())
            }
            Ok(Ok(result)) => result?,
        };
        debug!(?method, url = %url, status = response.status, "API response");
        if !response.is_success() {
            return Err(ApiError::from_status(response.status, response.retry_after_secs).into());
        }
        Ok(response.body)
    }

    fn web_url(&self, path: &str) -> String {
        format!("{}{}", self.endpoints.web_base.trim_end_matches('/'), path)
    }

    fn with_session(request: HttpRequest, key: &SessionKey) -> HttpRequest {
        request.header("Cookie", format!("sessionKey={}", key.expose()))
    }

    /// Fetches usage with whichever credential the resolver chose.
    pub async fn fetch_usage(&self, credential: &ResolvedCredential) -> Result<UsageSnapshot, MeterError> {
        let (request, source) = match credential {
            ResolvedCredential::SessionKey {
                key,
                organization_id,
            } => {
                let url = self.web_url(&format!("/api/organizations/{}/usage", organization_id));
                (
                    Self::with_session(HttpRequest::get(url), key),
                    UsageSource::WebSession,
                )
            }
            ResolvedCredential::OAuth { access_token, .. } => {
                let url = format!(
                    "{}/api/oauth/usage",
                    self.endpoints.oauth_base.trim_end_matches('/')
                );
                let request = HttpRequest::get(url)
                    .header("Authorization", format!("Bearer {}", access_token))
                    .header("anthropic-beta", OAUTH_BETA)
                    .header("Content-Type", "application/json");
                (request, UsageSource::OAuth)
            }
        };
        let body = self.send(request).await?;
        Ok(parse::parse_usage(&body, source, Utc::now())?)
    }

    pub async fn list_organizations(&self, key: &SessionKey) -> Result<Vec<Organization>, MeterError> {
        let request = Self::with_session(HttpRequest::get(self.web_url("/api/organizations")), key);
        let body = self.send(request).await?;
        Ok(parse::parse_organizations(&body)?)
    }

    pub async fn fetch_billing(&self, api_key: &str, organization_id: &str) -> Result<BillingBalance, MeterError> {
        let url = format!(
            "{}/api/organizations/{}/prepaid/credits",
            self.endpoints.console_base.trim_end_matches('/'),
            organization_id
        );
        let request = HttpRequest::get(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01");
        let body = self.send(request).await?;
        Ok(parse::parse_billing(&body, organization_id, Utc::now())?)
    }

    /// Creates an empty conversation and returns its id.
    pub async fn create_conversation(&self, key: &SessionKey, organization_id: &str) -> Result<String, MeterError> {
        let conversation_id = uuid::Uuid::new_v4().to_string();
        let url = self.web_url(&format!(
            "/api/organizations/{}/chat_conversations",
            organization_id
        ));
        let body = serde_json::json!({ "uuid": conversation_id, "name": "" });
        let request = Self::with_session(HttpRequest::post(url, body.to_string()), key);
        let response = self.send(request).await?;
        Ok(parse::parse_conversation_id(&response).unwrap_or(conversation_id))
    }

    /// Sends one message; returns the session reset time if the response reports it.
    pub async fn send_message(
        &self,
        key: &SessionKey,
        organization_id: &str,
        conversation_id: &str,
        prompt: &str,
        timezone: &str,
    ) -> Result<Option<DateTime<Utc>>, MeterError> {
        let url = self.web_url(&format!(
            "/api/organizations/{}/chat_conversations/{}/completion",
            organization_id, conversation_id
        ));
        let body = serde_json::json!({
            "prompt": prompt,
            "timezone": timezone,
            "attachments": [],
            "files": [],
        });
        let request = Self::with_session(HttpRequest::post(url, body.to_string()), key)
            .header("Accept", "text/event-stream");
        let response = self.send(request).await?;
        Ok(parse::parse_message_reset(&response))
    }

    pub async fn delete_conversation(
        &self,
        key: &SessionKey,
        organization_id: &str,
        conversation_id: &str,
    ) -> Result<(), MeterError> {
        let url = self.web_url(&format!(
            "/api/organizations/{}/chat_conversations/{}",
            organization_id, conversation_id
        ));
        self.send(Self::with_session(HttpRequest::delete(url), key))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
#[path = "tests/api_client_tests.rs"]
mod tests;
