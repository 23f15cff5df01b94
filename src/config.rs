use crate::app_paths::AppPaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine tuning loaded from `config.yaml`.
///
/// Every field has a default so an absent or partial file is valid.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    /// Bound on every network call, in seconds. Default: 30
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Consecutive failures before a breaker reports open. Default: 3
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    /// How long after a user action its errors are still surfaced. Default: 10
    #[serde(default = "default_user_action_window_secs")]
    pub user_action_window_secs: u64,
    #[serde(default)]
    pub auto_start: AutoStartConfig,
    /// Trailing debounce for redraw requests, in milliseconds. Default: 150
    #[serde(default = "default_redraw_debounce_ms")]
    pub redraw_debounce_ms: u64,
    /// Maximum age of the external snapshot file, in seconds. Default: 300
    #[serde(default = "default_external_snapshot_max_age_secs")]
    pub external_snapshot_max_age_secs: u64,
    #[serde(default)]
    pub api: ApiEndpoints,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryPolicy::default(),
            breaker_threshold: default_breaker_threshold(),
            user_action_window_secs: default_user_action_window_secs(),
            auto_start: AutoStartConfig::default(),
            redraw_debounce_ms: default_redraw_debounce_ms(),
            external_snapshot_max_age_secs: default_external_snapshot_max_age_secs(),
            api: ApiEndpoints::default(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_breaker_threshold() -> u32 {
    3
}

fn default_user_action_window_secs() -> u64 {
    10
}

fn default_redraw_debounce_ms() -> u64 {
    crate::render::redraw::DEFAULT_REDRAW_WINDOW.as_millis() as u64
}

fn default_external_snapshot_max_age_secs() -> u64 {
    300
}

/// In-place retry for transient fetch failures.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the first failure. Default: 2
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff in milliseconds, doubled per attempt. Default: 1000
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Upper bound of random jitter added to each backoff. Default: 250
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_jitter_ms() -> u64 {
    250
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        use rand::Rng;
        let exp = self
            .backoff_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(exp.saturating_add(jitter))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AutoStartConfig {
    /// Fixed check cadence, in seconds. Default: 300
    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,
    /// Checks within this many seconds of the previous one are dropped. Default: 10
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    /// Tick of the sleep/wake detector, in seconds. Default: 30
    #[serde(default = "default_wake_tick_secs")]
    pub wake_tick_secs: u64,
    /// Message sent to open a new session window.
    #[serde(default = "default_init_message")]
    pub init_message: String,
}

fn default_cadence_secs() -> u64 {
    300
}

fn default_debounce_secs() -> u64 {
    10
}

fn default_wake_tick_secs() -> u64 {
    30
}

fn default_init_message() -> String {
    "Hi".to_string()
}

impl Default for AutoStartConfig {
    fn default() -> Self {
        Self {
            cadence_secs: default_cadence_secs(),
            debounce_secs: default_debounce_secs(),
            wake_tick_secs: default_wake_tick_secs(),
            init_message: default_init_message(),
        }
    }
}

/// Base URLs of the remote services.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ApiEndpoints {
    /// Web API: usage by session cookie, organizations, conversations.
    #[serde(default = "default_web_base")]
    pub web_base: String,
    /// OAuth API: usage by bearer token.
    #[serde(default = "default_oauth_base")]
    pub oauth_base: String,
    /// Console API: billing by API key.
    #[serde(default = "default_console_base")]
    pub console_base: String,
}

fn default_web_base() -> String {
    "https://claude.ai".to_string()
}

fn default_oauth_base() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_console_base() -> String {
    "https://console.anthropic.com".to_string()
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            web_base: default_web_base(),
            oauth_base: default_oauth_base(),
            console_base: default_console_base(),
        }
    }
}

impl EngineConfig {
    /// Loads `config.yaml` from the home directory, or defaults when absent.
    pub fn load(paths: &AppPaths) -> Result<Self> {
        Self::load_from(&paths.config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: EngineConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        if self.auto_start.cadence_secs == 0 {
            anyhow::bail!("auto_start.cadence_secs must be greater than zero");
        }
        if self.breaker_threshold == 0 {
            anyhow::bail!("breaker_threshold must be greater than zero");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn user_action_window(&self) -> Duration {
        Duration::from_secs(self.user_action_window_secs)
    }

    pub fn redraw_debounce(&self) -> Duration {
        Duration::from_millis(self.redraw_debounce_ms)
    }

    pub fn external_snapshot_max_age(&self) -> Duration {
        Duration::from_secs(self.external_snapshot_max_age_secs)
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
