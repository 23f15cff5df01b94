//! Profile records and process-wide settings persisted in `settings.json`.

use crate::usage::{UsageHistoryPoint, UsageSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub const MIN_REFRESH_INTERVAL_SECS: u64 = 5;
pub const MAX_REFRESH_INTERVAL_SECS: u64 = 300;
pub const MAX_HISTORY_ENTRIES: usize = 100;
pub const SETTINGS_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub Uuid);

impl ProfileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the status indicator is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IconStyle {
    #[default]
    Battery,
    Bar,
    Percentage,
    Ring,
}

impl IconStyle {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "battery" => Some(IconStyle::Battery),
            "bar" | "progress" => Some(IconStyle::Bar),
            "percentage" | "percent" | "text" => Some(IconStyle::Percentage),
            "ring" | "circle" => Some(IconStyle::Ring),
            _ => None,
        }
    }
}

/// Per-profile visual policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub style: IconStyle,
    #[serde(default)]
    pub monochrome: bool,
    #[serde(default = "default_true")]
    pub show_session: bool,
    #[serde(default)]
    pub show_weekly: bool,
    #[serde(default)]
    pub show_sub_metrics: bool,
    /// Show percentage remaining instead of used.
    #[serde(default)]
    pub remaining_mode: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            style: IconStyle::default(),
            monochrome: false,
            show_session: true,
            show_weekly: false,
            show_sub_metrics: false,
            remaining_mode: false,
        }
    }
}

/// The three fixed session thresholds and whether each one notifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationThresholds {
    #[serde(default = "default_true")]
    pub at_75: bool,
    #[serde(default = "default_true")]
    pub at_90: bool,
    #[serde(default = "default_true")]
    pub at_95: bool,
}

impl Default for NotificationThresholds {
    fn default() -> Self {
        Self {
            at_75: true,
            at_90: true,
            at_95: true,
        }
    }
}

impl NotificationThresholds {
    pub const LEVELS: [u8; 3] = [75, 90, 95];

    pub fn is_enabled(&self, level: u8) -> bool {
        match level {
            75 => self.at_75,
            90 => self.at_90,
            95 => self.at_95,
            _ => false,
        }
    }

    pub fn set(&mut self, level: u8, enabled: bool) -> bool {
        match level {
            75 => self.at_75 = enabled,
            90 => self.at_90 = enabled,
            95 => self.at_95 = enabled,
            _ => return false,
        }
        true
    }
}

fn default_refresh_interval_secs() -> u64 {
    30
}

/// Clamps an interval into the allowed refresh range.
pub fn clamp_refresh_interval(secs: u64) -> u64 {
    secs.clamp(MIN_REFRESH_INTERVAL_SECS, MAX_REFRESH_INTERVAL_SECS)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub auto_start_session: bool,
    #[serde(default)]
    pub thresholds: NotificationThresholds,
    /// Written only by the refresh engine.
    #[serde(default)]
    pub snapshot: Option<UsageSnapshot>,
    #[serde(default)]
    pub history: Vec<UsageHistoryPoint>,
    /// Session reset time captured by the last auto-start; written only by
    /// the auto-start monitor.
    #[serde(default)]
    pub auto_start_reset_at: Option<DateTime<Utc>>,
    /// Tracker snapshot file to read instead of calling the API.
    #[serde(default)]
    pub external_snapshot: Option<PathBuf>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    /// Participates in multi-profile display.
    #[serde(default)]
    pub selected: bool,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(name: &str) -> Self {
        Self {
            id: ProfileId::new(),
            name: name.to_string(),
            display: DisplayConfig::default(),
            refresh_interval_secs: default_refresh_interval_secs(),
            auto_start_session: false,
            thresholds: NotificationThresholds::default(),
            snapshot: None,
            history: Vec::new(),
            auto_start_reset_at: None,
            external_snapshot: None,
            last_used: None,
            selected: false,
            created_at: Utc::now(),
        }
    }

    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(clamp_refresh_interval(self.refresh_interval_secs))
    }

    /// Replaces the snapshot and appends to the bounded history.
    pub fn apply_snapshot(&mut self, snapshot: UsageSnapshot) {
        self.history.push(UsageHistoryPoint::from(&snapshot));
        if self.history.len() > MAX_HISTORY_ENTRIES {
            let excess = self.history.len() - MAX_HISTORY_ENTRIES;
            self.history.drain(..excess);
        }
        self.snapshot = Some(snapshot);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Only the active profile is shown and refreshed.
    #[default]
    Single,
    /// Every selected profile is shown and refreshed.
    Multi,
}

/// Contents of `settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default = "default_settings_version")]
    pub version: u32,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub active_profile_id: Option<ProfileId>,
    #[serde(default)]
    pub display_mode: DisplayMode,
}

fn default_settings_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for SettingsFile {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            profiles: Vec::new(),
            active_profile_id: None,
            display_mode: DisplayMode::default(),
        }
    }
}

impl SettingsFile {
    pub fn profile(&self, id: &ProfileId) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == *id)
    }

    pub fn profile_mut(&mut self, id: &ProfileId) -> Option<&mut Profile> {
        self.profiles.iter_mut().find(|p| p.id == *id)
    }

    /// The active profile, falling back to the first one when the stored id
    /// is missing or stale.
    pub fn active_profile(&self) -> Option<&Profile> {
        self.active_profile_id
            .and_then(|id| self.profile(&id))
            .or_else(|| self.profiles.first())
    }

    /// Profiles the refresh engine should poll in the current display mode.
    pub fn refresh_targets(&self) -> Vec<&Profile> {
        match self.display_mode {
            DisplayMode::Single => self.active_profile().into_iter().collect(),
            DisplayMode::Multi => {
                let selected: Vec<&Profile> =
                    self.profiles.iter().filter(|p| p.selected).collect();
                if selected.is_empty() {
                    self.active_profile().into_iter().collect()
                } else {
                    selected
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
