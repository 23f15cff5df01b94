//! One-time upgrade of pre-profile settings into a "Default" profile.

use super::types::{clamp_refresh_interval, IconStyle, Profile};
use serde::Deserialize;

/// Vault account the single pre-profile credential set lived under.
pub const LEGACY_SECRET_ACCOUNT: &str = "legacy";

pub const DEFAULT_PROFILE_NAME: &str = "Default";

/// Top-level fields of the single-account settings format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LegacySettings {
    #[serde(default)]
    pub refresh_interval: Option<u64>,
    #[serde(default)]
    pub icon_style: Option<String>,
    #[serde(default)]
    pub monochrome: Option<bool>,
    #[serde(default)]
    pub show_remaining_percentage: Option<bool>,
    #[serde(default)]
    pub auto_start_session: Option<bool>,
    #[serde(default)]
    pub notifications_enabled: Option<bool>,
}

impl LegacySettings {
    /// Recognizes the old format: a non-empty object without `profiles`.
    pub fn detect(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;
        if object.is_empty() || object.contains_key("profiles") {
            return None;
        }
        match serde_json::from_value::<LegacySettings>(value.clone()) {
            Ok(legacy) => Some(legacy),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable pre-profile settings");
                Some(LegacySettings::default())
            }
        }
    }

    /// Builds the profile that replaces the single-account settings.
    pub fn into_profile(self) -> Profile {
        let mut profile = Profile::new(DEFAULT_PROFILE_NAME);
        if let Some(secs) = self.refresh_interval {
            profile.refresh_interval_secs = clamp_refresh_interval(secs);
        }
        if let Some(style) = self.icon_style.as_deref().and_then(IconStyle::parse) {
            profile.display.style = style;
        }
        if let Some(monochrome) = self.monochrome {
            profile.display.monochrome = monochrome;
        }
        if let Some(remaining) = self.show_remaining_percentage {
            profile.display.remaining_mode = remaining;
        }
        if let Some(auto_start) = self.auto_start_session {
            profile.auto_start_session = auto_start;
        }
        if self.notifications_enabled == Some(false) {
            profile.thresholds.at_75 = false;
            profile.thresholds.at_90 = false;
            profile.thresholds.at_95 = false;
        }
        profile.selected = true;
        profile
    }
}
