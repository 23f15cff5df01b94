//! Metering windows with utilization and reset time.
//!
//! A `UsageWindow` pairs the utilization reported for one metering period
//! with the moment it resets, so countdowns and pace can be derived at render
//! time from the persisted value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The length of a metering window, when known.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum WindowSpan {
    #[default]
    Unknown,
    Minutes(u32),
    Hours(u16),
    Days(u16),
}

impl WindowSpan {
    pub const SESSION: WindowSpan = WindowSpan::Hours(5);
    pub const WEEKLY: WindowSpan = WindowSpan::Days(7);

    pub fn duration(&self) -> Option<Duration> {
        match self {
            WindowSpan::Unknown => None,
            WindowSpan::Minutes(m) => Some(Duration::from_secs(*m as u64 * 60)),
            WindowSpan::Hours(h) => Some(Duration::from_secs(*h as u64 * 3600)),
            WindowSpan::Days(d) => Some(Duration::from_secs(*d as u64 * 86400)),
        }
    }

    /// Short label such as "5h" or "7d"; `None` when unknown.
    #[cfg(test)]
    pub fn label(&self) -> Option<String> {
        match self {
            WindowSpan::Unknown => None,
            WindowSpan::Minutes(m) if *m >= 60 && *m % 60 == 0 => Some(format!("{}h", m / 60)),
            WindowSpan::Minutes(m) => Some(format!("{}m", m)),
            WindowSpan::Hours(h) if *h >= 24 && *h % 24 == 0 => Some(format!("{}d", h / 24)),
            WindowSpan::Hours(h) => Some(format!("{}h", h)),
            WindowSpan::Days(d) => Some(format!("{}d", d)),
        }
    }

    /// Maps a window length in minutes to the closest span variant.
    pub fn from_minutes(minutes: u32) -> Self {
        match minutes {
            0 => WindowSpan::Unknown,
            m if m % 1440 == 0 => WindowSpan::Days((m / 1440) as u16),
            m if m % 60 == 0 => WindowSpan::Hours((m / 60) as u16),
            m => WindowSpan::Minutes(m),
        }
    }
}

/// Usage pace compared to the time elapsed in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceStatus {
    /// Used more than the elapsed share of the window (by over 10 points).
    Ahead,
    OnTrack,
    /// Used less than the elapsed share of the window (by over 10 points).
    Behind,
    Unknown,
}

/// One metering window: utilization percentage and its reset time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageWindow {
    /// Percentage used, 0-100.
    pub utilization: f64,
    pub resets_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub span: WindowSpan,
}

impl UsageWindow {
    pub fn new(utilization: f64, resets_at: Option<DateTime<Utc>>, span: WindowSpan) -> Self {
        Self {
            utilization: utilization.clamp(0.0, 100.0),
            resets_at,
            span,
        }
    }

    /// Percentage still available.
    #[cfg(test)]
    pub fn remaining(&self) -> f64 {
        (100.0 - self.utilization).max(0.0)
    }

    /// Time left until reset, or `None` if unknown or already past.
    pub fn time_until_reset(&self, now: DateTime<Utc>) -> Option<Duration> {
        let resets_at = self.resets_at?;
        (resets_at - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Compares utilization with elapsed window time, +/- 10 points.
    pub fn pace(&self, now: DateTime<Utc>) -> PaceStatus {
        let Some(window) = self.span.duration() else {
            return PaceStatus::Unknown;
        };
        let Some(remaining) = self.time_until_reset(now) else {
            return PaceStatus::Unknown;
        };

        let total = window.as_secs_f64();
        let elapsed = (total - remaining.as_secs_f64()).max(0.0);
        let elapsed_pct = ((elapsed / total) * 100.0).clamp(0.0, 100.0);
        let threshold = 10.0;

        if self.utilization > elapsed_pct + threshold {
            PaceStatus::Ahead
        } else if self.utilization < elapsed_pct - threshold {
            PaceStatus::Behind
        } else {
            PaceStatus::OnTrack
        }
    }
}

/// Formats a duration as a countdown ("4h 05m", "2d 3h", "45m").
///
/// Seconds are dropped; `None` and zero render as "0m".
pub fn format_countdown(duration: Option<Duration>) -> String {
    let Some(d) = duration else {
        return "0m".to_string();
    };

    let total_secs = d.as_secs();
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let minutes = (total_secs % 3600) / 60;

    if days > 0 {
        if minutes > 0 {
            format!("{}d {}h {:02}m", days, hours, minutes)
        } else if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    } else if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
