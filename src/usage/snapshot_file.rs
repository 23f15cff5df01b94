//! Reader for the usage snapshot written by a local usage tracker.
//!
//! The tracker writes `latest_snapshot.json` with session and weekly windows,
//! the raw rate-limit block it captured, and the timezone it reported in.
//! A profile can opt in to reading it instead of calling the remote API; the
//! file is used only while it is fresh.

use super::types::{TrackerCredits, UsageSnapshot, UsageSource};
use super::window::{UsageWindow, WindowSpan};
use crate::error::StorageError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct TrackerFile {
    generated_at: String,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    session_window: Option<TrackerWindow>,
    #[serde(default)]
    weekly_window: Option<TrackerWindow>,
    #[serde(default)]
    rate_limits: Option<TrackerRateLimits>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackerWindow {
    #[serde(default)]
    window_minutes: Option<u32>,
    #[serde(default)]
    used_percent: Option<f64>,
    #[serde(default)]
    resets_at: Option<String>,
    #[serde(default)]
    resets_at_epoch: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackerRateLimits {
    #[serde(default)]
    primary: Option<TrackerWindow>,
    #[serde(default)]
    secondary: Option<TrackerWindow>,
    #[serde(default)]
    credits: Option<TrackerCreditBlock>,
}

#[derive(Debug, Deserialize)]
struct TrackerCreditBlock {
    #[serde(default, alias = "hasCredits")]
    has_credits: bool,
    #[serde(default)]
    unlimited: bool,
    /// Written as a decimal string by current trackers, a number by older ones.
    #[serde(default)]
    balance: Option<serde_json::Value>,
}

impl From<TrackerCreditBlock> for TrackerCredits {
    fn from(block: TrackerCreditBlock) -> Self {
        let balance = match block.balance {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        Self {
            has_credits: block.has_credits,
            unlimited: block.unlimited,
            balance,
        }
    }
}

/// Parses an ISO-8601 timestamp; a value without an offset is taken as UTC.
fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

impl TrackerWindow {
    fn resets_at(&self) -> Option<DateTime<Utc>> {
        self.resets_at
            .as_deref()
            .and_then(parse_iso)
            .or_else(|| {
                self.resets_at_epoch
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            })
    }

    fn span(&self, fallback: WindowSpan) -> WindowSpan {
        match self.window_minutes {
            Some(minutes) if minutes > 0 => WindowSpan::from_minutes(minutes),
            _ => fallback,
        }
    }
}

/// Picks the window block, falling back to the matching rate-limit entry when
/// the window itself has no percentage.
fn build_window(
    window: Option<&TrackerWindow>,
    rate_limit: Option<&TrackerWindow>,
    fallback_span: WindowSpan,
) -> Option<UsageWindow> {
    let source = [window, rate_limit]
        .into_iter()
        .flatten()
        .find(|w| w.used_percent.is_some())?;
    let percent = source.used_percent?;
    let resets_at = source
        .resets_at()
        .or_else(|| window.and_then(TrackerWindow::resets_at));
    let span = window.map_or(fallback_span, |w| w.span(source.span(fallback_span)));
    Some(UsageWindow::new(percent, resets_at, span))
}

/// Parses a tracker snapshot. `Ok(None)` means it carries no session
/// percentage, in which case the remote API is asked instead.
pub fn parse_snapshot(content: &str) -> Result<Option<(DateTime<Utc>, UsageSnapshot)>, StorageError> {
    let file: TrackerFile = serde_json::from_str(content)
        .map_err(|e| StorageError::decode("usage tracker snapshot", e))?;
    let generated_at = parse_iso(&file.generated_at).ok_or_else(|| {
        StorageError::decode(
            "usage tracker snapshot",
            format!("invalid generated_at: {}", file.generated_at),
        )
    })?;

    let limits = file.rate_limits.unwrap_or_default();
    let session = build_window(
        file.session_window.as_ref(),
        limits.primary.as_ref(),
        WindowSpan::SESSION,
    );
    let weekly = build_window(
        file.weekly_window.as_ref(),
        limits.secondary.as_ref(),
        WindowSpan::WEEKLY,
    );
    let Some(session) = session else {
        return Ok(None);
    };

    let timezone = file
        .timezone
        .filter(|tz| !tz.is_empty() && tz != "local");

    Ok(Some((
        generated_at,
        UsageSnapshot {
            session,
            session_unreported: false,
            weekly: weekly.unwrap_or_else(|| UsageWindow::new(0.0, None, WindowSpan::WEEKLY)),
            sub_metrics: Vec::new(),
            cost: None,
            credits: limits.credits.map(TrackerCredits::from),
            fetched_at: generated_at,
            timezone,
            source: UsageSource::ExternalFile,
        },
    )))
}

/// Reads the snapshot at `path` when it was generated within `max_age` of `now`.
///
/// A missing file, a stale file, or one without a session percentage is
/// `Ok(None)`; unreadable or malformed content is an error.
pub fn read_fresh(
    path: &Path,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Result<Option<UsageSnapshot>, StorageError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::read(path, e)),
    };
    let Some((generated_at, snapshot)) = parse_snapshot(&content)? else {
        return Ok(None);
    };
    let age = (now - generated_at).to_std().unwrap_or_default();
    if age > max_age {
        tracing::debug!(
            path = %path.display(),
            age_secs = age.as_secs(),
            "External usage snapshot is stale"
        );
        return Ok(None);
    }
    Ok(Some(snapshot))
}
