//! Data types for fetched usage.

use super::window::UsageWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    #[default]
    WebSession,
    OAuth,
    ExternalFile,
}

/// A weekly sub-limit reported next to the main windows (for example, a
/// model-specific weekly cap).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubMetric {
    /// API field name, such as `seven_day_opus`.
    pub name: String,
    pub window: UsageWindow,
}

impl SubMetric {
    /// Human label derived from the field name.
    pub fn label(&self) -> String {
        match self.name.strip_prefix("seven_day_") {
            Some(rest) => format!("Weekly ({})", rest.replace('_', " ")),
            None => self.name.replace('_', " "),
        }
    }
}

/// Overage spending, when enabled on the account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostUsage {
    pub enabled: bool,
    /// Monthly limit in the account's minor currency unit.
    pub monthly_limit: Option<f64>,
    pub used_credits: Option<f64>,
    pub utilization: Option<f64>,
}

/// Credit balance reported by the local usage tracker's rate-limit block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerCredits {
    pub has_credits: bool,
    pub unlimited: bool,
    pub balance: Option<f64>,
}

/// One successful fetch. Replaced wholesale by the next success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageSnapshot {
    /// Reads 0% when the source did not report a session window; see
    /// `session_unreported`.
    pub session: UsageWindow,
    /// The source carried no session percentage at all.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub session_unreported: bool,
    pub weekly: UsageWindow,
    #[serde(default)]
    pub sub_metrics: Vec<SubMetric>,
    #[serde(default)]
    pub cost: Option<CostUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<TrackerCredits>,
    pub fetched_at: DateTime<Utc>,
    /// IANA name when the source reports one.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub source: UsageSource,
}

impl UsageSnapshot {
    /// Session percentage for display; 0 when unreported.
    pub fn session_percent(&self) -> f64 {
        self.session.utilization
    }

    /// Session percentage only when the source actually reported one.
    pub fn session_reading(&self) -> Option<f64> {
        (!self.session_unreported).then_some(self.session.utilization)
    }

    pub fn weekly_percent(&self) -> f64 {
        self.weekly.utilization
    }

    /// Age of the snapshot relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.fetched_at
    }
}

/// Compact history entry kept per profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageHistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub session_percent: f64,
    pub weekly_percent: f64,
}

impl From<&UsageSnapshot> for UsageHistoryPoint {
    fn from(snapshot: &UsageSnapshot) -> Self {
        Self {
            timestamp: snapshot.fetched_at,
            session_percent: snapshot.session.utilization,
            weekly_percent: snapshot.weekly.utilization,
        }
    }
}

/// Organization visible to a session key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Prepaid credit balance reached through the API-key credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillingBalance {
    pub organization_id: String,
    /// Remaining balance in the account's currency.
    pub balance: f64,
    pub currency: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::window::WindowSpan;

    #[test]
    fn test_sub_metric_label() {
        let metric = SubMetric {
            name: "seven_day_oauth_apps".to_string(),
            window: UsageWindow::default(),
        };
        assert_eq!(metric.label(), "Weekly (oauth apps)");
    }

    #[test]
    fn test_history_point_from_snapshot() {
        let snapshot = UsageSnapshot {
            session: UsageWindow::new(42.0, None, WindowSpan::SESSION),
            session_unreported: false,
            weekly: UsageWindow::new(12.5, None, WindowSpan::WEEKLY),
            sub_metrics: Vec::new(),
            cost: None,
            credits: None,
            fetched_at: Utc::now(),
            timezone: None,
            source: UsageSource::WebSession,
        };
        let point = UsageHistoryPoint::from(&snapshot);
        assert_eq!(point.session_percent, 42.0);
        assert_eq!(point.weekly_percent, 12.5);
        assert_eq!(point.timestamp, snapshot.fetched_at);
    }

    #[test]
    fn test_snapshot_deserializes_without_optional_fields() {
        let json = r#"{
            "session": {"utilization": 10.0, "resets_at": null},
            "weekly": {"utilization": 5.0, "resets_at": null},
            "fetched_at": "2026-01-01T00:00:00Z"
        }"#;
        let snapshot: UsageSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.source, UsageSource::WebSession);
        assert!(snapshot.sub_metrics.is_empty());
        assert_eq!(snapshot.session.span, WindowSpan::Unknown);
    }
}
