//! Parsing of remote API response bodies.

use super::types::{BillingBalance, CostUsage, Organization, SubMetric, UsageSnapshot, UsageSource};
use super::window::{UsageWindow, WindowSpan};
use crate::error::ApiError;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

fn parse_json(body: &str) -> Result<Value, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::Malformed(e.to_string()))
}

/// Parses an RFC 3339 string or epoch seconds.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

/// `None` unless the window is an object with a numeric utilization.
fn parse_window(value: &Value, span: WindowSpan) -> Option<UsageWindow> {
    let utilization = value.as_object()?.get("utilization")?.as_f64()?;
    Some(UsageWindow::new(
        utilization,
        parse_timestamp(&value["resets_at"]),
        span,
    ))
}

/// Parses the usage resource shared by the web and OAuth endpoints.
///
/// A body with neither a session nor a weekly window is malformed. An absent
/// weekly window reads as 0%. An absent session window also displays as 0%
/// but is flagged unreported, so it never counts as a real zero.
pub fn parse_usage(
    body: &str,
    source: UsageSource,
    fetched_at: DateTime<Utc>,
) -> Result<UsageSnapshot, ApiError> {
    let json = parse_json(body)?;
    let Some(object) = json.as_object() else {
        return Err(ApiError::Malformed("usage response is not an object".to_string()));
    };
    if !object.contains_key("five_hour") && !object.contains_key("seven_day") {
        return Err(ApiError::Malformed(
            "usage response has no five_hour or seven_day window".to_string(),
        ));
    }

    let session = parse_window(&json["five_hour"], WindowSpan::SESSION);
    let session_unreported = session.is_none();
    let session = session.unwrap_or_else(|| UsageWindow::new(0.0, None, WindowSpan::SESSION));
    let weekly = parse_window(&json["seven_day"], WindowSpan::WEEKLY)
        .unwrap_or_else(|| UsageWindow::new(0.0, None, WindowSpan::WEEKLY));

    let sub_metrics = object
        .iter()
        .filter(|(name, _)| name.starts_with("seven_day_"))
        .filter_map(|(name, value)| {
            parse_window(value, WindowSpan::WEEKLY).map(|window| SubMetric {
                name: name.clone(),
                window,
            })
        })
        .collect();

    let cost = json["extra_usage"].as_object().map(|extra| CostUsage {
        enabled: extra
            .get("is_enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        monthly_limit: extra.get("monthly_limit").and_then(Value::as_f64),
        used_credits: extra.get("used_credits").and_then(Value::as_f64),
        utilization: extra.get("utilization").and_then(Value::as_f64),
    });

    Ok(UsageSnapshot {
        session,
        session_unreported,
        weekly,
        sub_metrics,
        cost,
        credits: None,
        fetched_at,
        timezone: None,
        source,
    })
}

pub fn parse_organizations(body: &str) -> Result<Vec<Organization>, ApiError> {
    let json = parse_json(body)?;
    let Some(items) = json.as_array() else {
        return Err(ApiError::Malformed(
            "organization list is not an array".to_string(),
        ));
    };
    Ok(items
        .iter()
        .filter_map(|item| {
            let uuid = item["uuid"].as_str()?.to_string();
            let name = item["name"].as_str().unwrap_or("").to_string();
            let capabilities = item["capabilities"]
                .as_array()
                .map(|caps| {
                    caps.iter()
                        .filter_map(|c| c.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            Some(Organization {
                uuid,
                name,
                capabilities,
            })
        })
        .collect())
}

/// Prepaid credit response; `amount` is in minor currency units.
pub fn parse_billing(
    body: &str,
    organization_id: &str,
    fetched_at: DateTime<Utc>,
) -> Result<BillingBalance, ApiError> {
    let json = parse_json(body)?;
    let amount = json["amount"]
        .as_f64()
        .ok_or_else(|| ApiError::Malformed("billing response has no amount".to_string()))?;
    Ok(BillingBalance {
        organization_id: organization_id.to_string(),
        balance: amount / 100.0,
        currency: json["currency"].as_str().map(String::from),
        fetched_at,
    })
}

pub fn parse_conversation_id(body: &str) -> Result<String, ApiError> {
    let json = parse_json(body)?;
    json["uuid"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| ApiError::Malformed("conversation response has no uuid".to_string()))
}

/// Finds the session reset time in a message response.
///
/// The response is a server-sent event stream; a `message_limit` object in
/// any event may carry `resetsAt` (epoch seconds) or per-window reset times.
pub fn parse_message_reset(body: &str) -> Option<DateTime<Utc>> {
    let events = body
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<Value>(data.trim()).ok());
    let whole = serde_json::from_str::<Value>(body).ok();

    whole.into_iter().chain(events).find_map(|event| {
        let limit = &event["message_limit"];
        if !limit.is_object() {
            return None;
        }
        parse_timestamp(&limit["resetsAt"])
            .or_else(|| parse_timestamp(&limit["windows"]["5h"]["resets_at"]))
    })
}

#[cfg(test)]
#[path = "tests/parse_tests.rs"]
mod tests;
