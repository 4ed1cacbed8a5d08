//! Shared parsing utilities for provider fields.
//!
//! Timestamp and numeric parsing used by record extraction and by the
//! provider adapters.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

/// Parses a provider timestamp into the provider's local wall-clock time.
///
/// Accepts RFC 3339 with an offset (`2024-01-01T00:00:00-05:00`, the
/// offset is dropped so the local calendar day survives), bare ISO 8601
/// with optional fractional seconds, and plain `YYYY-MM-DD` dates.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN));
    }
    None
}

/// Reads a JSON scalar as a float. Numeric strings are accepted; `NaN`
/// and non-numeric values yield `None`.
#[must_use]
pub fn parse_number(value: &serde_json::Value) -> Option<f64> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if n.is_nan() { None } else { Some(n) }
}

/// Renders a JSON scalar as text. Returns `None` for null, arrays, and
/// objects.
#[must_use]
pub fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
