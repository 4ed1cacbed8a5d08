//! Parsing of the page envelope returned by providers.
//!
//! The expected shape is a JSON object with a `results` list of record
//! objects and, optionally, a total-found hint:
//!
//! ```json
//! { "meta": { "found": 2410 }, "results": [ { ... }, { ... } ] }
//! ```
//!
//! A missing or `null` `results` is an empty page. Anything else that does
//! not match (a non-object body, a non-list `results`, a record that is
//! not an object) is a malformed response.
//!
//! The hint is read from `meta.found` or, failing that, from
//! `metadata.resultset.count`. Values that are not exact counts (e.g.
//! `">1000"`) are ignored.

use envseries_fetch_models::{PageResult, Record};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    results: Option<Vec<Record>>,
    #[serde(default)]
    meta: Option<serde_json::Value>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// Parses a 2xx response body into a [`PageResult`].
///
/// # Errors
///
/// Returns a description of the structural problem if the body is not a
/// page envelope.
pub fn parse_page(body: &str, status: u16) -> Result<PageResult, String> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| format!("invalid JSON: {e}"))?;
    if !value.is_object() {
        return Err(format!("expected a JSON object, got {}", kind_of(&value)));
    }

    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| format!("unexpected page shape: {e}"))?;

    let found = envelope
        .meta
        .as_ref()
        .and_then(|meta| meta.get("found"))
        .and_then(exact_count)
        .or_else(|| {
            envelope
                .metadata
                .as_ref()
                .and_then(|m| m.get("resultset"))
                .and_then(|r| r.get("count"))
                .and_then(exact_count)
        });

    Ok(PageResult {
        records: envelope.results.unwrap_or_default(),
        found,
        status,
    })
}

/// Accepts both numeric and string representations of a count.
fn exact_count(value: &serde_json::Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str()?.trim().parse::<u64>().ok())
}

const fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
