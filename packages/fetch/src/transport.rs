//! The HTTP seam of the fetch loop.
//!
//! The retry policy and paginator only ever talk to a [`Transport`], which
//! reduces a GET request to a status code, an optional `Retry-After` hint,
//! and a body. [`HttpTransport`] is the `reqwest` implementation; it is
//! cheap to clone and safe to share between concurrent fetches.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Default per-request timeout for [`HttpTransport`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What a transport hands back for a request that reached the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Wait advised by the provider via `Retry-After`.
    pub retry_after: Option<Duration>,
    /// Raw response body.
    pub body: String,
}

impl TransportResponse {
    /// Creates a response with no `Retry-After` hint.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    /// Attaches a `Retry-After` hint.
    #[must_use]
    pub const fn with_retry_after(mut self, wait: Duration) -> Self {
        self.retry_after = Some(wait);
        self
    }
}

/// A request that never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Timeouts, refused or reset connections, truncated bodies.
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// Failures that will repeat on every attempt (bad URL, bad header).
    #[error("transport failure: {0}")]
    Fatal(String),
}

/// Sends a single GET request for the fetch loop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Requests `endpoint` with the given query parameters.
    ///
    /// Non-2xx statuses are *not* errors at this layer; they are returned
    /// as a [`TransportResponse`] for the retry policy to classify.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no response was received.
    async fn get(
        &self,
        endpoint: &str,
        query: &[(String, String)],
    ) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Builds a transport for `base_url` that sends `headers` with every
    /// request and gives up on a single request after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Fatal`] if a header name or value is
    /// invalid or the client cannot be built.
    pub fn new(
        base_url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| TransportError::Fatal(format!("invalid header name '{key}': {e}")))?;
            let val = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| TransportError::Fatal(format!("invalid header value for '{key}': {e}")))?;
            header_map.insert(name, val);
        }
        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(client, base_url))
    }

    /// Wraps an existing client, sharing its connection pool.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// The base URL every endpoint is joined onto.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_owned();
        }
        if endpoint.starts_with('/') {
            format!("{}{endpoint}", self.base_url)
        } else {
            format!("{}/{endpoint}", self.base_url)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        endpoint: &str,
        query: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        let url = self.url_for(endpoint);
        log::trace!("GET {url} {query:?}");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));

        let body = response.text().await.map_err(classify_reqwest_error)?;

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Maps a `reqwest` failure onto the transient/fatal split.
fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if is_transient(&e) {
        TransportError::Transient(e.to_string())
    } else {
        TransportError::Fatal(e.to_string())
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    !e.is_builder() && (e.is_timeout() || e.is_connect() || e.is_body() || e.is_request())
}

/// Parses a `Retry-After` value, either delta-seconds or an HTTP-date.
///
/// Dates in the past yield a zero wait.
pub(crate) fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 0).unwrap()
    }

    #[test]
    fn parses_delta_seconds() {
        assert_eq!(parse_retry_after("12", now()), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after(" 0 ", now()), Some(Duration::ZERO));
    }

    #[test]
    fn parses_http_date() {
        let wait = parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now());
        assert_eq!(wait, Some(Duration::from_secs(60)));
    }

    #[test]
    fn past_http_date_means_no_wait() {
        let wait = parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now());
        assert_eq!(wait, Some(Duration::ZERO));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_retry_after("soon", now()), None);
        assert_eq!(parse_retry_after("-5", now()), None);
    }

    #[test]
    fn joins_endpoints_onto_base_url() {
        let transport =
            HttpTransport::with_client(reqwest::Client::new(), "https://api.example.org/v3/");
        assert_eq!(transport.base_url(), "https://api.example.org/v3");
        assert_eq!(
            transport.url_for("/locations"),
            "https://api.example.org/v3/locations"
        );
        assert_eq!(
            transport.url_for("sensors/7/days"),
            "https://api.example.org/v3/sensors/7/days"
        );
        assert_eq!(
            transport.url_for("https://other.example.org/file.csv"),
            "https://other.example.org/file.csv"
        );
    }

    #[test]
    fn rejects_invalid_header_names() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_owned(), "x".to_owned());
        let err = HttpTransport::new("https://example.org", &headers, DEFAULT_TIMEOUT).unwrap_err();
        assert!(matches!(err, TransportError::Fatal(_)));
    }
}
