//! A [`Transport`] that replays a fixed script of responses.
//!
//! Useful for offline runs against captured provider responses and for
//! tests that need exact control over what each request returns. Every
//! request is recorded so callers can assert on how many were issued and
//! with which query parameters.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::transport::{Transport, TransportError, TransportResponse};

/// One request as seen by a [`ReplayTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Requested endpoint.
    pub endpoint: String,
    /// Query parameters, in the order they were sent.
    pub query: Vec<(String, String)>,
}

impl RecordedRequest {
    /// Looks up a query parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

type Scripted = Result<TransportResponse, TransportError>;

/// Replays scripted responses in order.
///
/// Once the script runs out, the `fallback` response is returned for
/// every further request; without one, an exhausted script yields a fatal
/// transport error.
#[derive(Debug, Default)]
pub struct ReplayTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Option<Scripted>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ReplayTransport {
    /// Replays `script` in order.
    #[must_use]
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns `response` for every request.
    #[must_use]
    pub fn repeating(response: Scripted) -> Self {
        Self::new(Vec::new()).with_fallback(response)
    }

    /// Sets the response returned after the script is exhausted.
    #[must_use]
    pub fn with_fallback(mut self, response: Scripted) -> Self {
        self.fallback = Some(response);
        self
    }

    /// Every request issued so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of requests issued so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn get(
        &self,
        endpoint: &str,
        query: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(RecordedRequest {
                endpoint: endpoint.to_owned(),
                query: query.to_vec(),
            });

        let next = self
            .script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();

        match (next, &self.fallback) {
            (Some(scripted), _) => scripted,
            (None, Some(fallback)) => fallback.clone(),
            (None, None) => Err(TransportError::Fatal(format!(
                "replay script exhausted at {endpoint}"
            ))),
        }
    }
}

/// Builds a 200 response with `count` numbered records under `results`.
#[must_use]
pub fn results_page(count: usize) -> TransportResponse {
    let records: Vec<serde_json::Value> = (0..count)
        .map(|i| serde_json::json!({ "n": i }))
        .collect();
    TransportResponse::new(200, serde_json::json!({ "results": records }).to_string())
}

/// Like [`results_page`] but also reports `meta.found`.
#[must_use]
pub fn results_page_with_found(count: usize, found: u64) -> TransportResponse {
    let records: Vec<serde_json::Value> = (0..count)
        .map(|i| serde_json::json!({ "n": i }))
        .collect();
    TransportResponse::new(
        200,
        serde_json::json!({ "meta": { "found": found }, "results": records }).to_string(),
    )
}
