#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Paginated fetching from rate-limited JSON APIs.
//!
//! A [`FetchRequest`](envseries_fetch_models::FetchRequest) is driven page
//! by page through a [`Transport`](transport::Transport). Every page goes
//! through the retry policy in [`retry`] before it is accepted, and
//! accepted pages are appended to an [`Accumulator`](accumulator::Accumulator).
//!
//! The loop is fail-soft on transient failures: when a page exhausts its
//! retry budget the records fetched so far are returned with a
//! [`Completion::Abandoned`] marker instead of an error. Client-side errors
//! and malformed responses abort with [`FetchError`], which still carries
//! the records accepted before the failing page.

pub mod accumulator;
pub mod envelope;
pub mod paginate;
pub mod replay;
pub mod retry;
pub mod transport;

pub use envseries_fetch_models::Record;
pub use paginate::{FetchOutcome, PageStep, Paginator, fetch_all};

/// Maximum length of the response body preview kept in errors and logs.
pub const BODY_PREVIEW_LEN: usize = 500;

/// A page request that failed in a way retrying cannot fix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The provider answered with a non-retryable status.
    #[error("HTTP {status} from {endpoint}: {body}")]
    Status {
        /// Endpoint that was requested.
        endpoint: String,
        /// The rejected status code.
        status: u16,
        /// Preview of the response body.
        body: String,
    },

    /// The provider answered 2xx but the body is not a page envelope.
    #[error("malformed response from {endpoint}: {message}")]
    Malformed {
        /// Endpoint that was requested.
        endpoint: String,
        /// What was wrong with the body.
        message: String,
    },

    /// The request could not be sent at all.
    #[error("transport failure for {endpoint}: {message}")]
    Transport {
        /// Endpoint that was requested.
        endpoint: String,
        /// Description of the failure.
        message: String,
    },
}

/// Errors surfaced by [`fetch_all`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request descriptor cannot be paginated.
    #[error("invalid fetch request: {0}")]
    InvalidRequest(String),

    /// A page failed fatally. `partial` holds everything accepted before
    /// the failing page, in arrival order.
    #[error("fetch aborted after {} records: {source}", .partial.len())]
    Aborted {
        /// The fatal page error.
        #[source]
        source: RequestError,
        /// Records accepted before the failure.
        partial: Vec<Record>,
    },
}

impl FetchError {
    /// Records accepted before the failure (empty for invalid requests).
    #[must_use]
    pub fn partial(&self) -> &[Record] {
        match self {
            Self::InvalidRequest(_) => &[],
            Self::Aborted { partial, .. } => partial,
        }
    }

    /// Consumes the error, returning the records accepted before the
    /// failure.
    #[must_use]
    pub fn into_partial(self) -> Vec<Record> {
        match self {
            Self::InvalidRequest(_) => Vec::new(),
            Self::Aborted { partial, .. } => partial,
        }
    }

    /// The HTTP status that caused the abort, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Aborted {
                source: RequestError::Status { status, .. },
                ..
            } => Some(*status),
            _ => None,
        }
    }
}

/// How a fetch that returned `Ok` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The provider signalled the end of the result set.
    Complete,
    /// The configured `max_pages` cap was reached.
    PageLimit,
    /// A page exhausted its retry budget; later pages were never requested.
    Abandoned {
        /// 1-based index of the abandoned page.
        page: u32,
        /// Attempts spent on it.
        attempts: u32,
        /// Last status observed, if the failure was an HTTP status.
        last_status: Option<u16>,
    },
}

impl Completion {
    /// Whether the result may be missing records.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        !matches!(self, Self::Complete)
    }
}

/// Truncates a response body for inclusion in logs and errors.
#[must_use]
pub fn body_preview(body: &str) -> String {
    if body.len() <= BODY_PREVIEW_LEN {
        return body.to_owned();
    }
    let mut end = BODY_PREVIEW_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_keeps_short_bodies() {
        assert_eq!(body_preview("{\"error\":1}"), "{\"error\":1}");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let body = "é".repeat(BODY_PREVIEW_LEN);
        let preview = body_preview(&body);
        assert!(preview.ends_with("..."));
        assert!(preview.len() <= BODY_PREVIEW_LEN + 3);
    }

    #[test]
    fn aborted_error_exposes_partial_records() {
        let mut record = Record::new();
        record.insert("value".to_owned(), serde_json::json!(1));
        let err = FetchError::Aborted {
            source: RequestError::Status {
                endpoint: "/data".to_owned(),
                status: 400,
                body: String::new(),
            },
            partial: vec![record],
        };
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.partial().len(), 1);
        assert!(err.to_string().contains("after 1 records"));
        assert_eq!(err.into_partial().len(), 1);
    }
}
