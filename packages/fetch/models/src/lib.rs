#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Plain data types shared by the paginated fetch loop and its callers.
//!
//! A [`FetchRequest`] describes one logical pull against one endpoint.
//! [`RetryConfig`] and [`FetchConfig`] tune how hard the loop tries before
//! giving up on a page, and [`PageResult`] is what a single accepted
//! response turns into.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Default number of records requested per page.
pub const DEFAULT_PAGE_LIMIT: u32 = 1000;

/// A single opaque record as returned by a provider.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// The pagination strategy used by an endpoint.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaginationMode {
    /// Cursor is a running record offset (e.g. `?offset=1001`).
    #[default]
    Offset,
    /// Cursor is a 1-based page number (e.g. `?page=2`).
    Page,
}

/// Query parameter names used to communicate the cursor and page size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationParams {
    /// Parameter carrying the offset in [`PaginationMode::Offset`].
    pub offset_param: String,
    /// Parameter carrying the page number in [`PaginationMode::Page`].
    pub page_param: String,
    /// Parameter carrying the page size.
    pub limit_param: String,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            offset_param: "offset".to_owned(),
            page_param: "page".to_owned(),
            limit_param: "limit".to_owned(),
        }
    }
}

/// Describes one logical pull against a single endpoint.
///
/// Immutable for the duration of a fetch; the loop derives every page
/// request from it by adding the cursor and limit parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Endpoint path relative to the provider base URL (e.g. `"/data"`).
    pub endpoint: String,
    /// Base query parameters sent with every page.
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// How the cursor advances between pages.
    #[serde(default)]
    pub pagination: PaginationMode,
    /// Number of records requested per page.
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Offset sent with the first page in [`PaginationMode::Offset`].
    /// Some providers count from 1.
    #[serde(default)]
    pub start_offset: u64,
    /// Names of the cursor and limit query parameters.
    #[serde(default)]
    pub params: PaginationParams,
}

const fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

impl FetchRequest {
    /// Creates a request for `endpoint` with offset pagination and the
    /// default page size.
    #[must_use]
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_owned(),
            query: BTreeMap::new(),
            pagination: PaginationMode::Offset,
            limit: DEFAULT_PAGE_LIMIT,
            start_offset: 0,
            params: PaginationParams::default(),
        }
    }

    /// Sets the pagination strategy.
    #[must_use]
    pub const fn with_pagination(mut self, pagination: PaginationMode) -> Self {
        self.pagination = pagination;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the first offset value for offset pagination.
    #[must_use]
    pub const fn with_start_offset(mut self, offset: u64) -> Self {
        self.start_offset = offset;
        self
    }

    /// Adds a base query parameter.
    #[must_use]
    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.insert(key.to_owned(), value.to_string());
        self
    }

    /// Overrides the cursor and limit parameter names.
    #[must_use]
    pub fn with_params(mut self, params: PaginationParams) -> Self {
        self.params = params;
        self
    }
}

/// The records and hints produced by one accepted response.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    /// Records in the order the provider returned them.
    pub records: Vec<Record>,
    /// Total-found count reported by the provider, if it gave an exact one.
    pub found: Option<u64>,
    /// Raw HTTP status of the accepted response.
    pub status: u16,
}

impl PageResult {
    /// Number of records on this page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the page carried no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// How the retry delay grows with the attempt number.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackoffKind {
    /// `base * 2^(attempt - 1)`
    #[default]
    Exponential,
    /// `base * attempt`
    Linear,
}

/// Tuning for the per-page retry policy.
///
/// Durations are stored in milliseconds so the struct reads naturally
/// from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts allowed per page before it is abandoned. Rate-limit waits
    /// do not count.
    pub max_attempts: u32,
    /// Delay after the first retryable failure.
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff delay.
    pub max_delay_ms: u64,
    /// Growth curve for the backoff delay.
    pub backoff: BackoffKind,
    /// Wait applied to a 429 that carries no `Retry-After` hint.
    pub rate_limit_wait_ms: u64,
    /// Added on top of every rate-limit wait.
    pub rate_limit_margin_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            backoff: BackoffKind::Exponential,
            rate_limit_wait_ms: 20_000,
            rate_limit_margin_ms: 1_000,
        }
    }
}

impl RetryConfig {
    /// A config that never sleeps. Useful for tests and replay.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            rate_limit_wait_ms: 0,
            rate_limit_margin_ms: 0,
            ..Self::default()
        }
    }

    /// Sets the maximum attempts per page.
    #[must_use]
    pub const fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Sets the base backoff delay.
    #[must_use]
    pub const fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Sets the backoff growth curve.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffKind) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    #[must_use]
    pub const fn rate_limit_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_wait_ms)
    }

    #[must_use]
    pub const fn rate_limit_margin(&self) -> Duration {
        Duration::from_millis(self.rate_limit_margin_ms)
    }
}

/// Loop-level settings that apply across pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-page retry tuning.
    pub retry: RetryConfig,
    /// Pause between successful pages.
    pub page_delay_ms: u64,
    /// Stop after this many accepted pages.
    pub max_pages: Option<u32>,
}

impl FetchConfig {
    /// Sets the retry tuning.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the pause between successful pages.
    #[must_use]
    pub const fn with_page_delay_ms(mut self, ms: u64) -> Self {
        self.page_delay_ms = ms;
        self
    }

    /// Sets the maximum number of pages to accept.
    #[must_use]
    pub const fn with_max_pages(mut self, max: u32) -> Self {
        self.max_pages = Some(max);
        self
    }

    #[must_use]
    pub const fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_to_offset_and_thousand() {
        let req = FetchRequest::new("/datasets");
        assert_eq!(req.pagination, PaginationMode::Offset);
        assert_eq!(req.limit, 1000);
        assert_eq!(req.start_offset, 0);
        assert_eq!(req.params.limit_param, "limit");
    }

    #[test]
    fn pagination_mode_parses_from_snake_case() {
        assert_eq!("page".parse::<PaginationMode>().unwrap(), PaginationMode::Page);
        assert_eq!(PaginationMode::Offset.to_string(), "offset");
    }

    #[test]
    fn request_reads_from_toml_with_defaults() {
        let req: FetchRequest = toml::from_str(
            r#"
            endpoint = "/sensors/42/days"
            pagination = "page"

            [query]
            datetime_from = "2024-01-01"
            "#,
        )
        .unwrap();
        assert_eq!(req.pagination, PaginationMode::Page);
        assert_eq!(req.limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(req.query["datetime_from"], "2024-01-01");
        assert_eq!(req.params.page_param, "page");
    }

    #[test]
    fn immediate_retry_config_never_waits() {
        let cfg = RetryConfig::immediate(3);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.base_delay(), Duration::ZERO);
        assert_eq!(cfg.rate_limit_wait() + cfg.rate_limit_margin(), Duration::ZERO);
    }
}
