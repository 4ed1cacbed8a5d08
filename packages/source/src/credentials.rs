//! Base URLs and auth headers per provider.
//!
//! Pulls never read credentials themselves; they ask a
//! [`CredentialProvider`] for a [`ProviderConfig`] and build their
//! transport from it.

use std::collections::BTreeMap;
use std::time::Duration;

use envseries_fetch::transport::{DEFAULT_TIMEOUT, HttpTransport};
use envseries_source_models::Provider;

use crate::SourceError;

pub const OPENAQ_DEFAULT_URL: &str = "https://api.openaq.org/v3";
pub const NCDC_CDO_DEFAULT_URL: &str = "https://www.ncei.noaa.gov/cdo-web/api/v2";
pub const NOAA_GML_DEFAULT_URL: &str = "https://gml.noaa.gov/webdata/ccgg/trends/co2";

/// Where a provider lives and how to authenticate with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Headers sent with every request (API keys go here).
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl ProviderConfig {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_owned(),
            headers: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_owned(), value.to_owned());
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds an HTTP transport for this provider.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Transport`] if a header is invalid or the
    /// client cannot be built.
    pub fn transport(&self) -> Result<HttpTransport, SourceError> {
        Ok(HttpTransport::new(
            &self.base_url,
            &self.headers,
            self.timeout,
        )?)
    }
}

/// Supplies per-provider connection settings.
pub trait CredentialProvider: Send + Sync {
    /// Returns the settings for `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] if a required key is missing.
    fn provider_config(&self, provider: Provider) -> Result<ProviderConfig, SourceError>;
}

/// Reads credentials from environment-style variables.
///
/// | Provider   | Key variable    | URL variable (optional) |
/// |------------|-----------------|-------------------------|
/// | `OpenAQ`   | `OPENAQ_KEY`    | `OPENAQ_URL`            |
/// | NCDC CDO   | `NCDC_CDO_KEY`  | `NCDC_CDO_URL`          |
/// | NOAA GML   | none            | `NOAA_GML_URL`          |
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    vars: BTreeMap<String, String>,
}

impl EnvCredentials {
    /// Snapshots the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Uses the given variables instead of the process environment.
    #[must_use]
    pub fn from_vars<K: Into<String>, V: Into<String>>(
        vars: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .filter(|(_, v): &(String, String)| !v.trim().is_empty())
                .collect(),
        }
    }

    fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    fn required(&self, provider: Provider, name: &str) -> Result<&str, SourceError> {
        self.var(name).ok_or_else(|| SourceError::Config {
            provider: provider.to_string(),
            message: format!("{name} environment variable not set"),
        })
    }
}

impl CredentialProvider for EnvCredentials {
    fn provider_config(&self, provider: Provider) -> Result<ProviderConfig, SourceError> {
        match provider {
            Provider::Openaq => {
                let key = self.required(provider, "OPENAQ_KEY")?;
                let url = self.var("OPENAQ_URL").unwrap_or(OPENAQ_DEFAULT_URL);
                Ok(ProviderConfig::new(url).with_header("X-API-Key", key))
            }
            Provider::NcdcCdo => {
                let key = self.required(provider, "NCDC_CDO_KEY")?;
                let url = self.var("NCDC_CDO_URL").unwrap_or(NCDC_CDO_DEFAULT_URL);
                Ok(ProviderConfig::new(url).with_header("token", key))
            }
            Provider::NoaaGml => Ok(ProviderConfig::new(
                self.var("NOAA_GML_URL").unwrap_or(NOAA_GML_DEFAULT_URL),
            )),
        }
    }
}
