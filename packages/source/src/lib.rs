#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Environmental data providers and the pulls that run against them.
//!
//! Each provider module knows its endpoints, pagination mode, and record
//! layout, and turns fetched records into densified daily series.
//! [`definition::PullDefinition`] ties a provider call to an output table
//! and is loaded from TOML, either from disk or from the embedded
//! [`registry`].

pub mod credentials;
pub mod definition;
pub mod ncdc;
pub mod noaa_co2;
pub mod openaq;
pub mod registry;

use envseries_fetch::{Completion, FetchError, RequestError};
use envseries_fetch::transport::TransportError;
use envseries_series_models::DensifiedRow;

/// Errors that can occur while pulling from a provider.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// A paginated fetch failed fatally.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A single (unpaginated) request failed fatally.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The HTTP transport could not be built.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A CSV payload could not be read.
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    /// A pull definition is not valid TOML or has the wrong shape.
    #[error("invalid pull definition: {0}")]
    Definition(#[from] toml::de::Error),

    /// I/O error reading a definition file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required credential or setting is not configured.
    #[error("{provider} is not configured: {message}")]
    Config {
        /// Provider that is missing configuration.
        provider: String,
        /// What is missing.
        message: String,
    },

    /// A multi-call pull failed part way. `partial` holds the rows of
    /// the calls that completed before the failing one.
    #[error("pull {id} aborted: {source}")]
    PullAborted {
        /// Definition that was running.
        id: String,
        /// The fatal failure.
        #[source]
        source: Box<SourceError>,
        /// Rows of the earlier calls.
        partial: SeriesPull,
    },

    /// A provider payload did not have the expected shape.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of what went wrong.
        message: String,
    },
}

impl SourceError {
    /// Provider records accepted before the failure, if any.
    #[must_use]
    pub fn partial_len(&self) -> usize {
        match self {
            Self::Fetch(e) => e.partial().len(),
            Self::PullAborted {
                source, partial, ..
            } => partial.fetched + source.partial_len(),
            _ => 0,
        }
    }

    /// Rows of the calls that completed before a multi-call pull failed.
    #[must_use]
    pub const fn partial_pull(&self) -> Option<&SeriesPull> {
        match self {
            Self::PullAborted { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// Densified rows produced by one pull, with how complete they are.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPull {
    /// Densified rows, key columns restored on every row.
    pub rows: Vec<DensifiedRow>,
    /// Provider records fetched before densification.
    pub fetched: usize,
    /// The least complete outcome among the fetches that made up the
    /// pull.
    pub completion: Completion,
}

impl SeriesPull {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            rows: Vec::new(),
            fetched: 0,
            completion: Completion::Complete,
        }
    }

    /// Appends another pull's rows. The first partial completion seen is
    /// kept.
    pub fn merge(&mut self, other: Self) {
        self.rows.extend(other.rows);
        self.fetched += other.fetched;
        if !self.completion.is_partial() {
            self.completion = other.completion;
        }
    }

    /// Whether any contributing fetch may be missing records.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        self.completion.is_partial()
    }

    /// Number of rows flagged as genuine measurements.
    #[must_use]
    pub fn measurement_count(&self) -> usize {
        self.rows.iter().filter(|r| r.has_measurement).count()
    }
}

impl Default for SeriesPull {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_first_partial_completion() {
        let abandoned = Completion::Abandoned {
            page: 2,
            attempts: 5,
            last_status: Some(503),
        };
        let mut pull = SeriesPull::empty();
        pull.merge(SeriesPull {
            rows: Vec::new(),
            fetched: 3,
            completion: abandoned,
        });
        pull.merge(SeriesPull {
            rows: Vec::new(),
            fetched: 4,
            completion: Completion::PageLimit,
        });
        assert_eq!(pull.fetched, 7);
        assert_eq!(pull.completion, abandoned);
        assert!(pull.is_partial());
    }
}
