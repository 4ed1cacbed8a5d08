#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Turns fetched records into calendar-complete daily series.
//!
//! [`extract`] maps opaque provider records onto typed
//! [`RawRecord`](envseries_series_models::RawRecord)s according to a
//! [`RecordSchema`](extract::RecordSchema). [`densify`] then groups them by
//! key and reindexes each group onto a gap-free daily calendar.

pub mod calendar;
pub mod densify;
pub mod extract;
pub mod parsing;

pub use densify::{DensifyOptions, densify, densify_rows};

/// Errors raised while mapping a provider record onto a [`RawRecord`].
///
/// [`RawRecord`]: envseries_series_models::RawRecord
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeriesError {
    /// A required field is absent or null.
    #[error("missing required field '{field}'")]
    MissingField {
        /// Dot-separated path of the field.
        field: String,
    },

    /// The timestamp field could not be parsed.
    #[error("unparseable timestamp '{value}' in field '{field}'")]
    InvalidTimestamp {
        /// Dot-separated path of the field.
        field: String,
        /// The raw value.
        value: String,
    },

    /// A key component is not a scalar.
    #[error("key field '{field}' is not a scalar value")]
    InvalidKey {
        /// Dot-separated path of the field.
        field: String,
    },
}
