#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Keyed observations and the calendar-complete series built from them.
//!
//! Providers produce [`RawRecord`]s: one observation for one composite
//! [`SeriesKey`] at one point in time. Densification folds them into one
//! [`DensifiedSeries`] per key, which flattens into [`DensifiedRow`]s for
//! persistence.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Named value fields of an observation. `None` means absent.
pub type ValueFields = BTreeMap<String, Option<f64>>;

/// Metadata fields that are constant per key (units, display names).
pub type MetadataFields = BTreeMap<String, String>;

/// A composite key identifying one series, as ordered `(name, value)`
/// components (e.g. location id, sensor id, parameter).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey(Vec<(String, String)>);

impl SeriesKey {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a key component.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl ToString) -> Self {
        self.0.push((name.to_owned(), value.to_string()));
        self
    }

    /// Looks up a component by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `(name, value)` components in key order.
    #[must_use]
    pub fn components(&self) -> &[(String, String)] {
        &self.0
    }

    /// Component names in key order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: ToString, V: ToString> FromIterator<(K, V)> for SeriesKey {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// One observation for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// The series this observation belongs to.
    pub key: SeriesKey,
    /// When the observation was taken. Only the calendar day survives
    /// densification.
    pub observed_at: NaiveDateTime,
    /// Measured values.
    pub values: ValueFields,
    /// Per-key constant descriptors.
    pub metadata: MetadataFields,
}

impl RawRecord {
    /// Creates an observation with no values or metadata yet.
    #[must_use]
    pub const fn new(key: SeriesKey, observed_at: NaiveDateTime) -> Self {
        Self {
            key,
            observed_at,
            values: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Creates an observation at midnight of `date`.
    #[must_use]
    pub fn on_date(key: SeriesKey, date: NaiveDate) -> Self {
        Self::new(key, date.and_time(NaiveTime::MIN))
    }

    /// Sets a value field.
    #[must_use]
    pub fn with_value(mut self, name: &str, value: impl Into<Option<f64>>) -> Self {
        self.values.insert(name.to_owned(), value.into());
        self
    }

    /// Sets a metadata field.
    #[must_use]
    pub fn with_metadata(mut self, name: &str, value: impl ToString) -> Self {
        self.metadata.insert(name.to_owned(), value.to_string());
        self
    }

    /// The calendar day of the observation.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.observed_at.date()
    }
}

/// One calendar day of a densified series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySlot {
    pub date: NaiveDate,
    /// Every value field seen for the key; `None` on gap days.
    pub values: ValueFields,
    /// Metadata, filled from neighbouring days where the day had none.
    pub metadata: MetadataFields,
    /// Whether the primary value field held a genuine measurement.
    pub has_measurement: bool,
}

/// A calendar-complete daily series for one key.
///
/// `slots` holds exactly one entry per day from the first to the last
/// observed date, in ascending order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensifiedSeries {
    pub key: SeriesKey,
    pub slots: Vec<DailySlot>,
}

impl DensifiedSeries {
    /// Number of days with a genuine measurement.
    #[must_use]
    pub fn measurement_count(&self) -> usize {
        self.slots.iter().filter(|s| s.has_measurement).count()
    }

    /// Flattens the series into rows, re-attaching the key to each.
    pub fn rows(&self) -> impl Iterator<Item = DensifiedRow> + '_ {
        self.slots.iter().map(|slot| DensifiedRow {
            key: self.key.clone(),
            date: slot.date,
            values: slot.values.clone(),
            metadata: slot.metadata.clone(),
            has_measurement: slot.has_measurement,
        })
    }

    /// Consuming variant of [`rows`](Self::rows).
    #[must_use]
    pub fn into_rows(self) -> Vec<DensifiedRow> {
        let key = self.key;
        self.slots
            .into_iter()
            .map(|slot| DensifiedRow {
                key: key.clone(),
                date: slot.date,
                values: slot.values,
                metadata: slot.metadata,
                has_measurement: slot.has_measurement,
            })
            .collect()
    }
}

/// One row of the outbound densified-series contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensifiedRow {
    pub key: SeriesKey,
    pub date: NaiveDate,
    pub values: ValueFields,
    pub metadata: MetadataFields,
    pub has_measurement: bool,
}

impl From<DensifiedRow> for RawRecord {
    fn from(row: DensifiedRow) -> Self {
        Self {
            key: row.key,
            observed_at: row.date.and_time(NaiveTime::MIN),
            values: row.values,
            metadata: row.metadata,
        }
    }
}
