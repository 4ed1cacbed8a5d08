//! Mapping of opaque provider records onto [`RawRecord`]s.
//!
//! A [`RecordSchema`] names where each key component, the timestamp, each
//! value field, and each metadata field comes from. Fields are either a
//! dot-separated path into the record (e.g. `"period.datetimeFrom.local"`)
//! or a constant supplied by the caller (e.g. a location name known from
//! an earlier listing call).

use envseries_fetch_models::Record;
use envseries_series_models::{RawRecord, SeriesKey};
use serde::{Deserialize, Serialize};

use crate::SeriesError;
use crate::parsing::{parse_number, parse_timestamp, scalar_to_string};

/// Where a field's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// Dot-separated path into the record.
    Path(String),
    /// The same value for every record.
    Constant(String),
}

/// One named output field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Output field name.
    pub name: String,
    /// Where the value comes from.
    #[serde(flatten)]
    pub source: FieldSource,
}

impl FieldSpec {
    /// A field read from `path` in each record.
    #[must_use]
    pub fn path(name: &str, path: &str) -> Self {
        Self {
            name: name.to_owned(),
            source: FieldSource::Path(path.to_owned()),
        }
    }

    /// A field with the same value for every record.
    #[must_use]
    pub fn constant(name: &str, value: impl ToString) -> Self {
        Self {
            name: name.to_owned(),
            source: FieldSource::Constant(value.to_string()),
        }
    }

    fn label(&self) -> &str {
        match &self.source {
            FieldSource::Path(p) => p,
            FieldSource::Constant(_) => &self.name,
        }
    }
}

/// How to read a [`RawRecord`] out of a provider record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Composite key components, in key order.
    pub key: Vec<FieldSpec>,
    /// Path of the observation timestamp.
    pub timestamp: String,
    /// Numeric value fields.
    pub values: Vec<FieldSpec>,
    /// Per-key constant descriptors.
    #[serde(default)]
    pub metadata: Vec<FieldSpec>,
}

impl RecordSchema {
    /// Creates a schema with no key, value, or metadata fields yet.
    #[must_use]
    pub fn new(timestamp: &str) -> Self {
        Self {
            key: Vec::new(),
            timestamp: timestamp.to_owned(),
            values: Vec::new(),
            metadata: Vec::new(),
        }
    }

    /// Adds a key component.
    #[must_use]
    pub fn with_key(mut self, field: FieldSpec) -> Self {
        self.key.push(field);
        self
    }

    /// Adds a value field.
    #[must_use]
    pub fn with_value(mut self, field: FieldSpec) -> Self {
        self.values.push(field);
        self
    }

    /// Adds a metadata field.
    #[must_use]
    pub fn with_metadata(mut self, field: FieldSpec) -> Self {
        self.metadata.push(field);
        self
    }

    /// Reads one record.
    ///
    /// Key components and the timestamp are required. Missing or
    /// non-numeric value fields become absent values, and missing metadata
    /// fields are left out so densification can fill them from
    /// neighbouring days.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError`] if a key component or the timestamp is
    /// missing or unusable.
    pub fn extract(&self, record: &Record) -> Result<RawRecord, SeriesError> {
        let mut key = SeriesKey::new();
        for field in &self.key {
            let value = match &field.source {
                FieldSource::Constant(c) => c.clone(),
                FieldSource::Path(path) => {
                    let raw = resolve_path(record, path)
                        .filter(|v| !v.is_null())
                        .ok_or_else(|| SeriesError::MissingField {
                            field: path.clone(),
                        })?;
                    scalar_to_string(raw).ok_or_else(|| SeriesError::InvalidKey {
                        field: path.clone(),
                    })?
                }
            };
            key = key.with(&field.name, value);
        }

        let raw_ts = resolve_path(record, &self.timestamp)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| SeriesError::MissingField {
                field: self.timestamp.clone(),
            })?;
        let observed_at =
            parse_timestamp(raw_ts).ok_or_else(|| SeriesError::InvalidTimestamp {
                field: self.timestamp.clone(),
                value: raw_ts.to_owned(),
            })?;

        let mut out = RawRecord::new(key, observed_at);

        for field in &self.values {
            let value = match &field.source {
                FieldSource::Constant(c) => c.trim().parse::<f64>().ok(),
                FieldSource::Path(path) => resolve_path(record, path).and_then(parse_number),
            };
            out.values.insert(field.name.clone(), value);
        }

        for field in &self.metadata {
            let value = match &field.source {
                FieldSource::Constant(c) => Some(c.clone()),
                FieldSource::Path(path) => resolve_path(record, path).and_then(scalar_to_string),
            };
            if let Some(value) = value {
                out.metadata.insert(field.name.clone(), value);
            }
        }

        Ok(out)
    }

    /// Reads every record, skipping (and logging) the ones that cannot be
    /// mapped. Arrival order is preserved.
    #[must_use]
    pub fn extract_all(&self, records: &[Record]) -> Vec<RawRecord> {
        let mut out = Vec::with_capacity(records.len());
        let mut skipped = 0usize;

        for record in records {
            match self.extract(record) {
                Ok(raw) => out.push(raw),
                Err(e) => {
                    skipped += 1;
                    log::debug!("Skipping record: {e}");
                }
            }
        }

        if skipped > 0 {
            let key_fields: Vec<&str> = self.key.iter().map(FieldSpec::label).collect();
            log::warn!(
                "Skipped {skipped} of {} records without a usable key ({}) or timestamp ({})",
                records.len(),
                key_fields.join(", "),
                self.timestamp
            );
        }

        out
    }
}

/// Navigates a dot-separated path into a record.
#[must_use]
pub fn resolve_path<'a>(record: &'a Record, path: &str) -> Option<&'a serde_json::Value> {
    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}
