//! Reindexing of keyed observations onto a gap-free daily calendar.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use envseries_series_models::{
    DailySlot, DensifiedRow, DensifiedSeries, MetadataFields, RawRecord, SeriesKey, ValueFields,
};
use serde::{Deserialize, Serialize};

use crate::calendar::{daily_range, days_inclusive};

/// Value field consulted for `has_measurement` when none is configured.
pub const DEFAULT_PRIMARY_VALUE: &str = "value";

/// How [`densify`] and [`densify_rows`] decide which days were measured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DensifyOptions {
    /// The value field whose presence marks a genuine measurement.
    #[serde(default = "default_primary_value")]
    pub primary_value: String,
}

fn default_primary_value() -> String {
    DEFAULT_PRIMARY_VALUE.to_owned()
}

impl Default for DensifyOptions {
    fn default() -> Self {
        Self {
            primary_value: default_primary_value(),
        }
    }
}

impl DensifyOptions {
    #[must_use]
    pub fn new(primary_value: &str) -> Self {
        Self {
            primary_value: primary_value.to_owned(),
        }
    }
}

/// Groups `records` by key and densifies each group onto a daily calendar
/// spanning its first to last observed date.
///
/// Within a key the last record for a given date wins. Value fields are
/// never carried across days; metadata is filled forward then backward.
/// Groups are returned ordered by key.
#[must_use]
pub fn densify(records: Vec<RawRecord>, options: &DensifyOptions) -> Vec<DensifiedSeries> {
    let input_len = records.len();
    let mut groups: BTreeMap<SeriesKey, Vec<RawRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.key.clone()).or_default().push(record);
    }

    let series: Vec<DensifiedSeries> = groups
        .into_iter()
        .filter_map(|(key, group)| densify_group(key, group, options))
        .collect();

    log::debug!(
        "Densified {input_len} records into {} series ({} daily rows)",
        series.len(),
        series.iter().map(|s| s.slots.len()).sum::<usize>()
    );

    series
}

/// [`densify`], flattened into rows with the key restored on every row.
#[must_use]
pub fn densify_rows(records: Vec<RawRecord>, options: &DensifyOptions) -> Vec<DensifiedRow> {
    densify(records, options)
        .into_iter()
        .flat_map(DensifiedSeries::into_rows)
        .collect()
}

fn densify_group(
    key: SeriesKey,
    group: Vec<RawRecord>,
    options: &DensifyOptions,
) -> Option<DensifiedSeries> {
    let mut value_names: BTreeSet<String> = BTreeSet::new();
    value_names.insert(options.primary_value.clone());

    // Insertion in arrival order leaves the last record per date in place.
    let mut by_date: BTreeMap<NaiveDate, RawRecord> = BTreeMap::new();
    for record in group {
        value_names.extend(record.values.keys().cloned());
        by_date.insert(record.date(), record);
    }

    let first = *by_date.keys().next()?;
    let last = *by_date.keys().next_back()?;

    let mut slots = Vec::with_capacity(days_inclusive(first, last));
    for date in daily_range(first, last) {
        let observed = by_date.remove(&date);
        let values: ValueFields = value_names
            .iter()
            .map(|name| {
                let value = observed
                    .as_ref()
                    .and_then(|r| r.values.get(name).copied().flatten())
                    .filter(|v| !v.is_nan());
                (name.clone(), value)
            })
            .collect();
        let has_measurement = values
            .get(&options.primary_value)
            .is_some_and(Option::is_some);
        slots.push(DailySlot {
            date,
            values,
            metadata: observed.map(|r| r.metadata).unwrap_or_default(),
            has_measurement,
        });
    }

    fill_metadata(&mut slots);

    Some(DensifiedSeries { key, slots })
}

/// Forward-fills then backward-fills each metadata field independently.
fn fill_metadata(slots: &mut [DailySlot]) {
    let mut carried = MetadataFields::new();
    for slot in slots.iter_mut() {
        fill_from(&mut slot.metadata, &mut carried);
    }

    let mut carried = MetadataFields::new();
    for slot in slots.iter_mut().rev() {
        fill_from(&mut slot.metadata, &mut carried);
    }
}

fn fill_from(metadata: &mut MetadataFields, carried: &mut MetadataFields) {
    for (name, value) in metadata.iter() {
        carried.insert(name.clone(), value.clone());
    }
    for (name, value) in carried.iter() {
        if !metadata.contains_key(name) {
            metadata.insert(name.clone(), value.clone());
        }
    }
}
