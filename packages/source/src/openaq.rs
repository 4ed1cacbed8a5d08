//! `OpenAQ` v3: locations near a point, their sensors, and per-sensor
//! daily series.
//!
//! Listing endpoints are page-numbered and report `meta.found`. Location
//! records carry their sensors inline, so one listing call is enough to
//! discover every sensor within the search radius.

use chrono::{Days, NaiveDate};
use envseries_fetch::transport::Transport;
use envseries_fetch::{FetchOutcome, Record, fetch_all};
use envseries_fetch_models::{FetchConfig, FetchRequest, PaginationMode};
use envseries_series::calendar::DateWindow;
use envseries_series::extract::{FieldSpec, RecordSchema};
use envseries_series::{DensifyOptions, densify_rows};
use envseries_source_models::{Coordinates, Granularity, SensorInfo};
use serde::Deserialize;

use crate::{SeriesPull, SourceError};

/// Largest search radius the locations endpoint accepts, in metres.
pub const MAX_RADIUS_M: u32 = 25_000;

/// Builds the location search request around `center`.
#[must_use]
pub fn locations_request(center: Coordinates, radius_m: u32) -> FetchRequest {
    FetchRequest::new("/locations")
        .with_pagination(PaginationMode::Page)
        .with_query("coordinates", center.to_query_value())
        .with_query("radius", radius_m.min(MAX_RADIUS_M))
}

#[derive(Debug, Deserialize)]
struct LocationRecord {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    sensors: Option<Vec<SensorRecord>>,
}

#[derive(Debug, Deserialize)]
struct SensorRecord {
    id: u64,
    #[serde(default)]
    parameter: Option<ParameterRecord>,
}

#[derive(Debug, Deserialize)]
struct ParameterRecord {
    name: String,
    #[serde(default)]
    units: Option<String>,
}

/// Flattens location records into one [`SensorInfo`] per sensor.
///
/// Sensors without a parameter are skipped, and so are location records
/// that do not have the expected shape.
#[must_use]
pub fn sensors_from_locations(records: &[Record]) -> Vec<SensorInfo> {
    let mut sensors = Vec::new();

    for record in records {
        let location: LocationRecord =
            match serde_json::from_value(serde_json::Value::Object(record.clone())) {
                Ok(location) => location,
                Err(e) => {
                    log::warn!("Skipping malformed OpenAQ location: {e}");
                    continue;
                }
            };

        let location_name = location.name.unwrap_or_default();
        for sensor in location.sensors.unwrap_or_default() {
            let Some(parameter) = sensor.parameter else {
                continue;
            };
            sensors.push(SensorInfo {
                location_id: location.id,
                location_name: location_name.clone(),
                sensor_id: sensor.id,
                parameter: parameter.name,
                units: parameter.units.unwrap_or_default(),
            });
        }
    }

    sensors
}

/// Flattens sensors back into records, one column per [`SensorInfo`]
/// field.
#[must_use]
pub fn sensor_records(sensors: &[SensorInfo]) -> Vec<Record> {
    sensors
        .iter()
        .filter_map(|sensor| match serde_json::to_value(sensor) {
            Ok(serde_json::Value::Object(record)) => Some(record),
            _ => None,
        })
        .collect()
}

/// Lists every location record within `radius_m` of `center`.
///
/// # Errors
///
/// Returns [`SourceError::Fetch`] if the location listing fails fatally.
pub async fn fetch_locations(
    transport: &dyn Transport,
    center: Coordinates,
    radius_m: u32,
    config: &FetchConfig,
) -> Result<FetchOutcome, SourceError> {
    let outcome = fetch_all(transport, &locations_request(center, radius_m), config).await?;
    if outcome.is_partial() {
        log::warn!(
            "OpenAQ location listing is partial ({:?}); some sensors may be missing",
            outcome.completion
        );
    }
    Ok(outcome)
}

/// Finds the sensors within `radius_m` of `center` that measure one of
/// `parameters` (every sensor if `parameters` is empty).
///
/// # Errors
///
/// Returns [`SourceError::Fetch`] if the location listing fails fatally.
pub async fn find_sensors(
    transport: &dyn Transport,
    center: Coordinates,
    radius_m: u32,
    parameters: &[String],
    config: &FetchConfig,
) -> Result<Vec<SensorInfo>, SourceError> {
    let outcome = fetch_locations(transport, center, radius_m, config).await?;

    let sensors: Vec<SensorInfo> = sensors_from_locations(&outcome.records)
        .into_iter()
        .filter(|s| parameters.is_empty() || parameters.iter().any(|p| *p == s.parameter))
        .collect();

    log::info!(
        "Found {} OpenAQ sensors in {} locations within {radius_m} m of {}",
        sensors.len(),
        outcome.records.len(),
        center.to_query_value()
    );

    Ok(sensors)
}

/// Builds the series request for one sensor.
///
/// `range.end` is inclusive; the provider's `datetime_to` bound is not,
/// so the request runs to midnight of the following day.
#[must_use]
pub fn sensor_series_request(
    sensor: &SensorInfo,
    range: DateWindow,
    granularity: Granularity,
) -> FetchRequest {
    let until = range.end.checked_add_days(Days::new(1)).unwrap_or(range.end);
    FetchRequest::new(&format!("/sensors/{}/{granularity}", sensor.sensor_id))
        .with_pagination(PaginationMode::Page)
        .with_query("datetime_from", date_param(range.start))
        .with_query("datetime_to", date_param(until))
}

fn date_param(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// How an `OpenAQ` measurement maps onto a series record.
#[must_use]
pub fn measurement_schema(sensor: &SensorInfo) -> RecordSchema {
    RecordSchema::new("period.datetimeFrom.local")
        .with_key(FieldSpec::constant("location_id", sensor.location_id))
        .with_key(FieldSpec::constant("sensor_id", sensor.sensor_id))
        .with_key(FieldSpec::constant("parameter", &sensor.parameter))
        .with_value(FieldSpec::path("value", "value"))
        .with_metadata(FieldSpec::constant("location_name", &sensor.location_name))
        .with_metadata(FieldSpec::constant("parameter_units", &sensor.units))
}

/// Fetches one sensor's series over `range` and densifies it to one row
/// per day.
///
/// # Errors
///
/// Returns [`SourceError::Fetch`] if a page fails fatally. Pages that
/// exhaust their retries end the fetch early and are reported through
/// [`SeriesPull::completion`] instead.
pub async fn sensor_series(
    transport: &dyn Transport,
    sensor: &SensorInfo,
    range: DateWindow,
    granularity: Granularity,
    config: &FetchConfig,
) -> Result<SeriesPull, SourceError> {
    let request = sensor_series_request(sensor, range, granularity);
    let outcome = fetch_all(transport, &request, config).await?;

    let raw = measurement_schema(sensor).extract_all(&outcome.records);
    let rows = densify_rows(raw, &DensifyOptions::default());

    log::info!(
        "OpenAQ sensor {} ({} at {}): {} records -> {} daily rows",
        sensor.sensor_id,
        sensor.parameter,
        sensor.location_name,
        outcome.records.len(),
        rows.len()
    );

    Ok(SeriesPull {
        rows,
        fetched: outcome.records.len(),
        completion: outcome.completion,
    })
}
