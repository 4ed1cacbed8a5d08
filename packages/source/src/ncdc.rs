//! NOAA NCDC Climate Data Online (CDO) v2.
//!
//! Every CDO listing is offset-paginated with a 1-based first offset and
//! reports its size under `metadata.resultset.count`. The `/data`
//! endpoint rejects date ranges longer than a year, so daily pulls are
//! split into [`year_windows`] and the windows fetched in order.

use envseries_fetch::transport::Transport;
use envseries_fetch::{FetchError, FetchOutcome, Record, fetch_all};
use envseries_fetch_models::{FetchConfig, FetchRequest, PaginationMode};
use envseries_series::calendar::{DateWindow, year_windows};
use envseries_series::extract::{FieldSpec, RecordSchema};
use envseries_series::{DensifyOptions, densify_rows};
use envseries_source_models::{CatalogEndpoint, StationRef};
use serde::{Deserialize, Serialize};

use crate::{SeriesPull, SourceError};

/// CDO offsets count from 1.
pub const FIRST_OFFSET: u64 = 1;

/// Dataset queried when none is configured.
pub const DEFAULT_DATASET: &str = "GHCND";

/// Builds the request for a catalog endpoint.
#[must_use]
pub fn catalog_request(endpoint: CatalogEndpoint) -> FetchRequest {
    FetchRequest::new(&endpoint.path())
        .with_pagination(PaginationMode::Offset)
        .with_start_offset(FIRST_OFFSET)
}

/// Fetches every record of a catalog endpoint.
///
/// # Errors
///
/// Returns [`SourceError::Fetch`] if a page fails fatally.
pub async fn fetch_catalog(
    transport: &dyn Transport,
    endpoint: CatalogEndpoint,
    config: &FetchConfig,
) -> Result<FetchOutcome, SourceError> {
    let outcome = fetch_all(transport, &catalog_request(endpoint), config).await?;
    log::info!(
        "NCDC {endpoint}: {} records in {} pages",
        outcome.records.len(),
        outcome.pages
    );
    Ok(outcome)
}

/// Which daily observations to pull for one station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyDataQuery {
    #[serde(default = "default_dataset")]
    pub dataset_id: String,
    pub station: StationRef,
    /// Restrict to these data types (e.g. `TMAX`, `PRCP`). Empty means
    /// every type the station reports.
    #[serde(default)]
    pub datatypes: Vec<String>,
    /// `"metric"` or `"standard"`; the provider default if unset.
    #[serde(default)]
    pub units: Option<String>,
}

fn default_dataset() -> String {
    DEFAULT_DATASET.to_owned()
}

impl DailyDataQuery {
    #[must_use]
    pub fn new(station: StationRef) -> Self {
        Self {
            dataset_id: default_dataset(),
            station,
            datatypes: Vec::new(),
            units: None,
        }
    }

    #[must_use]
    pub fn with_datatype(mut self, datatype: &str) -> Self {
        self.datatypes.push(datatype.to_owned());
        self
    }

    #[must_use]
    pub fn with_units(mut self, units: &str) -> Self {
        self.units = Some(units.to_owned());
        self
    }

    /// The `/data` request for one window (at most a year long).
    #[must_use]
    pub fn request(&self, window: DateWindow) -> FetchRequest {
        let mut request = FetchRequest::new("/data")
            .with_pagination(PaginationMode::Offset)
            .with_start_offset(FIRST_OFFSET)
            .with_query("datasetid", &self.dataset_id)
            .with_query("stationid", &self.station.id)
            .with_query("startdate", window.start.format("%Y-%m-%d"))
            .with_query("enddate", window.end.format("%Y-%m-%d"));
        if !self.datatypes.is_empty() {
            // Comma-separated ids are accepted in place of repeated params.
            request = request.with_query("datatypeid", self.datatypes.join(","));
        }
        if let Some(units) = &self.units {
            request = request.with_query("units", units);
        }
        request
    }

    /// How a CDO data record maps onto a series record.
    #[must_use]
    pub fn schema(&self) -> RecordSchema {
        RecordSchema::new("date")
            .with_key(FieldSpec::path("station", "station"))
            .with_key(FieldSpec::path("datatype", "datatype"))
            .with_value(FieldSpec::path("value", "value"))
            .with_metadata(FieldSpec::constant("station_name", &self.station.name))
    }
}

/// Fetches daily data for one station over `range`, one window per year,
/// and densifies it per `(station, datatype)`.
///
/// A window that ends partially does not stop later windows; the first
/// partial completion is reported on the result.
///
/// # Errors
///
/// Returns [`SourceError::Fetch`] if a page fails fatally. Its partial
/// records include every record of the windows fetched before it.
pub async fn daily_data(
    transport: &dyn Transport,
    query: &DailyDataQuery,
    range: DateWindow,
    config: &FetchConfig,
) -> Result<SeriesPull, SourceError> {
    let windows = year_windows(range.start, range.end);
    let mut records: Vec<Record> = Vec::new();
    let mut pull = SeriesPull::empty();

    for (i, window) in windows.iter().enumerate() {
        log::info!(
            "[{}] NCDC window {}/{}: {} to {} ({} days)",
            query.station.name,
            i + 1,
            windows.len(),
            window.start,
            window.end,
            window.days()
        );

        match fetch_all(transport, &query.request(*window), config).await {
            Ok(outcome) => {
                if outcome.is_partial() && !pull.is_partial() {
                    pull.completion = outcome.completion;
                }
                records.extend(outcome.records);
            }
            Err(FetchError::Aborted { source, partial }) => {
                records.extend(partial);
                return Err(FetchError::Aborted {
                    source,
                    partial: records,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }
    }

    let raw = query.schema().extract_all(&records);
    pull.fetched = records.len();
    pull.rows = densify_rows(raw, &DensifyOptions::default());

    log::info!(
        "[{}] NCDC daily: {} records -> {} rows across {} windows",
        query.station.name,
        pull.fetched,
        pull.rows.len(),
        windows.len()
    );

    Ok(pull)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use envseries_fetch::Completion;
    use envseries_fetch::replay::ReplayTransport;
    use envseries_fetch::transport::{TransportError, TransportResponse};
    use envseries_fetch_models::RetryConfig;
    use serde_json::json;

    use super::*;

    fn config() -> FetchConfig {
        FetchConfig::default().with_retry(RetryConfig::immediate(2))
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn bwi() -> DailyDataQuery {
        DailyDataQuery::new(StationRef::new("GHCND:USW00093721", "BWI"))
    }

    fn data_page(rows: &[(&str, &str, f64)]) -> Result<TransportResponse, TransportError> {
        let results: Vec<serde_json::Value> = rows
            .iter()
            .map(|(date, datatype, value)| {
                json!({
                    "date": format!("{date}T00:00:00"),
                    "datatype": datatype,
                    "station": "GHCND:USW00093721",
                    "attributes": ",,W,2400",
                    "value": value
                })
            })
            .collect();
        Ok(TransportResponse::new(
            200,
            json!({
                "metadata": { "resultset": { "offset": 1, "count": rows.len(), "limit": 1000 } },
                "results": results
            })
            .to_string(),
        ))
    }

    #[test]
    fn catalog_requests_start_at_offset_one() {
        let request = catalog_request(CatalogEndpoint::Datatypes);
        assert_eq!(request.endpoint, "/datatypes");
        assert_eq!(request.start_offset, 1);
        assert_eq!(request.pagination, PaginationMode::Offset);
    }

    #[test]
    fn data_request_carries_station_and_window() {
        let request = bwi()
            .with_datatype("TMAX")
            .with_datatype("PRCP")
            .with_units("metric")
            .request(DateWindow::new(d("2020-01-01"), d("2020-12-31")));
        assert_eq!(request.query["datasetid"], "GHCND");
        assert_eq!(request.query["stationid"], "GHCND:USW00093721");
        assert_eq!(request.query["startdate"], "2020-01-01");
        assert_eq!(request.query["enddate"], "2020-12-31");
        assert_eq!(request.query["datatypeid"], "TMAX,PRCP");
        assert_eq!(request.query["units"], "metric");
    }

    #[tokio::test]
    async fn catalog_walks_offsets_until_short_page() {
        let full = |n: usize| {
            let results: Vec<serde_json::Value> =
                (0..n).map(|i| json!({ "id": format!("ST{i}") })).collect();
            Ok(TransportResponse::new(
                200,
                json!({ "results": results }).to_string(),
            ))
        };
        let transport = ReplayTransport::new(vec![full(1000), full(10)]);
        let outcome = fetch_catalog(&transport, CatalogEndpoint::Stations, &config())
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 1010);
        let offsets: Vec<String> = transport
            .requests()
            .iter()
            .filter_map(|r| r.param("offset").map(str::to_owned))
            .collect();
        assert_eq!(offsets, vec!["1", "1001"]);
        assert!(transport.requests().iter().all(|r| r.endpoint == "/stations"));
    }

    #[tokio::test]
    async fn daily_data_spans_year_windows_and_densifies_per_datatype() {
        let transport = ReplayTransport::new(vec![
            data_page(&[
                ("2020-12-30", "TMAX", 5.0),
                ("2020-12-30", "PRCP", 0.0),
            ]),
            data_page(&[
                ("2021-01-02", "TMAX", 7.5),
                ("2021-01-02", "PRCP", 1.2),
            ]),
        ]);

        let pull = daily_data(
            &transport,
            &bwi(),
            DateWindow::new(d("2020-01-01"), d("2021-06-30")),
            &config(),
        )
        .await
        .unwrap();

        let windows: Vec<(String, String)> = transport
            .requests()
            .iter()
            .map(|r| {
                (
                    r.param("startdate").unwrap_or_default().to_owned(),
                    r.param("enddate").unwrap_or_default().to_owned(),
                )
            })
            .collect();
        assert_eq!(
            windows,
            vec![
                ("2020-01-01".to_owned(), "2020-12-31".to_owned()),
                ("2021-01-01".to_owned(), "2021-06-30".to_owned()),
            ]
        );

        assert_eq!(pull.fetched, 4);
        assert_eq!(pull.completion, Completion::Complete);
        // Two datatypes, four days each (Dec 30 through Jan 2).
        assert_eq!(pull.rows.len(), 8);
        assert_eq!(pull.measurement_count(), 4);
        assert!(pull.rows.iter().all(|r| r.metadata["station_name"] == "BWI"));

        let tmax: Vec<Option<f64>> = pull
            .rows
            .iter()
            .filter(|r| r.key.get("datatype") == Some("TMAX"))
            .map(|r| r.values["value"])
            .collect();
        assert_eq!(tmax, vec![Some(5.0), None, None, Some(7.5)]);
    }

    #[tokio::test]
    async fn fatal_error_carries_records_of_earlier_windows() {
        let transport = ReplayTransport::new(vec![
            data_page(&[("2020-06-01", "TMAX", 20.0)]),
            Ok(TransportResponse::new(400, "bad station")),
        ]);

        let err = daily_data(
            &transport,
            &bwi(),
            DateWindow::new(d("2020-01-01"), d("2021-03-01")),
            &config(),
        )
        .await
        .unwrap_err();

        let SourceError::Fetch(fetch) = &err else {
            panic!("expected fetch error, got {err:?}");
        };
        assert_eq!(fetch.status(), Some(400));
        assert_eq!(err.partial_len(), 1);
        assert_eq!(transport.request_count(), 2);
    }
}
