//! Mauna Loa CO2 from the NOAA Global Monitoring Laboratory.
//!
//! The daily trend file is a headerless CSV with `#` comment lines:
//!
//! ```text
//! # year, month, day, decimal date, ppm
//! 1974,5,19,1974.3795,333.46
//! ```
//!
//! The monthly and annual files carry a header row after their comments:
//!
//! ```text
//! year,month,decimal date,average,deseasonalized,ndays,sdev,unc
//! 1958,3,1958.2027,315.71,314.44,-1,-9.99,-0.99
//! ```
//!
//! Daily readings are densified onto the calendar. Monthly and annual
//! readings are kept one row per period, dated on its first day.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use envseries_fetch::Completion;
use envseries_fetch::retry::{Delivery, send_with_retry};
use envseries_fetch::transport::Transport;
use envseries_fetch_models::RetryConfig;
use envseries_series::{DensifyOptions, densify_rows};
use envseries_series_models::{DensifiedRow, RawRecord, SeriesKey};
use serde::Deserialize;

use crate::{SeriesPull, SourceError};

/// Path of the daily file relative to the GML trends base URL.
pub const DAILY_PATH: &str = "/co2_daily_mlo.csv";

/// Path of the monthly mean file.
pub const MONTHLY_PATH: &str = "/co2_mm_mlo.csv";

/// Path of the annual mean file.
pub const ANNUAL_PATH: &str = "/co2_annmean_mlo.csv";

/// Observatory code used as the series key.
pub const SITE: &str = "mlo";

/// Name of the value column.
pub const VALUE_FIELD: &str = "co2";

/// Unit attached to every reading as metadata.
pub const UNIT: &str = "ppm";

/// Primary value column of the monthly file.
pub const MONTHLY_VALUE_FIELD: &str = "average";

/// Primary value column of the annual file.
pub const ANNUAL_VALUE_FIELD: &str = "mean";

#[derive(Debug, Deserialize)]
struct DailyRow {
    year: i32,
    month: u32,
    day: u32,
    #[allow(dead_code)]
    decimal_date: f64,
    ppm: f64,
}

/// Parses the daily file into one record per row.
///
/// Negative readings are the file's fill value and become absent values.
///
/// # Errors
///
/// Returns [`SourceError::Csv`] if a row does not have five numeric
/// columns and [`SourceError::Parse`] if a row names an impossible date.
pub fn parse_daily_csv(text: &str) -> Result<Vec<RawRecord>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let key = SeriesKey::new().with("site", SITE);
    let mut records = Vec::new();

    for row in reader.deserialize::<DailyRow>() {
        let row = row?;
        let date = NaiveDate::from_ymd_opt(row.year, row.month, row.day).ok_or_else(|| {
            SourceError::Parse {
                message: format!("invalid date {}-{}-{}", row.year, row.month, row.day),
            }
        })?;
        let ppm = (row.ppm >= 0.0).then_some(row.ppm);
        records.push(
            RawRecord::on_date(key.clone(), date)
                .with_value(VALUE_FIELD, ppm)
                .with_metadata("unit", UNIT),
        );
    }

    Ok(records)
}

/// Parses the monthly mean file. `date` is the first of each month.
///
/// # Errors
///
/// Returns [`SourceError::Csv`] if the file is not valid CSV and
/// [`SourceError::Parse`] if `year` or `month` is missing or invalid.
pub fn parse_monthly_csv(text: &str) -> Result<Vec<RawRecord>, SourceError> {
    parse_periodic_csv(text, true)
}

/// Parses the annual mean file. `date` is January 1 of each year.
///
/// # Errors
///
/// Returns [`SourceError::Csv`] if the file is not valid CSV and
/// [`SourceError::Parse`] if `year` is missing or invalid.
pub fn parse_annual_csv(text: &str) -> Result<Vec<RawRecord>, SourceError> {
    parse_periodic_csv(text, false)
}

/// Every numeric column other than the period columns becomes a value;
/// negative readings are fill values and become absent.
fn parse_periodic_csv(text: &str, monthly: bool) -> Result<Vec<RawRecord>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase().replace(' ', "_"))
        .collect();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| SourceError::Parse {
                message: format!("NOAA CO2 file has no '{name}' column"),
            })
    };
    let year_col = column("year")?;
    let month_col = if monthly { Some(column("month")?) } else { None };

    let key = SeriesKey::new().with("site", SITE);
    let mut records = Vec::new();

    for row in reader.records() {
        let row = row?;
        let field = |i: usize| row.get(i).unwrap_or_default();
        let year: i32 = field(year_col).parse().map_err(|_| SourceError::Parse {
            message: format!("invalid year '{}'", field(year_col)),
        })?;
        let month: u32 = match month_col {
            Some(i) => field(i).parse().map_err(|_| SourceError::Parse {
                message: format!("invalid month '{}'", field(i)),
            })?,
            None => 1,
        };
        let date = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| SourceError::Parse {
            message: format!("invalid period {year}-{month}"),
        })?;

        let mut record = RawRecord::on_date(key.clone(), date).with_metadata("unit", UNIT);
        for (i, name) in headers.iter().enumerate() {
            if i == year_col || Some(i) == month_col || name == "decimal_date" {
                continue;
            }
            let value = field(i).parse::<f64>().ok().filter(|v| *v >= 0.0);
            record = record.with_value(name, value);
        }
        records.push(record);
    }

    Ok(records)
}

/// One row per period in date order. A repeated period keeps its last
/// reading.
fn period_rows(records: Vec<RawRecord>, primary: &str) -> Vec<DensifiedRow> {
    let by_date: BTreeMap<NaiveDate, RawRecord> =
        records.into_iter().map(|r| (r.date(), r)).collect();

    by_date
        .into_iter()
        .map(|(date, record)| DensifiedRow {
            has_measurement: record.values.get(primary).copied().flatten().is_some(),
            key: record.key,
            date,
            values: record.values,
            metadata: record.metadata,
        })
        .collect()
}

enum Download {
    Body(String),
    Abandoned(Completion),
}

async fn download(
    transport: &dyn Transport,
    path: &str,
    retry: &RetryConfig,
) -> Result<Download, SourceError> {
    match send_with_retry(transport, path, &[], retry).await? {
        Delivery::Delivered(response) => Ok(Download::Body(response.body)),
        Delivery::Abandoned(state) => {
            log::warn!("NOAA CO2 download of {path} abandoned after {} attempts", state.attempt);
            Ok(Download::Abandoned(Completion::Abandoned {
                page: 1,
                attempts: state.attempt,
                last_status: state.last_status,
            }))
        }
    }
}

const fn abandoned(completion: Completion) -> SeriesPull {
    SeriesPull {
        rows: Vec::new(),
        fetched: 0,
        completion,
    }
}

/// Downloads the daily file and densifies it to one row per day.
///
/// The download goes through the same retry policy as paginated fetches.
/// If it exhausts its attempts the pull is empty and marked abandoned.
///
/// # Errors
///
/// Returns [`SourceError::Request`] if the download fails fatally, or a
/// parse error if the file is malformed.
pub async fn daily_series(
    transport: &dyn Transport,
    retry: &RetryConfig,
) -> Result<SeriesPull, SourceError> {
    let body = match download(transport, DAILY_PATH, retry).await? {
        Download::Body(body) => body,
        Download::Abandoned(completion) => return Ok(abandoned(completion)),
    };

    let records = parse_daily_csv(&body)?;
    let fetched = records.len();
    let rows = densify_rows(records, &DensifyOptions::new(VALUE_FIELD));

    log::info!("NOAA CO2 daily: {fetched} readings -> {} daily rows", rows.len());

    Ok(SeriesPull {
        rows,
        fetched,
        completion: Completion::Complete,
    })
}

/// Downloads the monthly mean file, one row per month.
///
/// # Errors
///
/// As [`daily_series`].
pub async fn monthly_series(
    transport: &dyn Transport,
    retry: &RetryConfig,
) -> Result<SeriesPull, SourceError> {
    period_series(transport, MONTHLY_PATH, true, MONTHLY_VALUE_FIELD, retry).await
}

/// Downloads the annual mean file, one row per year.
///
/// # Errors
///
/// As [`daily_series`].
pub async fn annual_series(
    transport: &dyn Transport,
    retry: &RetryConfig,
) -> Result<SeriesPull, SourceError> {
    period_series(transport, ANNUAL_PATH, false, ANNUAL_VALUE_FIELD, retry).await
}

async fn period_series(
    transport: &dyn Transport,
    path: &str,
    monthly: bool,
    primary: &str,
    retry: &RetryConfig,
) -> Result<SeriesPull, SourceError> {
    let body = match download(transport, path, retry).await? {
        Download::Body(body) => body,
        Download::Abandoned(completion) => return Ok(abandoned(completion)),
    };

    let records = parse_periodic_csv(&body, monthly)?;
    let fetched = records.len();
    let rows = period_rows(records, primary);

    log::info!("NOAA CO2 {path}: {fetched} readings -> {} rows", rows.len());

    Ok(SeriesPull {
        rows,
        fetched,
        completion: Completion::Complete,
    })
}

#[cfg(test)]
mod tests {
    use envseries_fetch::replay::ReplayTransport;
    use envseries_fetch::transport::TransportResponse;

    use super::*;

    const SAMPLE: &str = "\
# --------------------------------------------------------------------
# USE OF NOAA GML DATA
# --------------------------------------------------------------------
# year, month, day, decimal date, ppm
2024,1,1,2024.0014,421.86
2024,1,2,2024.0041,422.02
2024,1,2,2024.0041,422.10
2024,1,5,2024.0123,-999.99
2024,1,6,2024.0150,422.55
";

    #[test]
    fn parses_comment_prefixed_headerless_file() {
        let records = parse_daily_csv(SAMPLE).unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].key.get("site"), Some("mlo"));
        assert_eq!(records[0].values["co2"], Some(421.86));
        assert_eq!(records[3].values["co2"], None);
        assert_eq!(records[0].metadata["unit"], "ppm");
    }

    const MONTHLY: &str = "\
# --------------------------------------------------------------------
# USE OF NOAA GML DATA
# --------------------------------------------------------------------
year,month,decimal date,average,deseasonalized,ndays,sdev,unc
1958,3,1958.2027,315.71,314.44,-1,-9.99,-0.99
1958,4,1958.2877,317.45,315.16,-1,-9.99,-0.99
2024,1,2024.0417,422.80,422.05,27,0.44,0.16
";

    const ANNUAL: &str = "\
# Mauna Loa annual mean CO2
year,mean,unc
1959,315.98,0.12
1960,316.91,0.12
";

    #[test]
    fn parses_monthly_file_with_header() {
        let records = parse_monthly_csv(MONTHLY).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].date(), NaiveDate::from_ymd_opt(1958, 3, 1).unwrap());
        assert_eq!(records[0].values["average"], Some(315.71));
        assert_eq!(records[0].values["ndays"], None);
        assert_eq!(records[0].values["sdev"], None);
        assert_eq!(records[2].values["ndays"], Some(27.0));
        assert!(!records[0].values.contains_key("decimal_date"));
        assert!(!records[0].values.contains_key("year"));
        assert_eq!(records[0].metadata["unit"], "ppm");
    }

    #[test]
    fn parses_annual_file_on_january_first() {
        let records = parse_annual_csv(ANNUAL).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].date(), NaiveDate::from_ymd_opt(1960, 1, 1).unwrap());
        assert_eq!(records[1].values["mean"], Some(316.91));
        assert_eq!(records[1].values["unc"], Some(0.12));
    }

    #[test]
    fn monthly_file_without_month_column_is_rejected() {
        assert!(matches!(
            parse_monthly_csv(ANNUAL).unwrap_err(),
            SourceError::Parse { .. }
        ));
    }

    #[tokio::test]
    async fn monthly_series_keeps_one_row_per_month() {
        let transport = ReplayTransport::new(vec![Ok(TransportResponse::new(200, MONTHLY))]);
        let pull = monthly_series(&transport, &RetryConfig::immediate(3))
            .await
            .unwrap();

        assert_eq!(transport.requests()[0].endpoint, MONTHLY_PATH);
        assert_eq!(pull.fetched, 3);
        assert_eq!(pull.rows.len(), 3);
        assert!(pull.rows.iter().all(|r| r.has_measurement));
        assert_eq!(pull.rows[2].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[tokio::test]
    async fn annual_series_flags_missing_means() {
        let body = "year,mean,unc\n1959,315.98,0.12\n1960,-99.99,0.12\n";
        let transport = ReplayTransport::new(vec![Ok(TransportResponse::new(200, body))]);
        let pull = annual_series(&transport, &RetryConfig::immediate(3))
            .await
            .unwrap();

        assert_eq!(transport.requests()[0].endpoint, ANNUAL_PATH);
        let flags: Vec<bool> = pull.rows.iter().map(|r| r.has_measurement).collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn rejects_impossible_date() {
        let err = parse_daily_csv("2023,2,30,2023.16,420.0\n").unwrap_err();
        assert!(matches!(err, SourceError::Parse { .. }));
    }

    #[test]
    fn rejects_short_row() {
        assert!(matches!(
            parse_daily_csv("2023,2,1\n").unwrap_err(),
            SourceError::Csv(_)
        ));
    }

    #[tokio::test]
    async fn daily_series_fills_the_calendar() {
        let transport = ReplayTransport::new(vec![Ok(TransportResponse::new(200, SAMPLE))]);
        let pull = daily_series(&transport, &RetryConfig::immediate(3))
            .await
            .unwrap();

        assert_eq!(transport.requests()[0].endpoint, DAILY_PATH);
        assert_eq!(pull.fetched, 5);
        // Jan 1 through Jan 6.
        assert_eq!(pull.rows.len(), 6);
        let flags: Vec<bool> = pull.rows.iter().map(|r| r.has_measurement).collect();
        assert_eq!(flags, vec![true, true, false, false, false, true]);
        assert_eq!(pull.rows[1].values["co2"], Some(422.10));
        assert!(pull.rows.iter().all(|r| r.metadata["unit"] == "ppm"));
    }

    #[tokio::test]
    async fn exhausted_download_is_an_empty_partial_pull() {
        let transport =
            ReplayTransport::repeating(Ok(TransportResponse::new(502, "bad gateway")));
        let pull = daily_series(&transport, &RetryConfig::immediate(3))
            .await
            .unwrap();
        assert!(pull.rows.is_empty());
        assert!(pull.is_partial());
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn not_found_is_fatal() {
        let transport = ReplayTransport::new(vec![Ok(TransportResponse::new(404, "missing"))]);
        let err = daily_series(&transport, &RetryConfig::immediate(3))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Request(_)));
        assert_eq!(transport.request_count(), 1);
    }
}
