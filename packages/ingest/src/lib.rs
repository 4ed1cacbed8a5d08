#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Runs pull definitions and writes their densified rows to table sinks.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use envseries_fetch::transport::Transport;
use envseries_fetch_models::FetchConfig;
use envseries_ingest_models::{PullProgress, PullSummary};
use envseries_source::credentials::CredentialProvider;
use envseries_source::definition::{PullDefinition, load_definition};
use envseries_source::{SeriesPull, SourceError, ncdc, openaq, registry};
use envseries_source_models::{CatalogEndpoint, Provider};
use envseries_store::{CsvSink, SeriesSink, StoreError};

/// Errors that can occur while running a pull.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Neither a built-in definition id nor a readable TOML file.
    #[error("Unknown pull definition: {name}. Available: {available}")]
    UnknownDefinition {
        /// What was asked for.
        name: String,
        /// Comma-separated built-in ids.
        available: String,
    },

    /// The definition does not search `OpenAQ` locations.
    #[error("Pull definition {id} has no OpenAQ search area")]
    NoSearchArea { id: String },
}

/// Returns every built-in pull definition.
#[must_use]
pub fn all_definitions() -> Vec<PullDefinition> {
    registry::all_definitions()
}

/// Returns the built-in definitions to run, filtered by the `--pulls` CLI
/// flag or the `ENVSERIES_PULLS` environment variable. If neither is set,
/// every definition is returned.
#[must_use]
pub fn enabled_definitions(cli_filter: Option<String>) -> Vec<PullDefinition> {
    let filter = cli_filter.or_else(|| std::env::var("ENVSERIES_PULLS").ok());
    filter_definitions(all_definitions(), filter.as_deref())
}

fn filter_definitions(all: Vec<PullDefinition>, filter: Option<&str>) -> Vec<PullDefinition> {
    let Some(filter) = filter else {
        return all;
    };

    let ids: Vec<&str> = filter
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let available = all.iter().map(|d| d.id.clone()).collect::<Vec<_>>().join(", ");
    let filtered: Vec<PullDefinition> = all
        .into_iter()
        .filter(|d| ids.contains(&d.id.as_str()))
        .collect();

    if filtered.is_empty() {
        log::warn!("No matching pulls found for filter {ids:?}. Available: {available}");
    }

    filtered
}

/// Resolves a built-in definition id, or a path to a TOML definition.
///
/// # Errors
///
/// Returns [`IngestError::Source`] if the file exists but is invalid, or
/// [`IngestError::UnknownDefinition`] if nothing matches.
pub fn resolve_definition(name: &str) -> Result<PullDefinition, IngestError> {
    let path = Path::new(name);
    if path.is_file() {
        return Ok(load_definition(path)?);
    }

    registry::find_definition(name).ok_or_else(|| IngestError::UnknownDefinition {
        name: name.to_owned(),
        available: all_definitions()
            .iter()
            .map(|d| d.id.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn write_pull(
    definition: &PullDefinition,
    pull: &SeriesPull,
    sink: &mut dyn SeriesSink,
    start: Instant,
) -> Result<PullSummary, IngestError> {
    let written = sink.write_table(&definition.table, &pull.rows)?;

    let summary = PullSummary {
        definition_id: definition.id.clone(),
        table: definition.table.clone(),
        records_fetched: pull.fetched as u64,
        rows_written: written as u64,
        measurements: pull.measurement_count() as u64,
        partial: pull.is_partial(),
        duration: start.elapsed(),
    };

    if summary.partial {
        log::warn!(
            "[{}] Wrote PARTIAL table '{}': {} rows ({} gap days) in {:.1}s",
            summary.definition_id,
            summary.table,
            summary.rows_written,
            summary.gap_rows(),
            summary.duration.as_secs_f64()
        );
    } else {
        log::info!(
            "[{}] Wrote table '{}': {} rows ({} gap days) in {:.1}s",
            summary.definition_id,
            summary.table,
            summary.rows_written,
            summary.gap_rows(),
            summary.duration.as_secs_f64()
        );
    }

    Ok(summary)
}

fn finish_pull(
    definition: &PullDefinition,
    result: Result<SeriesPull, SourceError>,
    sink: &mut dyn SeriesSink,
    start: Instant,
) -> Result<PullSummary, IngestError> {
    match result {
        Ok(pull) => write_pull(definition, &pull, sink, start),
        Err(e) => {
            if let Some(partial) = e.partial_pull() {
                log::warn!(
                    "[{}] Writing {} rows merged before the pull aborted",
                    definition.id,
                    partial.rows.len()
                );
                write_pull(definition, partial, sink, start)?;
            }
            Err(e.into())
        }
    }
}

/// Runs `definition` against its provider and writes the rows to `sink`.
///
/// Partial pulls are still written; [`PullSummary::partial`] says so. A
/// pull that aborts after earlier sensors or stations succeeded writes
/// their rows before returning the error.
///
/// # Errors
///
/// Returns [`IngestError`] if the pull fails fatally or the table cannot
/// be written.
pub async fn run_pull(
    definition: &PullDefinition,
    credentials: &dyn CredentialProvider,
    sink: &mut dyn SeriesSink,
) -> Result<PullSummary, IngestError> {
    let start = Instant::now();
    let result = definition.run(credentials).await;
    finish_pull(definition, result, sink, start)
}

/// Like [`run_pull`], through an explicit transport.
///
/// # Errors
///
/// Returns [`IngestError`] if the pull fails fatally or the table cannot
/// be written.
pub async fn run_pull_with(
    definition: &PullDefinition,
    transport: &dyn Transport,
    sink: &mut dyn SeriesSink,
) -> Result<PullSummary, IngestError> {
    let start = Instant::now();
    let result = definition.run_with(transport).await;
    finish_pull(definition, result, sink, start)
}

/// Runs each definition in turn. A failed pull is logged and skipped so
/// the rest still run.
pub async fn run_pulls(
    definitions: &[PullDefinition],
    credentials: &dyn CredentialProvider,
    sink: &mut dyn SeriesSink,
    progress: &Arc<dyn PullProgress>,
) -> Vec<PullSummary> {
    progress.start(definitions.len() as u64);
    let mut summaries = Vec::with_capacity(definitions.len());

    for definition in definitions {
        progress.begin_pull(&definition.id);
        match run_pull(definition, credentials, sink).await {
            Ok(summary) => {
                progress.end_pull(&definition.id, Some(&summary));
                summaries.push(summary);
            }
            Err(e) => {
                log::error!("Failed to run pull {}: {e}", definition.id);
                progress.end_pull(&definition.id, None);
            }
        }
    }

    progress.finish(format!(
        "{}/{} pulls written",
        summaries.len(),
        definitions.len()
    ));
    summaries
}

/// Exports an NCDC catalog endpoint to `ncdc_<endpoint>.csv`.
///
/// # Errors
///
/// Returns [`IngestError`] if the catalog fetch fails fatally or the file
/// cannot be written.
pub async fn export_catalog(
    credentials: &dyn CredentialProvider,
    endpoint: CatalogEndpoint,
    config: &FetchConfig,
    sink: &mut CsvSink,
) -> Result<usize, IngestError> {
    let transport = credentials.provider_config(Provider::NcdcCdo)?.transport()?;
    export_catalog_with(&transport, endpoint, config, sink).await
}

/// Like [`export_catalog`], through an explicit transport.
///
/// # Errors
///
/// Returns [`IngestError`] if the catalog fetch fails fatally or the file
/// cannot be written.
pub async fn export_catalog_with(
    transport: &dyn Transport,
    endpoint: CatalogEndpoint,
    config: &FetchConfig,
    sink: &mut CsvSink,
) -> Result<usize, IngestError> {
    let outcome = ncdc::fetch_catalog(transport, endpoint, config).await?;
    if outcome.is_partial() {
        log::warn!(
            "NCDC {endpoint} catalog is partial ({:?})",
            outcome.completion
        );
    }
    Ok(sink.write_records(&format!("ncdc_{endpoint}"), &outcome.records)?)
}

/// Exports the `OpenAQ` locations around an `OpenAQ` definition's search
/// area to `openaq_locations.csv`, and their sensors to
/// `openaq_sensors.csv`. Returns the location and sensor counts.
///
/// # Errors
///
/// Returns [`IngestError::NoSearchArea`] for a non-`OpenAQ` definition,
/// otherwise as [`export_catalog`].
pub async fn export_openaq_catalog(
    definition: &PullDefinition,
    credentials: &dyn CredentialProvider,
    sink: &mut CsvSink,
) -> Result<(usize, usize), IngestError> {
    let transport = credentials.provider_config(Provider::Openaq)?.transport()?;
    export_openaq_catalog_with(definition, &transport, sink).await
}

/// Like [`export_openaq_catalog`], through an explicit transport.
///
/// # Errors
///
/// As [`export_openaq_catalog`].
pub async fn export_openaq_catalog_with(
    definition: &PullDefinition,
    transport: &dyn Transport,
    sink: &mut CsvSink,
) -> Result<(usize, usize), IngestError> {
    let Some((center, radius_m)) = definition.fetcher.search_area() else {
        return Err(IngestError::NoSearchArea {
            id: definition.id.clone(),
        });
    };

    let outcome =
        openaq::fetch_locations(transport, center, radius_m, &definition.fetch).await?;
    let sensors = openaq::sensors_from_locations(&outcome.records);

    let locations = sink.write_records("openaq_locations", &outcome.records)?;
    let sensors = sink.write_records("openaq_sensors", &openaq::sensor_records(&sensors))?;
    log::info!(
        "[{}] Exported {locations} OpenAQ locations and {sensors} sensors to {}",
        definition.id,
        sink.dir().display()
    );
    Ok((locations, sensors))
}

#[cfg(test)]
mod tests {
    use envseries_fetch::replay::ReplayTransport;
    use envseries_fetch::transport::TransportResponse;
    use envseries_source::credentials::EnvCredentials;
    use envseries_source::definition::parse_definition;
    use envseries_store::MemorySink;
    use serde_json::json;

    use super::*;

    const CO2_CSV: &str = "# year, month, day, decimal, ppm\n\
                           2024,3,1,2024.16,424.1\n\
                           2024,3,4,2024.17,424.9\n";

    fn co2_definition() -> PullDefinition {
        parse_definition(
            "id = \"co2\"\nname = \"CO2\"\ntable = \"noaa_co2_daily_mlo\"\n\
             [fetch.retry]\nmax_attempts = 1\n\
             [fetcher]\ntype = \"noaa_co2_daily\"\n",
        )
        .unwrap()
    }

    #[test]
    fn filter_keeps_listed_ids_only() {
        let filtered =
            filter_definitions(all_definitions(), Some("noaa_co2_daily_mlo, nope"));
        let ids: Vec<&str> = filtered.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["noaa_co2_daily_mlo"]);
        assert_eq!(filter_definitions(all_definitions(), None).len(), 5);
        assert!(filter_definitions(all_definitions(), Some("nope")).is_empty());
    }

    #[test]
    fn resolves_builtin_ids_and_reports_unknown_ones() {
        assert_eq!(
            resolve_definition("openaq_daily").unwrap().table,
            "openaq_daily"
        );
        let err = resolve_definition("does_not_exist").unwrap_err();
        assert!(err.to_string().contains("noaa_co2_daily_mlo"));
    }

    #[test]
    fn resolves_definition_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "id = \"custom\"\nname = \"Custom\"\ntable = \"custom_table\"\n[fetcher]\ntype = \"noaa_co2_daily\"\n",
        )
        .unwrap();
        let def = resolve_definition(path.to_str().unwrap()).unwrap();
        assert_eq!(def.id, "custom");
    }

    #[tokio::test]
    async fn pull_writes_densified_table() {
        let transport = ReplayTransport::new(vec![Ok(TransportResponse::new(200, CO2_CSV))]);
        let mut sink = MemorySink::new();

        let summary = run_pull_with(&co2_definition(), &transport, &mut sink)
            .await
            .unwrap();

        assert_eq!(summary.records_fetched, 2);
        assert_eq!(summary.rows_written, 4);
        assert_eq!(summary.measurements, 2);
        assert_eq!(summary.gap_rows(), 2);
        assert!(!summary.partial);
        assert_eq!(sink.table("noaa_co2_daily_mlo").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn abandoned_pull_still_writes_a_partial_table() {
        let transport =
            ReplayTransport::repeating(Ok(TransportResponse::new(503, "maintenance")));
        let mut sink = MemorySink::new();

        let summary = run_pull_with(&co2_definition(), &transport, &mut sink)
            .await
            .unwrap();

        assert!(summary.partial);
        assert_eq!(summary.rows_written, 0);
        assert!(sink.table("noaa_co2_daily_mlo").unwrap().is_empty());
    }

    #[tokio::test]
    async fn aborted_pull_writes_rows_merged_before_the_failure() {
        let definition = parse_definition(
            "id = \"ncdc\"\nname = \"NCDC\"\ntable = \"noaa_ncdc_ghcnd_daily\"\n\
             [fetch]\npage_delay_ms = 0\n\
             [fetch.retry]\nmax_attempts = 1\n\
             [fetcher]\ntype = \"ncdc_daily\"\nstart = \"2024-01-01\"\nend = \"2024-01-02\"\n\
             stations = [{ id = \"GHCND:A\", name = \"A\" }, { id = \"GHCND:B\", name = \"B\" }]\n",
        )
        .unwrap();
        let body = json!({ "results": [
            { "date": "2024-01-01T00:00:00", "datatype": "TMAX", "station": "GHCND:A", "value": 3.0 }
        ] });
        let transport = ReplayTransport::new(vec![
            Ok(TransportResponse::new(200, body.to_string())),
            Ok(TransportResponse::new(400, "{\"message\":\"bad station\"}")),
        ]);
        let mut sink = MemorySink::new();

        let err = run_pull_with(&definition, &transport, &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::Source(SourceError::PullAborted { .. })
        ));
        assert_eq!(sink.table("noaa_ncdc_ghcnd_daily").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_credentials_skip_the_pull() {
        let definitions: Vec<PullDefinition> = all_definitions()
            .into_iter()
            .filter(|d| d.provider() == Provider::Openaq)
            .collect();
        let mut sink = MemorySink::new();

        let summaries = run_pulls(
            &definitions,
            &EnvCredentials::default(),
            &mut sink,
            &envseries_ingest_models::null_progress(),
        )
        .await;

        assert!(summaries.is_empty());
        assert_eq!(sink.table_names().count(), 0);
    }

    #[tokio::test]
    async fn catalog_export_writes_csv() {
        let body = json!({
            "metadata": { "resultset": { "offset": 1, "count": 2, "limit": 1000 } },
            "results": [
                { "id": "GHCND", "name": "Daily Summaries", "datacoverage": 1 },
                { "id": "GSOM", "name": "Global Summary of the Month", "datacoverage": 1 }
            ]
        });
        let transport =
            ReplayTransport::new(vec![Ok(TransportResponse::new(200, body.to_string()))]);
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path());

        let count = export_catalog_with(
            &transport,
            CatalogEndpoint::Datasets,
            &FetchConfig::default(),
            &mut sink,
        )
        .await
        .unwrap();

        assert_eq!(count, 2);
        let text = std::fs::read_to_string(dir.path().join("ncdc_datasets.csv")).unwrap();
        assert!(text.starts_with("datacoverage,id,name\n"));
        assert_eq!(transport.requests()[0].param("offset"), Some("1"));
    }

    #[tokio::test]
    async fn openaq_catalog_export_writes_locations_and_sensors() {
        let body = json!({
            "meta": { "found": 1 },
            "results": [{
                "id": 2178,
                "name": "Oldtown",
                "sensors": [
                    { "id": 3917, "parameter": { "name": "pm25", "units": "µg/m³" } },
                    { "id": 3918, "parameter": { "name": "o3", "units": "ppm" } }
                ]
            }]
        });
        let transport =
            ReplayTransport::new(vec![Ok(TransportResponse::new(200, body.to_string()))]);
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path());
        let definition = resolve_definition("openaq_daily").unwrap();

        let (locations, sensors) = export_openaq_catalog_with(&definition, &transport, &mut sink)
            .await
            .unwrap();

        assert_eq!((locations, sensors), (1, 2));
        let text = std::fs::read_to_string(dir.path().join("openaq_locations.csv")).unwrap();
        assert!(text.starts_with("id,name,sensors\n2178,Oldtown,"));
        let text = std::fs::read_to_string(dir.path().join("openaq_sensors.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "location_id,location_name,parameter,sensor_id,units"
        );
        assert_eq!(lines[2], "2178,Oldtown,o3,3918,ppm");
        assert_eq!(transport.requests()[0].endpoint, "/locations");
    }

    #[tokio::test]
    async fn openaq_catalog_export_rejects_other_providers() {
        let transport = ReplayTransport::new(vec![]);
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path());

        let err = export_openaq_catalog_with(&co2_definition(), &transport, &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::NoSearchArea { id } if id == "co2"));
        assert_eq!(transport.request_count(), 0);
    }
}
