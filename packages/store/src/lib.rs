#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Persistence of densified series as named tables.
//!
//! A [`SeriesSink`] receives the rows of one pull together with the table
//! they belong to. [`CsvSink`] writes one CSV file per table;
//! [`MemorySink`] keeps tables in memory.
//!
//! Column names are normalized with [`normalize_column`] before they are
//! written, so `"parameter units"` lands as `parameter_units`.

pub mod layout;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use envseries_fetch_models::Record;
use envseries_series_models::DensifiedRow;

pub use layout::{TableLayout, normalize_column};

/// Errors that can occur while writing a table.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error creating the output directory or file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The table name cannot be used as a file name.
    #[error("invalid table name '{name}'")]
    InvalidTable {
        /// The rejected name.
        name: String,
    },
}

/// Accepts densified rows for a named table.
pub trait SeriesSink {
    /// Replaces the contents of `table` with `rows`. Returns the number of
    /// rows written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the table cannot be written.
    fn write_table(&mut self, table: &str, rows: &[DensifiedRow]) -> Result<usize, StoreError>;
}

/// Normalizes `table` and rejects names that are not plain identifiers.
///
/// # Errors
///
/// Returns [`StoreError::InvalidTable`] for empty names or names with
/// characters other than ASCII alphanumerics and `_`.
pub fn table_identifier(table: &str) -> Result<String, StoreError> {
    let name = normalize_column(table);
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::InvalidTable {
            name: table.to_owned(),
        });
    }
    Ok(name)
}

/// Writes `rows` as CSV with a header row. Returns the number of data rows.
///
/// # Errors
///
/// Returns [`StoreError::Csv`] if encoding or writing fails.
pub fn write_rows<W: Write>(writer: W, rows: &[DensifiedRow]) -> Result<usize, StoreError> {
    let layout = TableLayout::for_rows(rows);
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(layout.header())?;
    for row in rows {
        csv.write_record(layout.render(row))?;
    }
    csv.flush()?;
    Ok(rows.len())
}

/// Writes flat provider records (catalog listings) as CSV. Columns are the
/// union of top-level fields in first-seen order; nested values are
/// written as JSON text.
///
/// # Errors
///
/// Returns [`StoreError::Csv`] if encoding or writing fails.
pub fn write_records<W: Write>(writer: W, records: &[Record]) -> Result<usize, StoreError> {
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for name in record.keys() {
            if !columns.contains(&name.as_str()) {
                columns.push(name);
            }
        }
    }

    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(columns.iter().map(|c| normalize_column(c)))?;
    for record in records {
        csv.write_record(columns.iter().map(|c| match record.get(*c) {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }))?;
    }
    csv.flush()?;
    Ok(records.len())
}

/// Writes each table to `<dir>/<table>.csv`, replacing any previous file.
#[derive(Debug, Clone)]
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file `table` is written to.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTable`] if `table` is not a plain
    /// identifier.
    pub fn path_for(&self, table: &str) -> Result<PathBuf, StoreError> {
        Ok(self.dir.join(format!("{}.csv", table_identifier(table)?)))
    }

    fn create(&self, table: &str) -> Result<(PathBuf, File), StoreError> {
        let path = self.path_for(table)?;
        std::fs::create_dir_all(&self.dir)?;
        let file = File::create(&path)?;
        Ok((path, file))
    }

    /// Writes catalog records to `<dir>/<table>.csv`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the table name is invalid or the file
    /// cannot be written.
    pub fn write_records(&mut self, table: &str, records: &[Record]) -> Result<usize, StoreError> {
        let (path, file) = self.create(table)?;
        let count = write_records(file, records)?;
        log::info!("Wrote {count} records to {}", path.display());
        Ok(count)
    }
}

impl SeriesSink for CsvSink {
    fn write_table(&mut self, table: &str, rows: &[DensifiedRow]) -> Result<usize, StoreError> {
        let (path, file) = self.create(table)?;
        let count = write_rows(file, rows)?;
        log::info!("Wrote {count} rows to {}", path.display());
        Ok(count)
    }
}

/// Keeps every written table in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    tables: BTreeMap<String, Vec<DensifiedRow>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn table(&self, table: &str) -> Option<&[DensifiedRow]> {
        self.tables.get(&normalize_column(table)).map(Vec::as_slice)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

impl SeriesSink for MemorySink {
    fn write_table(&mut self, table: &str, rows: &[DensifiedRow]) -> Result<usize, StoreError> {
        self.tables.insert(table_identifier(table)?, rows.to_vec());
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;
    use envseries_series_models::SeriesKey;
    use serde_json::json;

    use super::*;

    fn row(date: &str, value: Option<f64>) -> DensifiedRow {
        DensifiedRow {
            key: SeriesKey::new().with("location_id", 2178).with("parameter", "pm25"),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            values: BTreeMap::from([("value".to_owned(), value)]),
            metadata: BTreeMap::from([
                ("location_name".to_owned(), "Oldtown".to_owned()),
                ("parameter units".to_owned(), "µg/m³".to_owned()),
            ]),
            has_measurement: value.is_some(),
        }
    }

    #[test]
    fn writes_header_and_gap_rows() {
        let mut out = Vec::new();
        let n = write_rows(&mut out, &[row("2024-01-01", Some(8.5)), row("2024-01-02", None)]).unwrap();
        assert_eq!(n, 2);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "location_id,parameter,date,value,location_name,parameter_units,has_measurement",
                "2178,pm25,2024-01-01,8.5,Oldtown,µg/m³,true",
                "2178,pm25,2024-01-02,,Oldtown,µg/m³,false",
            ]
        );
    }

    #[test]
    fn catalog_records_flatten_with_union_columns() {
        let records: Vec<Record> = [
            json!({ "id": "GHCND:US1", "name": "A", "elevation": 10.5 }),
            json!({ "id": "GHCND:US2", "Data Coverage": 1, "extra": { "a": 1 } }),
        ]
        .into_iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect();

        let mut out = Vec::new();
        write_records(&mut out, &records).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.contains("data_coverage"));
        assert_eq!(header.split(',').count(), 5);
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn rejects_path_like_table_names() {
        let sink = CsvSink::new("out");
        assert!(matches!(
            sink.path_for("../etc/passwd"),
            Err(StoreError::InvalidTable { .. })
        ));
        assert!(matches!(sink.path_for("  "), Err(StoreError::InvalidTable { .. })));
        assert_eq!(
            sink.path_for("OpenAQ Daily").unwrap(),
            Path::new("out").join("openaq_daily.csv")
        );
    }

    #[test]
    fn csv_sink_replaces_table_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path().join("tables"));

        sink.write_table("openaq_daily", &[row("2024-01-01", Some(1.0)), row("2024-01-02", None)])
            .unwrap();
        sink.write_table("openaq_daily", &[row("2024-01-03", Some(2.0))])
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join("tables/openaq_daily.csv")).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("2024-01-03"));
    }

    #[test]
    fn memory_sink_keys_tables_by_normalized_name() {
        let mut sink = MemorySink::new();
        sink.write_table("NOAA CO2", &[row("2024-01-01", Some(1.0))]).unwrap();
        assert_eq!(sink.table_names().collect::<Vec<_>>(), vec!["noaa_co2"]);
        assert_eq!(sink.table("noaa_co2").unwrap().len(), 1);
    }
}
