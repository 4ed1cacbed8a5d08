//! Column layout of a densified-series table.

use std::collections::BTreeSet;

use envseries_series_models::DensifiedRow;

/// Trims, lowercases, and replaces spaces with `_`.
#[must_use]
pub fn normalize_column(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Column order of a table: key columns, `date`, value columns, metadata
/// columns, `has_measurement`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableLayout {
    /// In first-seen order.
    pub key_columns: Vec<String>,
    /// Sorted.
    pub value_columns: Vec<String>,
    /// Sorted.
    pub metadata_columns: Vec<String>,
}

impl TableLayout {
    /// The union of every column used by `rows`.
    #[must_use]
    pub fn for_rows(rows: &[DensifiedRow]) -> Self {
        let mut key_columns: Vec<String> = Vec::new();
        let mut values = BTreeSet::new();
        let mut metadata = BTreeSet::new();

        for row in rows {
            for name in row.key.names() {
                if !key_columns.iter().any(|k| k == name) {
                    key_columns.push(name.to_owned());
                }
            }
            values.extend(row.values.keys().cloned());
            metadata.extend(row.metadata.keys().cloned());
        }

        Self {
            key_columns,
            value_columns: values.into_iter().collect(),
            metadata_columns: metadata.into_iter().collect(),
        }
    }

    /// Normalized column names.
    #[must_use]
    pub fn header(&self) -> Vec<String> {
        let mut header: Vec<String> = self.key_columns.iter().map(|c| normalize_column(c)).collect();
        header.push("date".to_owned());
        header.extend(self.value_columns.iter().map(|c| normalize_column(c)));
        header.extend(self.metadata_columns.iter().map(|c| normalize_column(c)));
        header.push("has_measurement".to_owned());
        header
    }

    /// One row's cells in header order. Absent values are empty.
    #[must_use]
    pub fn render(&self, row: &DensifiedRow) -> Vec<String> {
        let mut cells: Vec<String> = self
            .key_columns
            .iter()
            .map(|c| row.key.get(c).unwrap_or_default().to_owned())
            .collect();
        cells.push(row.date.format("%Y-%m-%d").to_string());
        cells.extend(self.value_columns.iter().map(|c| {
            row.values
                .get(c)
                .copied()
                .flatten()
                .map(|v| v.to_string())
                .unwrap_or_default()
        }));
        cells.extend(
            self.metadata_columns
                .iter()
                .map(|c| row.metadata.get(c).cloned().unwrap_or_default()),
        );
        cells.push(row.has_measurement.to_string());
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_column_names() {
        assert_eq!(normalize_column(" Parameter Units "), "parameter_units");
        assert_eq!(normalize_column("co2"), "co2");
        assert_eq!(normalize_column("Data Coverage"), "data_coverage");
    }

    #[test]
    fn empty_rows_still_have_fixed_columns() {
        let layout = TableLayout::for_rows(&[]);
        assert_eq!(layout.header(), vec!["date", "has_measurement"]);
    }
}
