//! Arrival-ordered collection of accepted pages.

use envseries_fetch_models::{PageResult, Record};

/// Appends each accepted page's records in the order pages arrive.
///
/// Nothing is deduplicated or transformed here; that is left to the
/// densification stage.
#[derive(Debug, Default)]
pub struct Accumulator {
    records: Vec<Record>,
    pages: u32,
}

impl Accumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the records of an accepted page.
    pub fn push_page(&mut self, page: PageResult) {
        self.pages += 1;
        self.records.extend(page.records);
    }

    /// Number of pages accepted so far.
    #[must_use]
    pub const fn page_count(&self) -> u32 {
        self.pages
    }

    /// Number of records accumulated so far.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}
