//! Daily calendar helpers.

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Every day from `start` to `end` inclusive. Empty if `end < start`.
pub fn daily_range(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

/// Number of days from `start` to `end` inclusive.
#[must_use]
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> usize {
    usize::try_from((end - start).num_days() + 1).unwrap_or(0)
}

/// An inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Creates a window, swapping the bounds if they are reversed.
    #[must_use]
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if end < start {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    #[must_use]
    pub fn days(&self) -> usize {
        days_inclusive(self.start, self.end)
    }
}

/// Splits `[start, end]` into consecutive windows no longer than one
/// year each. Some providers reject date ranges longer than that.
#[must_use]
pub fn year_windows(start: NaiveDate, end: NaiveDate) -> Vec<DateWindow> {
    let range = DateWindow::new(start, end);
    let mut windows = Vec::new();
    let mut cursor = range.start;

    while cursor <= range.end {
        let window_end = cursor
            .checked_add_months(Months::new(12))
            .and_then(|d| d.checked_sub_days(Days::new(1)))
            .map_or(range.end, |d| d.min(range.end));
        windows.push(DateWindow {
            start: cursor,
            end: window_end,
        });
        match window_end.checked_add_days(Days::new(1)) {
            Some(next) => cursor = next,
            None => break,
        }
    }

    windows
}
