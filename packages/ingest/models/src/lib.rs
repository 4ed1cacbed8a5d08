#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pull summaries and progress reporting.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of one pull written to its table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullSummary {
    /// Definition that was run.
    pub definition_id: String,
    /// Table the rows were written to.
    pub table: String,
    /// Provider records fetched.
    pub records_fetched: u64,
    /// Densified rows written, gap days included.
    pub rows_written: u64,
    /// Rows that hold a genuine measurement.
    pub measurements: u64,
    /// Whether some pages were abandoned or capped.
    pub partial: bool,
    /// How long the pull took.
    pub duration: Duration,
}

impl PullSummary {
    /// Rows filled in for days without a measurement.
    #[must_use]
    pub const fn gap_rows(&self) -> u64 {
        self.rows_written.saturating_sub(self.measurements)
    }
}

/// Receives progress across a batch of pulls.
///
/// Implementations must be `Send + Sync` so one reporter can be shared
/// through an [`Arc`].
pub trait PullProgress: Send + Sync {
    /// Called once with the number of pulls in the batch.
    fn start(&self, total: u64);

    /// Called before each pull runs.
    fn begin_pull(&self, definition_id: &str);

    /// Called after each pull, whether or not it succeeded.
    fn end_pull(&self, definition_id: &str, summary: Option<&PullSummary>);

    /// Called once when the batch is done.
    fn finish(&self, message: String);
}

/// Ignores all progress.
pub struct NullProgress;

impl PullProgress for NullProgress {
    fn start(&self, _total: u64) {}
    fn begin_pull(&self, _definition_id: &str) {}
    fn end_pull(&self, _definition_id: &str, _summary: Option<&PullSummary>) {}
    fn finish(&self, _message: String) {}
}

#[must_use]
pub fn null_progress() -> Arc<dyn PullProgress> {
    Arc::new(NullProgress)
}
