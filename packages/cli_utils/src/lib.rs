#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for the ingestion tools.
//!
//! Provides an `indicatif`-backed [`PullProgress`] plus [`init_logger`],
//! which sets up `indicatif-log-bridge` so that `log::info!` and friends
//! are suspended while progress bars redraw.

use std::sync::Arc;
use std::time::Duration;

use envseries_ingest_models::{PullProgress, PullSummary};
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;

/// An `indicatif` [`ProgressBar`] that implements [`PullProgress`].
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Style to switch to once `start()` provides the pull count.
    bar_style: ProgressStyle,
}

impl IndicatifProgress {
    /// Creates a bar that counts pulls. It spins until
    /// [`PullProgress::start()`] gives it a length.
    #[must_use]
    pub fn pulls_bar(multi: &MultiProgress, message: &str) -> Arc<dyn PullProgress> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        let bar_style = ProgressStyle::with_template(
            "{msg} {wide_bar:.green/dim} {pos}/{len} [{elapsed_precise}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Arc::new(Self { bar, bar_style })
    }
}

impl PullProgress for IndicatifProgress {
    fn start(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.bar_style.clone());
    }

    fn begin_pull(&self, definition_id: &str) {
        self.bar.set_message(definition_id.to_string());
    }

    fn end_pull(&self, definition_id: &str, summary: Option<&PullSummary>) {
        match summary {
            Some(summary) if summary.partial => {
                self.bar.println(format!(
                    "  {definition_id}: {} rows (partial)",
                    summary.rows_written
                ));
            }
            Some(summary) => {
                self.bar
                    .println(format!("  {definition_id}: {} rows", summary.rows_written));
            }
            None => self.bar.println(format!("  {definition_id}: failed")),
        }
        self.bar.inc(1);
    }

    fn finish(&self, message: String) {
        self.bar.finish_with_message(message);
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while progress bars redraw.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // already set in tests

    log::set_max_level(level);

    multi
}

