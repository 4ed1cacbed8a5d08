//! Config-driven pull definitions.
//!
//! A [`PullDefinition`] names an output table and says which provider call
//! fills it. Definitions are TOML documents:
//!
//! ```toml
//! id = "noaa_co2_daily_mlo"
//! name = "Mauna Loa daily CO2"
//! table = "noaa_co2_daily_mlo"
//!
//! [fetcher]
//! type = "noaa_co2_daily"
//! ```

use chrono::NaiveDate;
use envseries_fetch::transport::Transport;
use envseries_fetch_models::FetchConfig;
use envseries_series::calendar::DateWindow;
use envseries_source_models::{Coordinates, Granularity, Provider, StationRef};
use serde::Deserialize;

use crate::credentials::CredentialProvider;
use crate::ncdc::{self, DailyDataQuery};
use crate::{SeriesPull, SourceError, noaa_co2, openaq};

// ── Top-level definition ─────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PullDefinition {
    /// Unique identifier (e.g. `"openaq_daily"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Output table the densified rows are written to.
    pub table: String,
    /// Loop tuning shared by every fetch of the pull.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Which provider call produces the rows.
    pub fetcher: FetcherConfig,
}

// ── Fetcher config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetcherConfig {
    /// Every `OpenAQ` sensor near a point that measures one of
    /// `parameters`.
    OpenaqSensor {
        latitude: f64,
        longitude: f64,
        /// Search radius in metres.
        radius_m: u32,
        /// Parameter names to keep (empty keeps every sensor).
        #[serde(default)]
        parameters: Vec<String>,
        #[serde(default)]
        granularity: Granularity,
        start: NaiveDate,
        /// Inclusive.
        end: NaiveDate,
    },
    /// NCDC CDO daily data for one or more stations.
    NcdcDaily {
        #[serde(default = "default_dataset")]
        dataset_id: String,
        stations: Vec<StationRef>,
        #[serde(default)]
        datatypes: Vec<String>,
        #[serde(default)]
        units: Option<String>,
        start: NaiveDate,
        /// Inclusive.
        end: NaiveDate,
    },
    /// The Mauna Loa daily CO2 file.
    NoaaCo2Daily,
    /// The Mauna Loa monthly mean CO2 file.
    NoaaCo2Monthly,
    /// The Mauna Loa annual mean CO2 file.
    NoaaCo2Annual,
}

fn default_dataset() -> String {
    ncdc::DEFAULT_DATASET.to_owned()
}

/// Parses a TOML pull definition.
///
/// # Errors
///
/// Returns [`SourceError::Definition`] if the document is not a valid
/// definition, or [`SourceError::Parse`] if its date range is reversed.
pub fn parse_definition(toml_str: &str) -> Result<PullDefinition, SourceError> {
    let definition: PullDefinition = toml::from_str(toml_str)?;
    if let Some((start, end)) = definition.fetcher.date_range()
        && end < start
    {
        return Err(SourceError::Parse {
            message: format!("{}: end {end} is before start {start}", definition.id),
        });
    }
    Ok(definition)
}

/// Reads and parses a pull definition file.
///
/// # Errors
///
/// Returns [`SourceError::Io`] if the file cannot be read, otherwise as
/// [`parse_definition`].
pub fn load_definition(path: &std::path::Path) -> Result<PullDefinition, SourceError> {
    parse_definition(&std::fs::read_to_string(path)?)
}

impl FetcherConfig {
    /// The provider this fetcher talks to.
    #[must_use]
    pub const fn provider(&self) -> Provider {
        match self {
            Self::OpenaqSensor { .. } => Provider::Openaq,
            Self::NcdcDaily { .. } => Provider::NcdcCdo,
            Self::NoaaCo2Daily | Self::NoaaCo2Monthly | Self::NoaaCo2Annual => Provider::NoaaGml,
        }
    }

    /// Centre and radius of an `OpenAQ` location search.
    #[must_use]
    pub const fn search_area(&self) -> Option<(Coordinates, u32)> {
        match self {
            Self::OpenaqSensor {
                latitude,
                longitude,
                radius_m,
                ..
            } => Some((Coordinates::new(*latitude, *longitude), *radius_m)),
            _ => None,
        }
    }

    const fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            Self::OpenaqSensor { start, end, .. } | Self::NcdcDaily { start, end, .. } => {
                Some((*start, *end))
            }
            Self::NoaaCo2Daily | Self::NoaaCo2Monthly | Self::NoaaCo2Annual => None,
        }
    }
}

impl PullDefinition {
    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.fetcher.provider()
    }

    /// Runs the pull against the provider's HTTP API.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] if the provider has no credentials,
    /// otherwise as [`run_with`](Self::run_with).
    pub async fn run(
        &self,
        credentials: &dyn CredentialProvider,
    ) -> Result<SeriesPull, SourceError> {
        let transport = credentials.provider_config(self.provider())?.transport()?;
        self.run_with(&transport).await
    }

    /// Runs the pull through `transport`.
    ///
    /// Multi-call pulls (several sensors or stations) concatenate their
    /// rows in call order. A call that ends partially does not stop the
    /// rest.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::PullAborted`] if a sensor or station call
    /// fails fatally; it carries the rows of the calls before it. Other
    /// fatal failures are returned as they are.
    pub async fn run_with(&self, transport: &dyn Transport) -> Result<SeriesPull, SourceError> {
        log::info!("[{}] Starting pull into '{}'", self.id, self.table);

        let pull = match &self.fetcher {
            FetcherConfig::OpenaqSensor {
                latitude,
                longitude,
                radius_m,
                parameters,
                granularity,
                start,
                end,
            } => {
                let center = Coordinates::new(*latitude, *longitude);
                let sensors =
                    openaq::find_sensors(transport, center, *radius_m, parameters, &self.fetch)
                        .await?;
                let range = DateWindow::new(*start, *end);

                let mut pull = SeriesPull::empty();
                for (i, sensor) in sensors.iter().enumerate() {
                    log::info!(
                        "[{}] sensor {}/{}: {} {} at {}",
                        self.id,
                        i + 1,
                        sensors.len(),
                        sensor.sensor_id,
                        sensor.parameter,
                        sensor.location_name
                    );
                    match openaq::sensor_series(transport, sensor, range, *granularity, &self.fetch)
                        .await
                    {
                        Ok(next) => pull.merge(next),
                        Err(source) => return Err(self.aborted(source, pull)),
                    }
                }
                pull
            }
            FetcherConfig::NcdcDaily {
                dataset_id,
                stations,
                datatypes,
                units,
                start,
                end,
            } => {
                let range = DateWindow::new(*start, *end);
                let mut pull = SeriesPull::empty();
                for station in stations {
                    let query = DailyDataQuery {
                        dataset_id: dataset_id.clone(),
                        station: station.clone(),
                        datatypes: datatypes.clone(),
                        units: units.clone(),
                    };
                    match ncdc::daily_data(transport, &query, range, &self.fetch).await {
                        Ok(next) => pull.merge(next),
                        Err(source) => return Err(self.aborted(source, pull)),
                    }
                }
                pull
            }
            FetcherConfig::NoaaCo2Daily => {
                noaa_co2::daily_series(transport, &self.fetch.retry).await?
            }
            FetcherConfig::NoaaCo2Monthly => {
                noaa_co2::monthly_series(transport, &self.fetch.retry).await?
            }
            FetcherConfig::NoaaCo2Annual => {
                noaa_co2::annual_series(transport, &self.fetch.retry).await?
            }
        };

        if pull.is_partial() {
            log::warn!(
                "[{}] Pull is partial ({:?}): {} rows from {} records",
                self.id,
                pull.completion,
                pull.rows.len(),
                pull.fetched
            );
        } else {
            log::info!(
                "[{}] Pull complete: {} rows ({} measurements) from {} records",
                self.id,
                pull.rows.len(),
                pull.measurement_count(),
                pull.fetched
            );
        }

        Ok(pull)
    }
}

impl PullDefinition {
    fn aborted(&self, source: SourceError, partial: SeriesPull) -> SourceError {
        log::error!(
            "[{}] Pull aborted after {} rows: {source}",
            self.id,
            partial.rows.len()
        );
        SourceError::PullAborted {
            id: self.id.clone(),
            source: Box::new(source),
            partial,
        }
    }
}
