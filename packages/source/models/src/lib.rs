#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Descriptors shared by the provider adapters and the pull definitions.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// An upstream data provider.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Provider {
    /// `OpenAQ` air-quality API (v3).
    Openaq,
    /// NOAA NCDC Climate Data Online API (v2).
    NcdcCdo,
    /// NOAA Global Monitoring Laboratory trend files.
    NoaaGml,
}

/// Aggregation level of an `OpenAQ` sensor series.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Granularity {
    /// Raw measurements as reported.
    Measurements,
    /// Hourly aggregates.
    Hours,
    /// Daily aggregates.
    #[default]
    Days,
}

/// A catalog endpoint of the NCDC CDO API.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CatalogEndpoint {
    Datasets,
    Datacategories,
    Datatypes,
    Locationcategories,
    Locations,
    Stations,
}

impl CatalogEndpoint {
    /// Path of the endpoint relative to the API base URL.
    #[must_use]
    pub fn path(self) -> String {
        format!("/{self}")
    }
}

/// One sensor of one `OpenAQ` location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub location_id: u64,
    pub location_name: String,
    pub sensor_id: u64,
    /// Short parameter name (e.g. `"pm25"`).
    pub parameter: String,
    /// Units the parameter is reported in (e.g. `"µg/m³"`).
    pub units: String,
}

/// A weather station and the name its rows are labelled with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationRef {
    /// Full CDO station id (e.g. `"GHCND:USW00093721"`).
    pub id: String,
    pub name: String,
}

impl StationRef {
    #[must_use]
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
        }
    }
}

/// A point on the globe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// `lat,lon` as providers expect it in query strings.
    #[must_use]
    pub fn to_query_value(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn catalog_paths() {
        let paths: Vec<String> = CatalogEndpoint::iter().map(CatalogEndpoint::path).collect();
        assert_eq!(
            paths,
            vec![
                "/datasets",
                "/datacategories",
                "/datatypes",
                "/locationcategories",
                "/locations",
                "/stations",
            ]
        );
        assert_eq!(
            CatalogEndpoint::from_str("stations").unwrap(),
            CatalogEndpoint::Stations
        );
    }

    #[test]
    fn granularity_defaults_to_days() {
        assert_eq!(Granularity::default(), Granularity::Days);
        assert_eq!(Granularity::Hours.as_ref(), "hours");
    }

    #[test]
    fn provider_names_round_trip_through_strum() {
        for provider in Provider::iter() {
            assert_eq!(Provider::from_str(provider.as_ref()).unwrap(), provider);
        }
        assert_eq!(Provider::NcdcCdo.to_string(), "ncdc_cdo");
    }

    #[test]
    fn coordinates_render_as_lat_lon() {
        assert_eq!(
            Coordinates::new(39.4015, -76.6019).to_query_value(),
            "39.4015,-76.6019"
        );
    }

    #[test]
    fn station_reads_from_toml() {
        let station: StationRef =
            toml::from_str("id = \"GHCND:USW00093721\"\nname = \"BWI\"").unwrap();
        assert_eq!(station, StationRef::new("GHCND:USW00093721", "BWI"));
    }
}
