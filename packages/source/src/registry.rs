//! Built-in pull definitions, embedded from `packages/source/definitions/`.
//!
//! Adding a pull means adding a TOML file there and listing it below.

use crate::definition::{PullDefinition, parse_definition};

const DEFINITION_TOMLS: &[(&str, &str)] = &[
    ("openaq_daily", include_str!("../definitions/openaq_daily.toml")),
    (
        "noaa_ncdc_ghcnd_daily",
        include_str!("../definitions/noaa_ncdc_ghcnd_daily.toml"),
    ),
    (
        "noaa_co2_daily_mlo",
        include_str!("../definitions/noaa_co2_daily_mlo.toml"),
    ),
    (
        "noaa_co2_monthly_mlo",
        include_str!("../definitions/noaa_co2_monthly_mlo.toml"),
    ),
    (
        "noaa_co2_annual_mlo",
        include_str!("../definitions/noaa_co2_annual_mlo.toml"),
    ),
];

#[cfg(test)]
const EXPECTED_DEFINITION_COUNT: usize = 5;

/// Returns every built-in definition.
///
/// # Panics
///
/// Panics if an embedded TOML file is malformed. The files are compiled
/// in, so this is caught by the tests below.
#[must_use]
pub fn all_definitions() -> Vec<PullDefinition> {
    DEFINITION_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_definition(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect()
}

/// Looks up a built-in definition by id.
#[must_use]
pub fn find_definition(id: &str) -> Option<PullDefinition> {
    all_definitions().into_iter().find(|d| d.id == id)
}

#[cfg(test)]
mod tests {
    use envseries_source_models::Provider;

    use super::*;

    #[test]
    fn loads_all_definitions() {
        assert_eq!(all_definitions().len(), EXPECTED_DEFINITION_COUNT);
    }

    #[test]
    fn ids_are_unique_and_match_file_names() {
        let defs = all_definitions();
        let mut ids: Vec<&str> = defs.iter().map(|d| d.id.as_str()).collect();
        for ((name, _), id) in DEFINITION_TOMLS.iter().zip(&ids) {
            assert_eq!(name, id);
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), EXPECTED_DEFINITION_COUNT);
    }

    #[test]
    fn every_provider_has_a_definition() {
        let defs = all_definitions();
        for provider in [Provider::Openaq, Provider::NcdcCdo, Provider::NoaaGml] {
            assert!(
                defs.iter().any(|d| d.provider() == provider),
                "no definition for {provider}"
            );
        }
    }

    #[test]
    fn finds_by_id() {
        let def = find_definition("noaa_co2_daily_mlo").unwrap();
        assert_eq!(def.table, "noaa_co2_daily_mlo");
        assert!(find_definition("nope").is_none());
    }
}
