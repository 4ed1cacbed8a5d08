#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the environmental series ingestion tool.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use envseries_cli_utils::{IndicatifProgress, init_logger};
use envseries_fetch_models::FetchConfig;
use envseries_ingest::{
    all_definitions, enabled_definitions, export_catalog, export_openaq_catalog,
    resolve_definition, run_pull, run_pulls,
};
use envseries_source::credentials::EnvCredentials;
use envseries_source_models::CatalogEndpoint;
use envseries_store::CsvSink;

#[derive(Parser)]
#[command(
    name = "envseries_ingest",
    about = "Environmental time-series ingestion tool"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one pull definition
    Pull {
        /// Built-in definition id (e.g., "`openaq_daily`") or path to a TOML file
        definition: String,
        /// Directory the table CSV is written to
        #[arg(long, default_value = "data")]
        out: PathBuf,
    },
    /// Run every built-in pull definition
    PullAll {
        /// Comma-separated list of definition ids to run (overrides `ENVSERIES_PULLS` env var)
        #[arg(long)]
        pulls: Option<String>,
        /// Directory the table CSVs are written to
        #[arg(long, default_value = "data")]
        out: PathBuf,
    },
    /// List the built-in pull definitions
    List,
    /// Export an NCDC catalog endpoint (e.g., "stations", "datatypes") to CSV
    Catalog {
        endpoint: String,
        /// Directory the catalog CSV is written to
        #[arg(long, default_value = "data")]
        out: PathBuf,
    },
    /// Export the `OpenAQ` locations and sensors around an `OpenAQ` definition's search area
    OpenaqCatalog {
        /// Built-in definition id or path to a TOML file
        #[arg(default_value = "openaq_daily")]
        definition: String,
        /// Directory the catalog CSVs are written to
        #[arg(long, default_value = "data")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = init_logger();
    let cli = Cli::parse();
    let credentials = EnvCredentials::from_env();

    match cli.command {
        Commands::List => {
            println!("{:<24} {:<10} NAME", "ID", "PROVIDER");
            println!("{}", "-".repeat(60));
            for definition in all_definitions() {
                println!(
                    "{:<24} {:<10} {}",
                    definition.id,
                    definition.provider(),
                    definition.name
                );
            }
        }
        Commands::Pull { definition, out } => {
            let definition = resolve_definition(&definition)?;
            let mut sink = CsvSink::new(out);
            let summary = run_pull(&definition, &credentials, &mut sink).await?;
            if summary.partial {
                log::warn!(
                    "Pull '{}' is incomplete: some pages were abandoned or capped",
                    summary.definition_id
                );
            }
        }
        Commands::PullAll { pulls, out } => {
            let start = Instant::now();
            let definitions = enabled_definitions(pulls);
            let mut sink = CsvSink::new(out);
            let progress = IndicatifProgress::pulls_bar(&multi, "Pulling");

            let summaries = run_pulls(&definitions, &credentials, &mut sink, &progress).await;

            let rows: u64 = summaries.iter().map(|s| s.rows_written).sum();
            let partial = summaries.iter().filter(|s| s.partial).count();
            log::info!(
                "Finished {}/{} pulls: {rows} rows ({partial} partial) in {:.1}s",
                summaries.len(),
                definitions.len(),
                start.elapsed().as_secs_f64()
            );

            if summaries.len() < definitions.len() {
                return Err(format!(
                    "{} of {} pulls failed",
                    definitions.len() - summaries.len(),
                    definitions.len()
                )
                .into());
            }
        }
        Commands::Catalog { endpoint, out } => {
            let endpoint: CatalogEndpoint = endpoint
                .parse()
                .map_err(|_| format!("Unknown NCDC catalog endpoint: {endpoint}"))?;
            let mut sink = CsvSink::new(out);
            let count =
                export_catalog(&credentials, endpoint, &FetchConfig::default(), &mut sink).await?;
            log::info!("Exported {count} {endpoint} records");
        }
        Commands::OpenaqCatalog { definition, out } => {
            let definition = resolve_definition(&definition)?;
            let mut sink = CsvSink::new(out);
            export_openaq_catalog(&definition, &credentials, &mut sink).await?;
        }
    }

    Ok(())
}
