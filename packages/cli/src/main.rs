#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI for study region runs.
//!
//! ```text
//! liveability --config region.toml study-region [--refresh-urban]
//! liveability --config region.toml covariates
//! liveability --config region.toml all [--refresh-urban]
//! ```
//!
//! Log verbosity follows `RUST_LOG`. Each completed stage is recorded in
//! the run log table.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use liveability_boundary::import::Ogr2Ogr;
use liveability_database::run_log::{self, RunLogEntry};
use liveability_region_models::config::RegionConfig;
use switchy_database::Database;

#[derive(Parser)]
#[command(
    name = "liveability",
    about = "Define a study region and summarize its urban covariates"
)]
struct Cli {
    /// Region configuration file
    #[arg(long, short, default_value = "region.toml")]
    config: PathBuf,

    /// `ogr2ogr` executable used for vector imports
    #[arg(long, default_value = "ogr2ogr")]
    ogr2ogr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the study region, buffered study region and urban study region
    StudyRegion {
        /// Rebuild the urban region even if a previous run left one behind
        #[arg(long)]
        refresh_urban: bool,
    },
    /// Create the urban covariates summary
    Covariates,
    /// Run the study region stage, then the covariates stage
    All {
        /// Rebuild the urban region even if a previous run left one behind
        #[arg(long)]
        refresh_urban: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let mut config = RegionConfig::load(&cli.config)?;
    if let Commands::StudyRegion { refresh_urban: true } | Commands::All { refresh_urban: true } =
        cli.command
    {
        config.refresh_urban_region = true;
    }

    let db = liveability_database::db::connect(&config.database).await?;
    let importer = Ogr2Ogr::new(&cli.ogr2ogr, &config.database);

    match cli.command {
        Commands::StudyRegion { .. } => study_region(db.as_ref(), &config, &importer).await?,
        Commands::Covariates => covariates(db.as_ref(), &config, &importer).await?,
        Commands::All { .. } => {
            study_region(db.as_ref(), &config, &importer).await?;
            covariates(db.as_ref(), &config, &importer).await?;
        }
    }

    Ok(())
}

async fn study_region(
    db: &dyn Database,
    config: &RegionConfig,
    importer: &Ogr2Ogr,
) -> Result<(), Box<dyn std::error::Error>> {
    let entry = RunLogEntry::start(
        "study_region",
        "Create study region boundary, buffer and urban study region",
        &config.locale,
    );

    let summary = liveability_region::run(db, config, importer).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    run_log::record(db, &config.tables.run_log, &entry).await?;
    Ok(())
}

async fn covariates(
    db: &dyn Database,
    config: &RegionConfig,
    importer: &Ogr2Ogr,
) -> Result<(), Box<dyn std::error::Error>> {
    let entry = RunLogEntry::start(
        "urban_covariates",
        "Create layer of additional urban study region covariates",
        &config.locale,
    );

    let summaries = liveability_covariates::aggregate(db, config, importer).await?;
    println!("{}", serde_json::to_string_pretty(&summaries)?);

    run_log::record(db, &config.tables.run_log, &entry).await?;
    Ok(())
}
