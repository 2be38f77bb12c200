#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Urban covariate summary.
//!
//! Produces one row per study region combining the precomputed urban
//! population, a street intersection count and density, and any
//! externally supplied covariates. Absent inputs become nulls with a
//! warning; the population table is the only hard requirement.

pub mod csv_source;
pub mod query;

use liveability_boundary::import::{ImportError, ImportRequest, VectorImporter};
use liveability_database::{DbError, catalog};
use liveability_region_models::config::{ConfigError, RegionConfig};
use liveability_region_models::source::{AttributeFilter, CovariateSource};
use liveability_region_models::{CovariateValue, UrbanCovariateSummary};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::query::URBAN_COVARIATE_SOURCE;

/// Errors that can occur while building the covariate summary.
#[derive(Debug, thiserror::Error)]
pub enum CovariateError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Database error.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Raw store error outside a table plan.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// Vector import error.
    #[error(transparent)]
    Import(#[from] ImportError),

    /// A covariate file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A covariate file is not valid CSV.
    #[error("Failed to parse {path}: {source}")]
    Csv {
        /// File path.
        path: String,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// The urban population table does not exist.
    #[error("Population table {table} does not exist; build the urban population first")]
    MissingPopulation {
        /// Expected table name.
        table: String,
    },
}

/// Resolves the requested covariates from the configured source, in
/// request order.
///
/// # Errors
///
/// Returns [`CovariateError`] if the source is malformed, the CSV cannot
/// be read, or the global dataset import fails.
pub async fn resolve_covariates(
    db: &dyn Database,
    config: &RegionConfig,
    importer: &dyn VectorImporter,
) -> Result<Vec<(String, CovariateValue)>, CovariateError> {
    let fields = &config.covariates.fields;
    if fields.is_empty() {
        return Ok(Vec::new());
    }

    match config.covariate_source()? {
        CovariateSource::GlobalDataset(filter) => {
            let result = from_global_dataset(db, config, importer, &filter).await;
            if let Err(e) = catalog::drop_if_exists(db, URBAN_COVARIATE_SOURCE).await {
                log::warn!("Failed to drop staging table {URBAN_COVARIATE_SOURCE}: {e}");
            }
            result
        }
        CovariateSource::Csv(path) => csv_source::read_csv(&path, fields),
        CovariateSource::Unset => {
            log::warn!(
                "No covariate source configured for {}; {} covariate(s) will be null",
                config.name,
                fields.len()
            );
            Ok(nulls(fields))
        }
    }
}

fn nulls(fields: &[String]) -> Vec<(String, CovariateValue)> {
    fields
        .iter()
        .map(|f| (f.clone(), CovariateValue::Null))
        .collect()
}

async fn from_global_dataset(
    db: &dyn Database,
    config: &RegionConfig,
    importer: &dyn VectorImporter,
    filter: &AttributeFilter,
) -> Result<Vec<(String, CovariateValue)>, CovariateError> {
    let path = config.urban_extent_path().ok_or(ConfigError::Invalid {
        field: "covariates.source",
        message: "GHS: covariates require [urban_extent] to locate the global dataset".to_string(),
    })?;

    log::info!("Reading covariates from the global dataset where {filter}");
    importer.import(
        &ImportRequest::new(path.display().to_string(), URBAN_COVARIATE_SOURCE)
            .with_filter(filter.to_ogr_where()),
    )?;

    let rows = db
        .query_raw_params(
            query::TABLE_COLUMNS,
            &[DatabaseValue::String(URBAN_COVARIATE_SOURCE.to_string())],
        )
        .await?;
    let available: Vec<String> = rows
        .iter()
        .filter_map(|r| r.to_value::<String>("column_name").ok())
        .collect();

    let fields = &config.covariates.fields;
    let matched: Vec<(usize, &str)> = fields
        .iter()
        .enumerate()
        .filter_map(|(i, field)| {
            let column = match_column(&available, field);
            if column.is_none() {
                log::warn!("Global dataset has no `{field}` attribute; using null");
            }
            column.map(|c| (i, c))
        })
        .collect();

    let mut values = nulls(fields);
    if matched.is_empty() {
        return Ok(values);
    }

    let columns: Vec<&str> = matched.iter().map(|(_, c)| *c).collect();
    let rows = db.query_raw_params(&query::staged_covariates(&columns), &[]).await?;
    let Some(row) = rows.first() else {
        log::warn!("No global dataset feature matches {filter}; covariates will be null");
        return Ok(values);
    };

    for (alias, (i, _)) in matched.iter().enumerate() {
        let raw: Option<String> = row
            .to_value::<Option<String>>(&format!("cov_{alias}"))
            .unwrap_or(None);
        let value = raw.as_deref().map_or(CovariateValue::Null, CovariateValue::parse);
        if value.is_null() {
            log::warn!("`{}` is missing for {filter}; using null", fields[*i]);
        }
        values[*i].1 = value;
    }

    Ok(values)
}

/// Finds the staged column for a requested field. Importers may fold
/// attribute names to lower case.
fn match_column<'a>(available: &'a [String], field: &str) -> Option<&'a str> {
    available
        .iter()
        .find(|c| *c == field)
        .or_else(|| available.iter().find(|c| c.eq_ignore_ascii_case(field)))
        .map(String::as_str)
}

/// Builds the covariate summary table and reads it back.
///
/// # Errors
///
/// Returns [`CovariateError`] if the population table is missing, the
/// covariates cannot be resolved, or a store statement fails.
pub async fn aggregate(
    db: &dyn Database,
    config: &RegionConfig,
    importer: &dyn VectorImporter,
) -> Result<Vec<UrbanCovariateSummary>, CovariateError> {
    let population = &config.tables.population;
    if !catalog::table_exists(db, population).await? {
        return Err(CovariateError::MissingPopulation {
            table: population.clone(),
        });
    }

    let intersections = &config.tables.intersections;
    let with_intersections = catalog::table_exists(db, intersections).await?;
    if !with_intersections {
        log::warn!("{intersections} does not exist; intersection counts will be null");
    }

    let covariates = resolve_covariates(db, config, importer).await?;

    catalog::apply_plan(
        db,
        &query::summary_plan(config, &covariates, with_intersections),
    )
    .await?;

    let summaries = read_summaries(db, config).await?;
    for summary in &summaries {
        log::info!(
            "{}: population {}, intersections {} ({} per sqkm)",
            summary.city,
            display(summary.population),
            display(summary.intersections),
            display(summary.intersections_per_sqkm),
        );
    }

    Ok(summaries)
}

fn display<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "null".to_string(), |v| v.to_string())
}

async fn read_summaries(
    db: &dyn Database,
    config: &RegionConfig,
) -> Result<Vec<UrbanCovariateSummary>, CovariateError> {
    let rows = db
        .query_raw_params(&query::summary_readback(config), &[])
        .await?;

    Ok(rows
        .iter()
        .map(|row| UrbanCovariateSummary {
            continent: row.to_value("continent").unwrap_or_default(),
            country: row.to_value("country").unwrap_or_default(),
            country_code: row.to_value("country_code").unwrap_or_default(),
            city: row.to_value("city").unwrap_or_default(),
            area_sqkm: row.to_value("area_sqkm").unwrap_or(None),
            population: row.to_value("population").unwrap_or(None),
            population_per_sqkm: row.to_value("population_per_sqkm").unwrap_or(None),
            intersections: row.to_value("intersections").unwrap_or(None),
            intersections_per_sqkm: row.to_value("intersections_per_sqkm").unwrap_or(None),
            covariates: config
                .covariates
                .fields
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let raw: Option<String> = row.to_value(&format!("cov_{i}")).unwrap_or(None);
                    (
                        name.clone(),
                        raw.as_deref().map_or(CovariateValue::Null, CovariateValue::parse),
                    )
                })
                .collect(),
        })
        .collect())
}
