#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Study region definition.
//!
//! Builds, in order, the study region boundary, its buffered copy and the
//! urban study region, then reads back a [`RegionSummary`].

pub mod builder;
pub mod urban;

use liveability_boundary::BoundaryError;
use liveability_boundary::import::{ImportError, VectorImporter};
use liveability_database::DbError;
use liveability_region_models::RegionSummary;
use liveability_region_models::config::{ConfigError, RegionConfig};
use switchy_database::Database;

/// Errors that can occur while building a study region.
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Boundary resolution error.
    #[error(transparent)]
    Boundary(#[from] BoundaryError),

    /// Vector import error.
    #[error(transparent)]
    Import(#[from] ImportError),

    /// Database error.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Raw store error outside a table plan.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// A configured input file does not exist.
    #[error("Input file not found: {path}")]
    MissingInput {
        /// Resolved path.
        path: String,
    },

    /// Intersection mode needs an urban region and none was found or built.
    #[error(
        "Cannot intersect with {table}: the table does not exist and no [urban_extent] \
         is configured to build it (set not_urban_intersection to treat the whole \
         study region as urban)"
    )]
    MissingUrbanRegion {
        /// Urban region table name.
        table: String,
    },

    /// An input to the intersection has invalid geometry.
    #[error("{table} has {count} invalid geometr(y/ies); fix them before intersecting")]
    InvalidGeometry {
        /// Table checked.
        table: String,
        /// Number of invalid rows.
        count: u64,
    },
}

/// Runs the full study region stage: boundary, buffer, area check and
/// urban resolution.
///
/// # Errors
///
/// Returns [`RegionError`] from the first stage that fails. Earlier
/// stages' tables are left in place.
pub async fn run(
    db: &dyn Database,
    config: &RegionConfig,
    importer: &dyn VectorImporter,
) -> Result<RegionSummary, RegionError> {
    let source = liveability_boundary::build_study_region_boundary(db, config, importer).await?;
    log::debug!("Study region boundary built from {source:?}");

    builder::check_area(db, config).await?;
    builder::build_buffered_region(db, config).await?;

    let policy = urban::resolve(db, &source, config, importer).await?;

    let summary = builder::summarize(db, config).await?;
    log::info!(
        "{}: {:.2} sqkm, buffered {:.2} sqkm, urban {} ({policy})",
        summary.name,
        summary.area_sqkm,
        summary.buffered_area_sqkm,
        summary
            .urban_area_sqkm
            .map_or_else(|| "n/a".to_string(), |a| format!("{a:.2} sqkm")),
    );

    Ok(summary)
}
