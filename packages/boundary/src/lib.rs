#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Study region boundary resolution.
//!
//! A boundary descriptor is turned into a single multipolygon row in the
//! study region table. `GeoJSON` inputs are read natively; anything else
//! goes through a [`import::VectorImporter`] into a staging table first.
//! Global dataset boundaries also produce the urban region, since the two
//! are the same extent.

pub mod features;
pub mod import;
pub mod plan;

use std::path::Path;

use liveability_database::{DbError, catalog};
use liveability_region_models::config::{ConfigError, RegionConfig};
use liveability_region_models::source::{AttributeFilter, BoundarySource};
use switchy_database::{Database, DatabaseValue};

use crate::features::BoundaryFeatures;
use crate::import::{ImportError, ImportRequest, VectorImporter};
use crate::plan::{FULL_URBAN_REGION, STUDY_REGION_SOURCE};

/// Errors that can occur while building the study region boundary.
#[derive(Debug, thiserror::Error)]
pub enum BoundaryError {
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

    /// A boundary file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File (or archive member) path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A boundary file was read but could not be decoded.
    #[error("Failed to decode {path}: {message}")]
    Unreadable {
        /// File (or archive member) path.
        path: String,
        /// Decoder message.
        message: String,
    },

    /// A boundary file holds a non-polygonal geometry.
    #[error("{path} contains a {kind} geometry; study region boundaries must be polygonal")]
    UnsupportedGeometry {
        /// File (or archive member) path.
        path: String,
        /// Geometry type found.
        kind: &'static str,
    },

    /// A boundary file holds no geometries.
    #[error("{path} contains no boundary geometries")]
    Empty {
        /// File (or archive member) path.
        path: String,
    },

    /// The global dataset filter matched nothing.
    #[error("No global dataset features match {filter}")]
    NoMatchingFeatures {
        /// The filter as configured.
        filter: String,
    },

    /// A `GeoJSON` geometry could not be serialized for staging.
    #[error("Failed to serialize geometry: {0}")]
    Json(#[from] serde_json::Error),
}

/// Builds the study region table from the configured boundary.
///
/// For a global dataset boundary the urban region table is built first
/// and the study region derived from it. Staging tables are dropped on
/// success and, best effort, on failure.
///
/// # Errors
///
/// Returns [`BoundaryError`] if the descriptor is invalid, an input file
/// is missing or unreadable, an import fails, or a store statement fails.
pub async fn build_study_region_boundary(
    db: &dyn Database,
    config: &RegionConfig,
    importer: &dyn VectorImporter,
) -> Result<BoundarySource, BoundaryError> {
    let source = config.boundary_source()?;
    log::info!("Resolving study region boundary for {}", config.name);

    let result = match &source {
        BoundarySource::GlobalDataset(filter) => from_global_dataset(db, config, importer, filter).await,
        BoundarySource::ZipArchive(path) => from_zip(db, config, importer, path).await,
        BoundarySource::GeoPackageLayer { path, layer } => {
            ensure_exists(path)?;
            let request = ImportRequest::new(path.display().to_string(), STUDY_REGION_SOURCE)
                .with_layer(layer)
                .promoted_to_multi();
            from_import(db, config, importer, &request).await
        }
        BoundarySource::VectorFile(path) => {
            ensure_exists(path)?;
            if features::is_geojson_path(path) {
                let features = features::read_geojson_file(path)?;
                from_features(db, config, &features, &path.display().to_string()).await
            } else {
                let request = ImportRequest::new(path.display().to_string(), STUDY_REGION_SOURCE)
                    .promoted_to_multi();
                from_import(db, config, importer, &request).await
            }
        }
    };

    if result.is_err() {
        for staging in [FULL_URBAN_REGION, STUDY_REGION_SOURCE] {
            if let Err(e) = catalog::drop_if_exists(db, staging).await {
                log::warn!("Failed to drop staging table {staging}: {e}");
            }
        }
    }

    result.map(|()| source)
}

async fn from_global_dataset(
    db: &dyn Database,
    config: &RegionConfig,
    importer: &dyn VectorImporter,
    filter: &AttributeFilter,
) -> Result<(), BoundaryError> {
    let path = config.urban_extent_path().ok_or(ConfigError::Invalid {
        field: "urban_extent",
        message: "a GHS: boundary requires [urban_extent] to locate the global dataset".to_string(),
    })?;
    ensure_exists(&path)?;

    log::info!("Selecting global dataset features where {filter}");
    let request = ImportRequest::new(path.display().to_string(), FULL_URBAN_REGION)
        .with_filter(filter.to_ogr_where());
    importer.import(&request)?;

    let matched = catalog::count_rows(db, FULL_URBAN_REGION).await?;
    if matched == 0 {
        return Err(BoundaryError::NoMatchingFeatures {
            filter: filter.to_string(),
        });
    }
    log::debug!("{matched} global dataset feature(s) matched");

    catalog::apply_plan(db, &plan::urban_region_from_global(config)).await?;
    catalog::apply_plan(db, &plan::study_region_from_urban(config)).await?;
    Ok(())
}

async fn from_zip(
    db: &dyn Database,
    config: &RegionConfig,
    importer: &dyn VectorImporter,
    path: &Path,
) -> Result<(), BoundaryError> {
    ensure_exists(path)?;

    if let Some(features) = features::read_geojson_from_zip(path)? {
        return from_features(db, config, &features, &path.display().to_string()).await;
    }

    let request = ImportRequest::from_zip(path, STUDY_REGION_SOURCE).promoted_to_multi();
    from_import(db, config, importer, &request).await
}

async fn from_import(
    db: &dyn Database,
    config: &RegionConfig,
    importer: &dyn VectorImporter,
    request: &ImportRequest,
) -> Result<(), BoundaryError> {
    importer.import(request)?;

    if catalog::count_rows(db, STUDY_REGION_SOURCE).await? == 0 {
        return Err(BoundaryError::Empty {
            path: request.source.clone(),
        });
    }

    catalog::apply_plan(db, &plan::study_region_from_staging(config)).await?;
    Ok(())
}

async fn from_features(
    db: &dyn Database,
    config: &RegionConfig,
    features: &BoundaryFeatures,
    origin: &str,
) -> Result<(), BoundaryError> {
    let srid = staging_srid(features, origin)?;
    log::info!(
        "Staging {} boundary feature(s) in EPSG:{}",
        features.geometries.len(),
        features.srid
    );

    let geometries = features
        .geometries
        .iter()
        .map(features::to_geojson_string)
        .collect::<Result<Vec<_>, _>>()?;

    let insert = plan::insert_staged_feature(STUDY_REGION_SOURCE);

    let txn = db.begin_transaction().await?;
    let staged = async {
        for sql in plan::create_staging(STUDY_REGION_SOURCE) {
            txn.exec_raw(&sql).await?;
        }
        for geometry in geometries {
            txn.exec_raw_params(
                &insert,
                &[DatabaseValue::String(geometry), DatabaseValue::Int32(srid)],
            )
            .await?;
        }
        Ok::<_, switchy_database::DatabaseError>(())
    }
    .await;

    if let Err(e) = staged {
        txn.rollback().await?;
        return Err(e.into());
    }
    txn.commit().await?;

    catalog::apply_plan(db, &plan::study_region_from_staging(config)).await?;
    Ok(())
}

/// SRID of `features` as stored in the geometry column.
fn staging_srid(features: &BoundaryFeatures, origin: &str) -> Result<i32, BoundaryError> {
    i32::try_from(features.srid).map_err(|_| BoundaryError::Unreadable {
        path: origin.to_string(),
        message: format!("EPSG:{} is not a valid SRID", features.srid),
    })
}

fn ensure_exists(path: &Path) -> Result<(), BoundaryError> {
    if path.exists() {
        Ok(())
    } else {
        Err(BoundaryError::Io {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
        })
    }
}
