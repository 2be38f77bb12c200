//! Table plans for the study region boundary.

use liveability_database::sql::{TablePlan, drop_table, quote_literal};
use liveability_region_models::DISPLAY_SRID;
use liveability_region_models::config::RegionConfig;

/// Staging table for global dataset features.
pub const FULL_URBAN_REGION: &str = "full_urban_region";

/// Staging table for user-supplied boundary features.
pub const STUDY_REGION_SOURCE: &str = "study_region_source";

/// Unions every geometry of `source` into one multipolygon in `srid`,
/// keeping only polygon parts.
#[must_use]
pub fn union_to_multipolygon(source: &str, srid: u32) -> String {
    format!(
        "SELECT ST_Multi(ST_CollectionExtract(ST_Union(ST_Transform(geom, {srid})), 3))\
         ::geometry(MultiPolygon, {srid}) AS geom\n\
         FROM {source}"
    )
}

/// Columns shared by the study region and its derivatives.
fn study_region_select(config: &RegionConfig, geom_source: &str) -> String {
    format!(
        "SELECT {name}::text AS \"Study region\",\n\
         {db}::text AS db,\n\
         ST_Area(u.geom) / 10^6 AS area_sqkm,\n\
         ST_Transform(u.geom, {DISPLAY_SRID})::geometry(MultiPolygon, {DISPLAY_SRID}) AS geom_4326,\n\
         u.geom\n\
         FROM ({geom_source}) u",
        name = quote_literal(&config.name),
        db = quote_literal(&config.database.name),
    )
}

/// Creates a geometry-only staging table for natively read features.
#[must_use]
pub fn create_staging(table: &str) -> Vec<String> {
    vec![
        drop_table(table),
        format!("CREATE TABLE {table} (geom geometry)"),
    ]
}

/// Insert statement for one staged feature: `$1` is the `GeoJSON`
/// geometry, `$2` its SRID.
#[must_use]
pub fn insert_staged_feature(table: &str) -> String {
    format!("INSERT INTO {table} (geom) VALUES (ST_SetSRID(ST_GeomFromGeoJSON($1), $2))")
}

/// Builds the study region from staged user-supplied features and drops
/// the staging table.
#[must_use]
pub fn study_region_from_staging(config: &RegionConfig) -> TablePlan {
    let union = union_to_multipolygon(STUDY_REGION_SOURCE, config.srid);
    TablePlan::replace(
        &config.tables.study_region,
        &study_region_select(config, &union),
    )
    .then(drop_table(STUDY_REGION_SOURCE))
}

/// Builds the urban region from staged global dataset features and drops
/// the staging table.
#[must_use]
pub fn urban_region_from_global(config: &RegionConfig) -> TablePlan {
    TablePlan::replace(
        &config.tables.urban_region,
        &union_to_multipolygon(FULL_URBAN_REGION, config.srid),
    )
    .then(drop_table(FULL_URBAN_REGION))
}

/// Builds the study region from the urban region. Used when the boundary
/// is taken from the global dataset, so both tables describe the same
/// extent.
#[must_use]
pub fn study_region_from_urban(config: &RegionConfig) -> TablePlan {
    let geom = format!("SELECT geom FROM {}", config.tables.urban_region);
    TablePlan::replace(
        &config.tables.study_region,
        &study_region_select(config, &geom),
    )
}
