//! Buffered study region, area cross-check and run summary.

use liveability_boundary::features;
use liveability_database::sql::{TablePlan, quote_literal};
use liveability_database::{DbError, catalog};
use liveability_region_models::config::RegionConfig;
use liveability_region_models::{DISPLAY_SRID, RegionSummary};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::Database;

use crate::RegionError;

/// Relative deviation above which the projected area is reported as
/// suspect.
pub const AREA_TOLERANCE: f64 = 0.01;

/// Plan that rebuilds the buffered study region from the study region.
#[must_use]
pub fn buffered_plan(config: &RegionConfig) -> TablePlan {
    let buffer = config.buffer_m;
    let srid = config.srid;
    TablePlan::replace(
        &config.buffered_table(),
        &format!(
            "SELECT \"Study region\",\n\
             db,\n\
             {label}::text AS \"Study region buffer\",\n\
             ST_Multi(ST_Transform(ST_Buffer(geom, {buffer}), {DISPLAY_SRID}))\
             ::geometry(MultiPolygon, {DISPLAY_SRID}) AS geom_4326,\n\
             ST_Multi(ST_Buffer(geom, {buffer}))::geometry(MultiPolygon, {srid}) AS geom\n\
             FROM {study_region}",
            label = quote_literal(&config.buffer_label()),
            study_region = config.tables.study_region,
        ),
    )
}

/// Drops and recreates the buffered study region.
///
/// # Errors
///
/// Returns [`RegionError`] if the plan fails; the previous table is kept.
pub async fn build_buffered_region(
    db: &dyn Database,
    config: &RegionConfig,
) -> Result<(), RegionError> {
    log::info!(
        "Creating {} buffered study region {}",
        config.buffer_label(),
        config.buffered_table()
    );
    catalog::apply_plan(db, &buffered_plan(config)).await?;
    Ok(())
}

/// Relative difference between the area measured in the working SRID and
/// the geodesic area. Zero when both are zero.
#[must_use]
pub fn area_deviation(projected_sqkm: f64, geodesic_sqkm: f64) -> f64 {
    if geodesic_sqkm == 0.0 {
        return if projected_sqkm == 0.0 { 0.0 } else { f64::INFINITY };
    }
    ((projected_sqkm - geodesic_sqkm) / geodesic_sqkm).abs()
}

/// Geodesic area in square kilometres of a `GeoJSON` geometry in 4326.
///
/// # Errors
///
/// Returns [`RegionError`] if the text is not a polygonal `GeoJSON`
/// geometry.
pub fn geodesic_area_sqkm(geojson: &str) -> Result<f64, RegionError> {
    let parsed = features::parse_geojson(geojson, "geom_4326")?;
    Ok(parsed
        .geometries
        .iter()
        .map(geo::GeodesicArea::geodesic_area_unsigned)
        .sum::<f64>()
        / 1_000_000.0)
}

/// Compares the stored `area_sqkm` with the geodesic area of `geom_4326`
/// and warns when they disagree by more than [`AREA_TOLERANCE`].
///
/// Returns the deviation found.
///
/// # Errors
///
/// Returns [`RegionError`] if the study region cannot be read back.
pub async fn check_area(db: &dyn Database, config: &RegionConfig) -> Result<f64, RegionError> {
    let rows = db
        .query_raw_params(
            &format!(
                "SELECT area_sqkm, ST_AsGeoJSON(geom_4326) AS geojson FROM {}",
                config.tables.study_region
            ),
            &[],
        )
        .await?;

    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: format!("{} has no rows", config.tables.study_region),
    })?;

    let projected: f64 = row.to_value("area_sqkm").map_err(|e| DbError::Conversion {
        message: format!("Failed to read area_sqkm: {e}"),
    })?;
    let geojson: String = row.to_value("geojson").map_err(|e| DbError::Conversion {
        message: format!("Failed to read geom_4326: {e}"),
    })?;

    let geodesic = geodesic_area_sqkm(&geojson)?;
    let deviation = area_deviation(projected, geodesic);

    if deviation > AREA_TOLERANCE {
        log::warn!(
            "Study region area in EPSG:{} ({projected:.3} sqkm) differs from its geodesic area \
             ({geodesic:.3} sqkm) by {:.1}%; EPSG:{} may not suit this region",
            config.srid,
            deviation * 100.0,
            config.srid
        );
    } else {
        log::debug!("Study region area {projected:.3} sqkm (geodesic {geodesic:.3} sqkm)");
    }

    Ok(deviation)
}

/// Reads back the areas and row counts of the region tables.
///
/// # Errors
///
/// Returns [`RegionError`] if a table is missing or a query fails.
pub async fn summarize(db: &dyn Database, config: &RegionConfig) -> Result<RegionSummary, RegionError> {
    let rows = db
        .query_raw_params(
            &format!(
                "SELECT s.\"Study region\" AS name, s.area_sqkm, \
                 ST_Area(b.geom) / 10^6 AS buffered_area_sqkm \
                 FROM {} s, {} b",
                config.tables.study_region,
                config.buffered_table()
            ),
            &[],
        )
        .await?;

    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: format!("{} has no rows", config.tables.study_region),
    })?;

    let name: String = row.to_value("name").unwrap_or_default();
    let area_sqkm: f64 = row.to_value("area_sqkm").unwrap_or(0.0);
    let buffered_area_sqkm: f64 = row.to_value("buffered_area_sqkm").unwrap_or(0.0);

    let urban = &config.tables.urban_study_region;
    let (urban_area_sqkm, urban_rows) = if catalog::table_exists(db, urban).await? {
        let rows = db
            .query_raw_params(
                &format!("SELECT SUM(ST_Area(geom)) / 10^6 AS area_sqkm FROM {urban}"),
                &[],
            )
            .await?;
        let area: Option<f64> = rows
            .first()
            .and_then(|r| r.to_value::<Option<f64>>("area_sqkm").ok())
            .flatten();
        (area, catalog::count_rows(db, urban).await?)
    } else {
        (None, 0)
    };

    Ok(RegionSummary {
        name,
        area_sqkm,
        buffered_area_sqkm,
        urban_area_sqkm,
        urban_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(buffer_m: f64) -> RegionConfig {
        let mut config = RegionConfig::parse(
            r#"
            name = "Testville"
            locale = "testville"
            srid = 32755
            boundary = "testville.geojson"
            buffer_m = 1000

            [database]
            name = "li_testville"
            user = "postgres"
            "#,
        )
        .unwrap();
        config.buffer_m = buffer_m;
        config
    }

    #[test]
    fn buffered_plan_rebuilds_with_label_and_both_projections() {
        let plan = buffered_plan(&config(10_000.0));
        assert_eq!(plan.table, "study_region_10000m");
        assert_eq!(plan.statements[0], "DROP TABLE IF EXISTS study_region_10000m");

        let create = &plan.statements[1];
        assert!(create.contains("'10 km'::text AS \"Study region buffer\""));
        assert!(create.contains("ST_Buffer(geom, 10000)"));
        assert!(create.contains("::geometry(MultiPolygon, 4326) AS geom_4326"));
        assert!(create.contains("::geometry(MultiPolygon, 32755) AS geom"));
        assert!(create.ends_with("FROM study_region"));
        assert_eq!(
            plan.statements[2],
            "CREATE INDEX study_region_10000m_gix ON study_region_10000m USING GIST (geom)"
        );
    }

    #[test]
    fn zero_buffer_is_still_built() {
        let plan = buffered_plan(&config(0.0));
        assert_eq!(plan.table, "study_region_0m");
        assert!(plan.statements[1].contains("'0 km'::text"));
    }

    #[test]
    fn buffered_plan_is_deterministic() {
        assert_eq!(buffered_plan(&config(1000.0)), buffered_plan(&config(1000.0)));
    }

    #[test]
    fn area_deviation_is_relative() {
        assert!((area_deviation(101.0, 100.0) - 0.01).abs() < 1e-12);
        assert!((area_deviation(95.0, 100.0) - 0.05).abs() < 1e-12);
        assert!(area_deviation(0.0, 0.0).abs() < f64::EPSILON);
        assert!(area_deviation(1.0, 0.0).is_infinite());
    }

    #[test]
    fn geodesic_area_of_a_small_square() {
        // 0.01 degree square at the equator, roughly 1.11 km on each side.
        let geojson = r#"{"type":"MultiPolygon","coordinates":[[[[0.0,0.0],[0.01,0.0],[0.01,0.01],[0.0,0.01],[0.0,0.0]]]]}"#;
        let area = geodesic_area_sqkm(geojson).unwrap();
        assert!((area - 1.2308).abs() < 0.01, "{area}");
    }

    #[test]
    fn geodesic_area_rejects_points() {
        assert!(geodesic_area_sqkm(r#"{"type":"Point","coordinates":[0.0,0.0]}"#).is_err());
    }
}
