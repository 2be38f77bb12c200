//! SQL for the covariate summary table.

use liveability_database::sql::{TablePlan, quote_ident, quote_literal};
use liveability_region_models::CovariateValue;
use liveability_region_models::config::RegionConfig;

/// Staging table for global dataset covariate attributes.
pub const URBAN_COVARIATE_SOURCE: &str = "urban_covariate_source";

/// Renders a covariate as a typed SQL literal.
///
/// Nulls are typed as `double precision` so the column type is stable
/// whether or not a value was found.
#[must_use]
pub fn covariate_literal(value: &CovariateValue) -> String {
    match value {
        CovariateValue::Number(n) => format!("{n}::double precision"),
        CovariateValue::Text(s) => format!("{}::text", quote_literal(s)),
        CovariateValue::Null => "NULL::double precision".to_string(),
    }
}

/// `SELECT` producing the summary row(s).
///
/// When `with_intersections` is false the intersection columns are typed
/// nulls rather than zero.
#[must_use]
pub fn summary_select(
    config: &RegionConfig,
    covariates: &[(String, CovariateValue)],
    with_intersections: bool,
) -> String {
    let mut sql = format!(
        "SELECT {continent}::text AS \"Continent\",\n\
         {country}::text AS \"Country\",\n\
         {code}::text AS \"ISO 3166-1 alpha-2\",\n\
         u.study_region AS \"City\",\n\
         u.area_sqkm AS \"Area (sqkm)\",\n\
         u.urban_pop_est AS \"Population estimate\",\n\
         u.pop_per_sqkm AS \"Population per sqkm\",\n",
        continent = quote_literal(&config.continent),
        country = quote_literal(&config.country),
        code = quote_literal(&config.country_code),
    );

    if with_intersections {
        sql.push_str(
            "i.intersections AS \"Intersections\",\n\
             i.intersections::double precision / NULLIF(u.area_sqkm, 0) AS \"Intersections per sqkm\"",
        );
    } else {
        sql.push_str(
            "NULL::bigint AS \"Intersections\",\n\
             NULL::double precision AS \"Intersections per sqkm\"",
        );
    }

    for (name, value) in covariates {
        sql.push_str(&format!(",\n{} AS {}", covariate_literal(value), quote_ident(name)));
    }

    sql.push_str(&format!("\nFROM {} u", config.tables.population));

    if with_intersections {
        sql.push_str(&format!(
            "\nLEFT JOIN LATERAL (\n\
             SELECT COUNT(c.geom) AS intersections\n\
             FROM {} c\n\
             WHERE ST_Intersects(u.geom, c.geom)\n\
             ) i ON true",
            config.tables.intersections
        ));
    }

    sql
}

/// Plan replacing the covariate summary table.
#[must_use]
pub fn summary_plan(
    config: &RegionConfig,
    covariates: &[(String, CovariateValue)],
    with_intersections: bool,
) -> TablePlan {
    TablePlan::replace_attributes(
        &config.tables.covariates,
        &summary_select(config, covariates, with_intersections),
    )
}

/// Reads the summary table back with fixed aliases. Covariates are read
/// as text, aliased `cov_{index}`.
#[must_use]
pub fn summary_readback(config: &RegionConfig) -> String {
    let mut sql = "SELECT \"Continent\" AS continent,\n\
                   \"Country\" AS country,\n\
                   \"ISO 3166-1 alpha-2\" AS country_code,\n\
                   \"City\"::text AS city,\n\
                   \"Area (sqkm)\"::double precision AS area_sqkm,\n\
                   \"Population estimate\"::double precision AS population,\n\
                   \"Population per sqkm\"::double precision AS population_per_sqkm,\n\
                   \"Intersections\"::bigint AS intersections,\n\
                   \"Intersections per sqkm\"::double precision AS intersections_per_sqkm"
        .to_string();

    for (i, name) in config.covariates.fields.iter().enumerate() {
        sql.push_str(&format!(",\n{}::text AS cov_{i}", quote_ident(name)));
    }

    sql.push_str(&format!("\nFROM {}", config.tables.covariates));
    sql
}

/// Column names of `$1` in the current schema.
pub const TABLE_COLUMNS: &str = "SELECT column_name::text AS column_name \
     FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name = $1";

/// Reads `columns` as text from the first staged global dataset row,
/// aliased `cov_{index}` in the order given.
#[must_use]
pub fn staged_covariates(columns: &[&str]) -> String {
    let selected = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}::text AS cov_{i}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {selected} FROM {URBAN_COVARIATE_SOURCE} LIMIT 1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RegionConfig {
        RegionConfig::parse(
            r#"
            name = "Testville"
            locale = "testville"
            srid = 32755
            boundary = "testville.geojson"
            buffer_m = 1000
            continent = "Oceania"
            country = "Australia"
            country_code = "AU"

            [covariates]
            fields = ["E_EC2E_E15", "climate"]

            [database]
            name = "li_testville"
            user = "postgres"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn literals_are_typed() {
        assert_eq!(
            covariate_literal(&CovariateValue::Number(12.5)),
            "12.5::double precision"
        );
        assert_eq!(
            covariate_literal(&CovariateValue::Text("Cfb".to_string())),
            "'Cfb'::text"
        );
        assert_eq!(
            covariate_literal(&CovariateValue::Text("it's".to_string())),
            "'it''s'::text"
        );
        assert_eq!(covariate_literal(&CovariateValue::Null), "NULL::double precision");
    }

    #[test]
    fn counts_intersections_per_region_with_safe_density() {
        let sql = summary_select(&config(), &[], true);
        assert!(sql.starts_with("SELECT 'Oceania'::text AS \"Continent\""));
        assert!(sql.contains("'AU'::text AS \"ISO 3166-1 alpha-2\""));
        assert!(sql.contains("u.study_region AS \"City\""));
        assert!(sql.contains("/ NULLIF(u.area_sqkm, 0) AS \"Intersections per sqkm\""));
        assert!(sql.contains("FROM urban_study_region_pop u\nLEFT JOIN LATERAL"));
        assert!(sql.contains("FROM clean_intersections_12m c"));
        assert!(sql.contains("WHERE ST_Intersects(u.geom, c.geom)"));
        assert!(sql.ends_with(") i ON true"));
    }

    #[test]
    fn missing_intersections_are_null_not_zero() {
        let sql = summary_select(&config(), &[], false);
        assert!(sql.contains("NULL::bigint AS \"Intersections\""));
        assert!(sql.contains("NULL::double precision AS \"Intersections per sqkm\""));
        assert!(!sql.contains("clean_intersections_12m"));
        assert!(sql.ends_with("FROM urban_study_region_pop u"));
    }

    #[test]
    fn covariates_follow_fixed_columns_in_order() {
        let covariates = vec![
            ("E_EC2E_E15".to_string(), CovariateValue::Number(3.0)),
            ("climate".to_string(), CovariateValue::Null),
        ];
        let sql = summary_select(&config(), &covariates, true);
        let first = sql.find("3::double precision AS \"E_EC2E_E15\"").unwrap();
        let second = sql.find("NULL::double precision AS \"climate\"").unwrap();
        let intersections = sql.find("AS \"Intersections per sqkm\"").unwrap();
        assert!(intersections < first && first < second);
    }

    #[test]
    fn summary_table_has_no_spatial_index() {
        let plan = summary_plan(&config(), &[], true);
        assert_eq!(plan.table, "urban_covariates");
        assert_eq!(plan.statements.len(), 2);
        assert_eq!(plan.statements[0], "DROP TABLE IF EXISTS urban_covariates");
    }

    #[test]
    fn readback_aliases_covariates_by_position() {
        let sql = summary_readback(&config());
        assert!(sql.contains("\"E_EC2E_E15\"::text AS cov_0"));
        assert!(sql.contains("\"climate\"::text AS cov_1"));
        assert!(sql.ends_with("FROM urban_covariates"));
    }

    #[test]
    fn staged_covariates_read_first_row_as_text() {
        assert_eq!(
            staged_covariates(&["e_ec2e_e15", "e_ec2o_e15"]),
            "SELECT \"e_ec2e_e15\"::text AS cov_0, \"e_ec2o_e15\"::text AS cov_1 \
             FROM urban_covariate_source LIMIT 1"
        );
    }
}
