#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Study region configuration and summary types.
//!
//! These types describe one study region run: where its boundary comes
//! from, how the urban portion is resolved, which covariates are attached,
//! and the summary rows read back from the spatial store afterwards.

pub mod config;
pub mod source;

use serde::{Deserialize, Serialize};

/// EPSG code of the display (longitude/latitude) projection.
pub const DISPLAY_SRID: u32 = 4326;

/// Fixed columns of the covariate summary table, in order.
pub const SUMMARY_COLUMNS: [&str; 9] = [
    "Continent",
    "Country",
    "ISO 3166-1 alpha-2",
    "City",
    "Area (sqkm)",
    "Population estimate",
    "Population per sqkm",
    "Intersections",
    "Intersections per sqkm",
];

/// Area and row counts for the region tables after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSummary {
    /// Full study region name.
    pub name: String,
    /// Study region area in square kilometres.
    pub area_sqkm: f64,
    /// Buffered study region area in square kilometres.
    pub buffered_area_sqkm: f64,
    /// Urban study region area in square kilometres, if any rows exist.
    pub urban_area_sqkm: Option<f64>,
    /// Number of rows in the urban study region table.
    pub urban_rows: u64,
}

/// A single externally supplied covariate value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CovariateValue {
    /// Numeric value.
    Number(f64),
    /// Free-text value.
    Text(String),
    /// Missing value. Never coerced to zero.
    Null,
}

impl CovariateValue {
    /// Parses a raw cell. Blank cells and the usual missing-data markers
    /// (`nan`, `NA`, `NULL`) become [`CovariateValue::Null`].
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || ["nan", "na", "null", "none"]
                .iter()
                .any(|m| trimmed.eq_ignore_ascii_case(m))
        {
            return Self::Null;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Self::Number(n),
            Ok(_) => Self::Null,
            Err(_) => Self::Text(trimmed.to_string()),
        }
    }

    /// Returns `true` for [`CovariateValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// The summary row written to the urban covariates table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrbanCovariateSummary {
    /// Continent label from configuration.
    pub continent: String,
    /// Country label from configuration.
    pub country: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country_code: String,
    /// Study region name.
    pub city: String,
    /// Urban area in square kilometres.
    pub area_sqkm: Option<f64>,
    /// Population estimate for the urban area.
    pub population: Option<f64>,
    /// Population per square kilometre.
    pub population_per_sqkm: Option<f64>,
    /// Street intersections inside the urban area.
    pub intersections: Option<i64>,
    /// Street intersections per square kilometre.
    pub intersections_per_sqkm: Option<f64>,
    /// Requested covariates in request order.
    pub covariates: Vec<(String, CovariateValue)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covariate_missing_markers_are_null() {
        for raw in ["", "  ", "nan", "NaN", "NA", "null", "None"] {
            assert_eq!(CovariateValue::parse(raw), CovariateValue::Null, "{raw:?}");
        }
    }

    #[test]
    fn covariate_numbers_and_text() {
        assert_eq!(CovariateValue::parse(" 42.5 "), CovariateValue::Number(42.5));
        assert_eq!(CovariateValue::parse("0"), CovariateValue::Number(0.0));
        assert_eq!(
            CovariateValue::parse("Temperate"),
            CovariateValue::Text("Temperate".to_string())
        );
        assert_eq!(CovariateValue::parse("inf"), CovariateValue::Null);
    }
}
