//! Boundary and covariate source descriptors.
//!
//! A descriptor is the raw string from the region config. It either names
//! the global urban-settlement dataset with an attribute filter
//! (`GHS:UC_NM_MN=Baltimore`) or points at a local vector file, archive or
//! geopackage layer.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::ConfigError;

/// Prefix marking the global urban-settlement dataset.
pub const GLOBAL_DATASET_PREFIX: &str = "GHS:";

/// Expected shape of a global dataset descriptor, shown in errors.
pub const GLOBAL_DATASET_SYNTAX: &str = "GHS:field=value, e.g. GHS:UC_NM_MN=Baltimore";

/// An equality filter on a single attribute of the global dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeFilter {
    /// Attribute (column) name.
    pub field: String,
    /// Value the attribute must equal.
    pub value: String,
}

impl AttributeFilter {
    /// Parses `field=value`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::GlobalQuery`] if there is no `=` or either
    /// side is empty.
    pub fn parse(descriptor: &str, query: &str) -> Result<Self, ConfigError> {
        let malformed = || ConfigError::GlobalQuery {
            descriptor: descriptor.to_string(),
            expected: GLOBAL_DATASET_SYNTAX,
        };

        let (field, value) = query.split_once('=').ok_or_else(malformed)?;
        let field = field.trim();
        let value = value.trim();
        if field.is_empty() || value.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            field: field.to_string(),
            value: value.to_string(),
        })
    }

    /// Renders the filter as an OGR SQL `WHERE` predicate.
    ///
    /// Numeric values are left bare; everything else becomes a quoted
    /// string literal.
    #[must_use]
    pub fn to_ogr_where(&self) -> String {
        let field = self.field.replace('"', "\"\"");
        if self.value.parse::<f64>().is_ok_and(f64::is_finite) {
            format!("\"{field}\" = {}", self.value)
        } else {
            format!("\"{field}\" = '{}'", self.value.replace('\'', "''"))
        }
    }
}

impl fmt::Display for AttributeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.field, self.value)
    }
}

/// Where the study region boundary comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundarySource {
    /// Features of the global urban-settlement dataset matching a filter.
    GlobalDataset(AttributeFilter),
    /// A compressed archive holding a vector dataset.
    ZipArchive(PathBuf),
    /// A named layer inside a geopackage.
    GeoPackageLayer {
        /// Path to the `.gpkg` file.
        path: PathBuf,
        /// Layer name.
        layer: String,
    },
    /// Any other vector file.
    VectorFile(PathBuf),
}

impl BoundarySource {
    /// Parses a boundary descriptor. Relative paths are resolved against
    /// `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the descriptor is empty or a global
    /// dataset query is malformed.
    pub fn parse(descriptor: &str, data_dir: &Path) -> Result<Self, ConfigError> {
        let trimmed = descriptor.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::Invalid {
                field: "boundary",
                message: "boundary descriptor is empty".to_string(),
            });
        }

        if let Some(query) = trimmed.strip_prefix(GLOBAL_DATASET_PREFIX) {
            return AttributeFilter::parse(trimmed, query).map(Self::GlobalDataset);
        }

        if let Some((path, layer)) = split_geopackage_layer(trimmed) {
            return Ok(Self::GeoPackageLayer {
                path: resolve(data_dir, path),
                layer: layer.to_string(),
            });
        }

        let path = resolve(data_dir, trimmed);
        if has_extension(&path, "zip") {
            Ok(Self::ZipArchive(path))
        } else {
            Ok(Self::VectorFile(path))
        }
    }

    /// Returns `true` when the boundary is taken from the global dataset.
    #[must_use]
    pub const fn is_global_dataset(&self) -> bool {
        matches!(self, Self::GlobalDataset(_))
    }

    /// The file this source reads from, if it is a local file.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::GlobalDataset(_) => None,
            Self::ZipArchive(path) | Self::VectorFile(path) | Self::GeoPackageLayer { path, .. } => {
                Some(path.as_path())
            }
        }
    }
}

/// Where the optional per-region covariates come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CovariateSource {
    /// Attributes of the matching global dataset feature.
    GlobalDataset(AttributeFilter),
    /// A CSV file holding one record for this region.
    Csv(PathBuf),
    /// Nothing configured; every covariate resolves to null.
    Unset,
}

impl CovariateSource {
    /// Parses a covariate descriptor. Relative CSV paths are resolved
    /// against the region directory. Blank values and `nan` mean unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::GlobalQuery`] for a malformed `GHS:` query.
    pub fn parse(descriptor: Option<&str>, region_dir: &Path) -> Result<Self, ConfigError> {
        let Some(trimmed) = descriptor
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("nan"))
        else {
            return Ok(Self::Unset);
        };

        if let Some(query) = trimmed.strip_prefix(GLOBAL_DATASET_PREFIX) {
            return AttributeFilter::parse(trimmed, query).map(Self::GlobalDataset);
        }

        Ok(Self::Csv(resolve(region_dir, trimmed)))
    }
}

/// Splits `path/to/file.gpkg:layer` into its path and layer parts.
fn split_geopackage_layer(descriptor: &str) -> Option<(&str, &str)> {
    let lower = descriptor.to_ascii_lowercase();
    let idx = lower.find(".gpkg:")?;
    let split_at = idx + ".gpkg".len();
    let layer = &descriptor[split_at + 1..];
    if layer.is_empty() {
        return None;
    }
    Some((&descriptor[..split_at], layer))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Resolves `raw` against `base` unless it is already absolute.
#[must_use]
pub fn resolve(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
