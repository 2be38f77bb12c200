//! Vector layer imports into the spatial store.
//!
//! Formats the workspace cannot read natively (shapefiles, geopackages,
//! the global urban-settlement dataset) are loaded with `ogr2ogr` into a
//! staging table. The importer is a trait so the region logic does not
//! care how the table gets there.

use std::path::Path;
use std::process::Command;

use liveability_region_models::config::DatabaseConfig;

/// Errors that can occur while importing a vector layer.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The importer executable could not be started.
    #[error("Failed to run {program} (is GDAL installed?): {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The importer ran but exited unsuccessfully.
    #[error("Import into {table} failed ({status}): {command}\n{output}")]
    Failed {
        /// Target table.
        table: String,
        /// Command line, password redacted.
        command: String,
        /// Exit status description.
        status: String,
        /// Captured stdout and stderr.
        output: String,
    },
}

/// One layer to copy into a store table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    /// Source path or GDAL virtual path (e.g. `/vsizip/...`).
    pub source: String,
    /// Layer inside a multi-layer source.
    pub layer: Option<String>,
    /// Target table, overwritten if present.
    pub table: String,
    /// Attribute filter in OGR SQL.
    pub filter: Option<String>,
    /// Promote single polygons to multipolygons on import.
    pub promote_to_multi: bool,
}

impl ImportRequest {
    /// Imports every feature of `source` into `table`.
    #[must_use]
    pub fn new(source: impl Into<String>, table: &str) -> Self {
        Self {
            source: source.into(),
            layer: None,
            table: table.to_string(),
            filter: None,
            promote_to_multi: false,
        }
    }

    /// Imports from a zip archive through GDAL's `/vsizip/` handler.
    #[must_use]
    pub fn from_zip(path: &Path, table: &str) -> Self {
        Self::new(format!("/vsizip/{}", path.display()), table)
    }

    /// Restricts the import to one layer.
    #[must_use]
    pub fn with_layer(mut self, layer: &str) -> Self {
        self.layer = Some(layer.to_string());
        self
    }

    /// Keeps only features matching `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Forces multipolygon output.
    #[must_use]
    pub const fn promoted_to_multi(mut self) -> Self {
        self.promote_to_multi = true;
        self
    }
}

/// Copies a vector layer into a store table.
pub trait VectorImporter {
    /// Runs the import, blocking until it finishes, and returns the name
    /// of the table written.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError`] if the import cannot run or fails.
    fn import(&self, request: &ImportRequest) -> Result<String, ImportError>;
}

/// [`VectorImporter`] backed by GDAL's `ogr2ogr`.
#[derive(Debug, Clone)]
pub struct Ogr2Ogr {
    program: String,
    datasource: String,
    datasource_redacted: String,
}

impl Ogr2Ogr {
    /// Creates an importer writing into the database described by
    /// `database`.
    #[must_use]
    pub fn new(program: &str, database: &DatabaseConfig) -> Self {
        Self {
            program: program.to_string(),
            datasource: database.ogr_datasource(),
            datasource_redacted: database.ogr_datasource_redacted(),
        }
    }

    /// Argument list for `request`.
    #[must_use]
    pub fn args(&self, request: &ImportRequest) -> Vec<String> {
        build_args(&self.datasource, request)
    }

    /// Printable command line for `request` with the password masked.
    #[must_use]
    pub fn display_command(&self, request: &ImportRequest) -> String {
        let args = build_args(&self.datasource_redacted, request);
        std::iter::once(self.program.clone())
            .chain(args.into_iter().map(|a| {
                if a.contains(' ') {
                    format!("\"{a}\"")
                } else {
                    a
                }
            }))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl VectorImporter for Ogr2Ogr {
    fn import(&self, request: &ImportRequest) -> Result<String, ImportError> {
        let command = self.display_command(request);
        log::info!("Importing {} into {}", request.source, request.table);
        log::debug!("{command}");

        let output = Command::new(&self.program)
            .args(self.args(request))
            .output()
            .map_err(|e| ImportError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(ImportError::Failed {
                table: request.table.clone(),
                command,
                status: output.status.to_string(),
                output: format!("{}\n{}", stdout.trim_end(), stderr.trim_end())
                    .trim()
                    .to_string(),
            });
        }

        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            log::warn!("{}: {line}", self.program);
        }

        Ok(request.table.clone())
    }
}

fn build_args(datasource: &str, request: &ImportRequest) -> Vec<String> {
    let mut args: Vec<String> = [
        "-overwrite",
        "-f",
        "PostgreSQL",
        "-lco",
        "GEOMETRY_NAME=geom",
        "-lco",
        "PRECISION=NO",
        "-nln",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();
    args.push(request.table.clone());

    if let Some(filter) = &request.filter {
        args.push("-where".to_string());
        args.push(filter.clone());
    }

    if request.promote_to_multi {
        args.push("-nlt".to_string());
        args.push("PROMOTE_TO_MULTI".to_string());
    }

    args.push(datasource.to_string());
    args.push(request.source.clone());

    if let Some(layer) = &request.layer {
        args.push(layer.clone());
    }

    args
}
