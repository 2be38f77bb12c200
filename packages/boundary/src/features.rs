//! Native reading of `GeoJSON` boundary files.
//!
//! Only feature geometries are kept. Every geometry is normalized to a
//! [`MultiPolygon`] so the staged column never mixes single and multi
//! polygon types.

use std::io::Read as _;
use std::path::Path;

use geo::MultiPolygon;
use geojson::GeoJson;
use liveability_region_models::DISPLAY_SRID;

use crate::BoundaryError;

/// Polygonal features read from a boundary file.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryFeatures {
    /// One multipolygon per feature.
    pub geometries: Vec<MultiPolygon<f64>>,
    /// EPSG code of the coordinates.
    pub srid: u32,
}

/// Returns `true` for paths this module can read directly.
#[must_use]
pub fn is_geojson_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(is_geojson_extension)
}

fn is_geojson_extension(ext: &str) -> bool {
    ext.eq_ignore_ascii_case("geojson") || ext.eq_ignore_ascii_case("json")
}

/// Reads a `.geojson` file.
///
/// # Errors
///
/// Returns [`BoundaryError`] if the file cannot be read, is not valid
/// `GeoJSON`, holds no geometries, or holds non-polygonal geometries.
pub fn read_geojson_file(path: &Path) -> Result<BoundaryFeatures, BoundaryError> {
    let text = std::fs::read_to_string(path).map_err(|e| BoundaryError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_geojson(&text, &path.display().to_string())
}

/// Reads the first `GeoJSON` member of a zip archive.
///
/// Returns `Ok(None)` when the archive holds no `GeoJSON` member, so the
/// caller can hand it to the vector importer instead.
///
/// # Errors
///
/// Returns [`BoundaryError`] if the archive cannot be opened or the
/// member cannot be read or parsed.
pub fn read_geojson_from_zip(path: &Path) -> Result<Option<BoundaryFeatures>, BoundaryError> {
    let file = std::fs::File::open(path).map_err(|e| BoundaryError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut archive = zip::ZipArchive::new(file).map_err(|e| BoundaryError::Unreadable {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| BoundaryError::Unreadable {
                path: path.display().to_string(),
                message: format!("zip entry {i}: {e}"),
            })?;

        if entry.is_dir() || !is_geojson_path(Path::new(entry.name())) {
            continue;
        }

        let origin = format!("{}!{}", path.display(), entry.name());
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|e| BoundaryError::Io {
                path: origin.clone(),
                source: e,
            })?;

        log::info!("Reading boundary from {origin}");
        return parse_geojson(&text, &origin).map(Some);
    }

    Ok(None)
}

/// Parses `GeoJSON` text. `origin` names the input in errors.
///
/// # Errors
///
/// Returns [`BoundaryError`] for invalid `GeoJSON`, non-polygonal
/// geometries, or an input with no geometries at all.
pub fn parse_geojson(text: &str, origin: &str) -> Result<BoundaryFeatures, BoundaryError> {
    let geojson: GeoJson = text.parse().map_err(|e: geojson::Error| BoundaryError::Unreadable {
        path: origin.to_string(),
        message: e.to_string(),
    })?;

    let (geometries, foreign_members) = match geojson {
        GeoJson::FeatureCollection(collection) => (
            collection
                .features
                .into_iter()
                .map(|f| f.geometry)
                .collect::<Vec<_>>(),
            collection.foreign_members,
        ),
        GeoJson::Feature(feature) => (vec![feature.geometry], feature.foreign_members),
        GeoJson::Geometry(geometry) => (vec![Some(geometry)], None),
    };

    let srid = foreign_members
        .as_ref()
        .and_then(|members| members.get("crs"))
        .and_then(crs_srid)
        .unwrap_or(DISPLAY_SRID);

    let mut out = Vec::with_capacity(geometries.len());
    for (i, geometry) in geometries.into_iter().enumerate() {
        let Some(geometry) = geometry else {
            log::warn!("{origin}: feature {i} has no geometry, skipping");
            continue;
        };

        let geometry: geo::Geometry<f64> =
            geometry
                .try_into()
                .map_err(|e: geojson::Error| BoundaryError::Unreadable {
                    path: origin.to_string(),
                    message: format!("feature {i}: {e}"),
                })?;

        let kind = geometry_kind(&geometry);
        let multi = to_multipolygon(geometry).ok_or_else(|| BoundaryError::UnsupportedGeometry {
            path: origin.to_string(),
            kind,
        })?;
        if multi.0.is_empty() {
            log::warn!("{origin}: feature {i} has an empty geometry, skipping");
            continue;
        }
        out.push(multi);
    }

    if out.is_empty() {
        return Err(BoundaryError::Empty {
            path: origin.to_string(),
        });
    }

    Ok(BoundaryFeatures {
        geometries: out,
        srid,
    })
}

/// Converts a polygonal geometry into a [`MultiPolygon`].
///
/// Polygons become single-member multipolygons; collections are
/// flattened. Returns `None` if any part is not polygonal.
#[must_use]
pub fn to_multipolygon(geometry: geo::Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        geo::Geometry::Polygon(polygon) => Some(MultiPolygon(vec![polygon])),
        geo::Geometry::MultiPolygon(multi) => Some(multi),
        geo::Geometry::Rect(rect) => Some(MultiPolygon(vec![rect.to_polygon()])),
        geo::Geometry::Triangle(triangle) => Some(MultiPolygon(vec![triangle.to_polygon()])),
        geo::Geometry::GeometryCollection(collection) => {
            let mut polygons = Vec::new();
            for part in collection {
                polygons.extend(to_multipolygon(part)?.0);
            }
            Some(MultiPolygon(polygons))
        }
        _ => None,
    }
}

const fn geometry_kind(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

/// Reads an EPSG code from a legacy `GeoJSON` `crs` member.
///
/// Accepts `EPSG:n`, `urn:ogc:def:crs:EPSG::n` (and other URN versions),
/// and the OGC `CRS84` alias for WGS 84.
fn crs_srid(crs: &serde_json::Value) -> Option<u32> {
    let name = crs.get("properties")?.get("name")?.as_str()?.trim();

    if name.ends_with("CRS84") {
        return Some(DISPLAY_SRID);
    }

    let upper = name.to_ascii_uppercase();
    let idx = upper.find("EPSG")?;
    upper[idx + 4..]
        .trim_start_matches(':')
        .rsplit(':')
        .next()?
        .parse()
        .ok()
}

/// Serializes a multipolygon as a `GeoJSON` geometry string for
/// `ST_GeomFromGeoJSON`.
///
/// # Errors
///
/// Returns [`serde_json::Error`] if serialization fails.
pub fn to_geojson_string(geometry: &MultiPolygon<f64>) -> Result<String, serde_json::Error> {
    let geometry = geojson::Geometry::new(geojson::Value::from(geometry));
    serde_json::to_string(&geometry)
}
