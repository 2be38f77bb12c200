//! Urban region resolution.
//!
//! The urban study region is the part of the study region treated as
//! urban. How it is derived depends on where the boundary came from and
//! on configuration, captured once as an [`UrbanPolicy`]:
//!
//! * [`UrbanPolicy::GlobalDataset`]: the boundary already is the urban
//!   extent, so the urban study region is a copy of the study region.
//! * [`UrbanPolicy::ForcedEquality`]: the region has no usable urban
//!   extent data and the whole study region is treated as urban.
//! * [`UrbanPolicy::Intersection`]: the urban study region is the
//!   intersection of the study region with an external urban extent
//!   layer.
//!
//! Intersection mode is re-entrant: tables already present in the
//! catalog are reused rather than rebuilt.

use async_trait::async_trait;
use liveability_boundary::import::{ImportRequest, VectorImporter};
use liveability_boundary::plan::FULL_URBAN_REGION;
use liveability_database::catalog;
use liveability_database::sql::{TablePlan, drop_table};
use liveability_region_models::config::RegionConfig;
use liveability_region_models::source::BoundarySource;
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::Database;

use crate::RegionError;

/// How the urban study region is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrbanPolicy {
    /// Boundary taken from the global dataset.
    GlobalDataset,
    /// Whole study region treated as urban.
    ForcedEquality,
    /// Study region intersected with an urban extent layer.
    Intersection,
}

impl UrbanPolicy {
    /// Selects the policy for a study region built from `source`.
    ///
    /// A global dataset boundary takes precedence over
    /// `not_urban_intersection`.
    #[must_use]
    pub const fn select(source: &BoundarySource, config: &RegionConfig) -> Self {
        if source.is_global_dataset() {
            Self::GlobalDataset
        } else if config.not_urban_intersection {
            Self::ForcedEquality
        } else {
            Self::Intersection
        }
    }
}

impl std::fmt::Display for UrbanPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::GlobalDataset => "global dataset",
            Self::ForcedEquality => "whole study region",
            Self::Intersection => "urban extent intersection",
        })
    }
}

/// Urban study region as a copy of the study region name and geometry.
#[must_use]
pub fn global_dataset_plan(config: &RegionConfig) -> TablePlan {
    TablePlan::replace(
        &config.tables.urban_study_region,
        &format!(
            "SELECT \"Study region\",\n\
             geom\n\
             FROM {}",
            config.tables.study_region
        ),
    )
}

/// Urban region and urban study region as full copies of the study
/// region.
#[must_use]
pub fn forced_equality_plans(config: &RegionConfig) -> [TablePlan; 2] {
    let select = format!("SELECT * FROM {}", config.tables.study_region);
    [
        TablePlan::replace(&config.tables.urban_region, &select),
        TablePlan::replace(&config.tables.urban_study_region, &select),
    ]
}

/// Urban region from the staged urban extent layer: features intersecting
/// the buffered region, tested in the layer's native `epsg` and stored in
/// the working SRID. Drops the staging table.
#[must_use]
pub fn clip_urban_extent_plan(config: &RegionConfig, epsg: u32) -> TablePlan {
    let srid = config.srid;
    TablePlan::create(
        &config.tables.urban_region,
        &format!(
            "SELECT ST_Multi(ST_Transform(a.geom, {srid})) AS geom\n\
             FROM {FULL_URBAN_REGION} a,\n\
             {buffered} b\n\
             WHERE ST_Intersects(a.geom, ST_Transform(b.geom, {epsg}))",
            buffered = config.buffered_table(),
        ),
    )
    .then(drop_table(FULL_URBAN_REGION))
}

/// Urban study region as the union of the study region's intersections
/// with the urban region, one row per study region. A study region with
/// no urban overlap keeps its row with an empty multipolygon.
#[must_use]
pub fn intersection_plan(config: &RegionConfig) -> TablePlan {
    let srid = config.srid;
    TablePlan::create(
        &config.tables.urban_study_region,
        &format!(
            "SELECT a.\"Study region\",\n\
             COALESCE(\
             ST_Multi(ST_CollectionExtract(ST_Union(ST_Intersection(a.geom, b.geom)), 3)), \
             ST_SetSRID('MULTIPOLYGON EMPTY'::geometry, {srid}))\
             ::geometry(MultiPolygon, {srid}) AS geom\n\
             FROM {study_region} a\n\
             LEFT JOIN {urban_region} b ON ST_Intersects(a.geom, b.geom)\n\
             GROUP BY a.\"Study region\"",
            study_region = config.tables.study_region,
            urban_region = config.tables.urban_region,
        ),
    )
}

/// Counts rows of `table` with invalid geometry.
#[must_use]
pub fn invalid_geometry_query(table: &str) -> String {
    format!("SELECT COUNT(*) AS count FROM {table} WHERE NOT ST_IsValid(geom)")
}

/// Counts urban study region rows not covered by the study region.
#[must_use]
pub fn containment_query(config: &RegionConfig) -> String {
    format!(
        "SELECT COUNT(*) AS count FROM {urban} u \
         WHERE NOT EXISTS (\
         SELECT 1 FROM {study} s WHERE ST_Covers(ST_Buffer(s.geom, 0.001), u.geom))",
        urban = config.tables.urban_study_region,
        study = config.tables.study_region,
    )
}

/// Table operations needed to resolve the urban study region by
/// intersection.
#[async_trait(?Send)]
pub trait UrbanStore {
    /// Whether `table` exists.
    async fn table_exists(&self, table: &str) -> Result<bool, RegionError>;

    /// Drops `table` if it exists.
    async fn drop_table(&self, table: &str) -> Result<(), RegionError>;

    /// Runs `plan` as one unit.
    async fn apply(&self, plan: &TablePlan) -> Result<(), RegionError>;

    /// Number of rows in `table` with invalid geometry.
    async fn invalid_geometries(&self, table: &str) -> Result<u64, RegionError>;
}

/// [`UrbanStore`] over a `PostGIS` connection.
pub struct PostgisStore<'a> {
    db: &'a dyn Database,
}

impl<'a> PostgisStore<'a> {
    /// Wraps `db`.
    #[must_use]
    pub const fn new(db: &'a dyn Database) -> Self {
        Self { db }
    }
}

#[async_trait(?Send)]
impl UrbanStore for PostgisStore<'_> {
    async fn table_exists(&self, table: &str) -> Result<bool, RegionError> {
        Ok(catalog::table_exists(self.db, table).await?)
    }

    async fn drop_table(&self, table: &str) -> Result<(), RegionError> {
        Ok(catalog::drop_if_exists(self.db, table).await?)
    }

    async fn apply(&self, plan: &TablePlan) -> Result<(), RegionError> {
        Ok(catalog::apply_plan(self.db, plan).await?)
    }

    async fn invalid_geometries(&self, table: &str) -> Result<u64, RegionError> {
        let rows = self
            .db
            .query_raw_params(&invalid_geometry_query(table), &[])
            .await?;
        let invalid: i64 = rows.first().map_or(0, |r| r.to_value("count").unwrap_or(0));
        Ok(u64::try_from(invalid).unwrap_or_default())
    }
}

/// Resolves the urban region and urban study region for a study region
/// built from `source`.
///
/// Expects the study region and buffered study region to exist.
///
/// # Errors
///
/// Returns [`RegionError`] if the urban extent cannot be imported, the
/// urban region is missing when needed, an input geometry is invalid, or
/// a store statement fails.
pub async fn resolve(
    db: &dyn Database,
    source: &BoundarySource,
    config: &RegionConfig,
    importer: &dyn VectorImporter,
) -> Result<UrbanPolicy, RegionError> {
    let policy = UrbanPolicy::select(source, config);
    log::info!("Resolving urban study region using {policy}");

    match policy {
        UrbanPolicy::GlobalDataset => {
            catalog::apply_plan(db, &global_dataset_plan(config)).await?;
        }
        UrbanPolicy::ForcedEquality => {
            for plan in &forced_equality_plans(config) {
                catalog::apply_plan(db, plan).await?;
            }
        }
        UrbanPolicy::Intersection => {
            resolve_intersection(&PostgisStore::new(db), config, importer).await?;
        }
    }

    verify_containment(db, config).await?;
    Ok(policy)
}

/// Intersection mode. Reuses an existing urban region or urban study
/// region unless `refresh_urban_region` is set, and imports and clips the
/// urban extent layer when the urban region is missing.
///
/// # Errors
///
/// Returns [`RegionError`] if the urban extent file is missing or fails
/// to import, no urban region can be found, an input geometry is invalid,
/// or a store operation fails.
pub async fn resolve_intersection(
    store: &dyn UrbanStore,
    config: &RegionConfig,
    importer: &dyn VectorImporter,
) -> Result<(), RegionError> {
    let urban_region = &config.tables.urban_region;
    let urban_study_region = &config.tables.urban_study_region;

    if config.refresh_urban_region {
        log::info!("Refreshing {urban_region} and {urban_study_region}");
        store.drop_table(urban_study_region).await?;
        store.drop_table(urban_region).await?;
    }

    if let (Some(path), Some(extent)) = (config.urban_extent_path(), &config.urban_extent) {
        if store.table_exists(urban_region).await? {
            log::warn!(
                "Reusing existing {urban_region}; it may predate the current {} buffer \
                 (set refresh_urban_region to rebuild it)",
                config.buffer_label()
            );
        } else {
            if !path.exists() {
                return Err(RegionError::MissingInput {
                    path: path.display().to_string(),
                });
            }

            let request = ImportRequest::new(path.display().to_string(), FULL_URBAN_REGION);
            let built = match importer.import(&request) {
                Ok(_) => store.apply(&clip_urban_extent_plan(config, extent.epsg)).await,
                Err(e) => Err(e.into()),
            };

            if let Err(e) = built {
                if let Err(drop_err) = store.drop_table(FULL_URBAN_REGION).await {
                    log::warn!("Failed to drop staging table {FULL_URBAN_REGION}: {drop_err}");
                }
                return Err(e);
            }
        }
    }

    if store.table_exists(urban_study_region).await? {
        log::info!("{urban_study_region} already exists, keeping it");
        return Ok(());
    }

    if !store.table_exists(urban_region).await? {
        return Err(RegionError::MissingUrbanRegion {
            table: urban_region.clone(),
        });
    }

    for table in [&config.tables.study_region, urban_region] {
        let count = store.invalid_geometries(table).await?;
        if count > 0 {
            return Err(RegionError::InvalidGeometry {
                table: table.clone(),
                count,
            });
        }
    }

    store.apply(&intersection_plan(config)).await
}

async fn verify_containment(db: &dyn Database, config: &RegionConfig) -> Result<(), RegionError> {
    let rows = db.query_raw_params(&containment_query(config), &[]).await?;
    let outside: i64 = rows.first().map_or(0, |r| r.to_value("count").unwrap_or(0));

    if outside > 0 {
        log::warn!(
            "{outside} row(s) of {} extend beyond {}",
            config.tables.urban_study_region,
            config.tables.study_region
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::{BTreeMap, BTreeSet};

    use liveability_boundary::import::ImportError;

    use super::*;

    const BASE: &str = r#"
        name = "Testville"
        locale = "testville"
        data_dir = "/data"
        srid = 32755
        boundary = "testville.geojson"
        buffer_m = 1000

        [urban_extent]
        path = "ghs.gpkg"
        epsg = 54009

        [database]
        name = "li_testville"
        user = "postgres"
    "#;

    fn config() -> RegionConfig {
        RegionConfig::parse(BASE).unwrap()
    }

    fn policy(config: &RegionConfig) -> UrbanPolicy {
        UrbanPolicy::select(&config.boundary_source().unwrap(), config)
    }

    #[test]
    fn global_boundary_wins_over_forced_equality() {
        let mut config = config();
        config.boundary = "GHS:UC_NM_MN=Testville".to_string();
        config.not_urban_intersection = true;
        assert_eq!(policy(&config), UrbanPolicy::GlobalDataset);

        config.not_urban_intersection = false;
        assert_eq!(policy(&config), UrbanPolicy::GlobalDataset);
    }

    #[test]
    fn padded_global_descriptor_selects_global_dataset() {
        let mut config = config();
        config.boundary = "  GHS:UC_NM_MN=Testville ".to_string();
        assert_eq!(policy(&config), UrbanPolicy::GlobalDataset);
    }

    #[test]
    fn forced_equality_and_default_intersection() {
        let mut config = config();
        assert_eq!(policy(&config), UrbanPolicy::Intersection);
        config.not_urban_intersection = true;
        assert_eq!(policy(&config), UrbanPolicy::ForcedEquality);
    }

    #[test]
    fn global_dataset_copies_name_and_geometry() {
        let plan = global_dataset_plan(&config());
        assert_eq!(plan.table, "urban_study_region");
        assert_eq!(
            plan.statements[1],
            "CREATE TABLE urban_study_region AS\nSELECT \"Study region\",\ngeom\nFROM study_region"
        );
    }

    #[test]
    fn forced_equality_copies_study_region_twice() {
        let [urban, urban_study] = forced_equality_plans(&config());
        assert_eq!(urban.table, "urban_region");
        assert_eq!(urban_study.table, "urban_study_region");
        for plan in [&urban, &urban_study] {
            assert!(plan.statements[0].starts_with("DROP TABLE IF EXISTS"));
            assert!(plan.statements[1].ends_with("SELECT * FROM study_region"));
            assert!(plan.statements[2].contains("USING GIST (geom)"));
        }
    }

    #[test]
    fn clip_tests_in_native_epsg_and_stores_in_working_srid() {
        let plan = clip_urban_extent_plan(&config(), 54009);
        assert_eq!(plan.table, "urban_region");
        assert!(!plan.statements[0].starts_with("DROP"));
        let create = &plan.statements[0];
        assert!(create.contains("ST_Transform(a.geom, 32755)"));
        assert!(create.contains("ST_Intersects(a.geom, ST_Transform(b.geom, 54009))"));
        assert!(create.contains("study_region_1000m b"));
        assert_eq!(
            plan.statements.last().map(String::as_str),
            Some("DROP TABLE IF EXISTS full_urban_region")
        );
    }

    #[test]
    fn intersection_is_unioned_per_study_region() {
        let plan = intersection_plan(&config());
        let create = &plan.statements[0];
        assert!(create.starts_with("CREATE TABLE urban_study_region AS"));
        assert!(create.contains(
            "ST_Multi(ST_CollectionExtract(ST_Union(ST_Intersection(a.geom, b.geom)), 3))"
        ));
        assert!(create.contains("::geometry(MultiPolygon, 32755) AS geom"));
        assert!(create.ends_with("GROUP BY a.\"Study region\""));
        assert_eq!(
            plan.statements[1],
            "CREATE INDEX urban_study_region_gix ON urban_study_region USING GIST (geom)"
        );
    }

    #[test]
    fn regions_without_urban_overlap_keep_an_empty_row() {
        let create = &intersection_plan(&config()).statements[0];
        assert!(create.contains("LEFT JOIN urban_region b ON ST_Intersects(a.geom, b.geom)"));
        assert!(create.contains("COALESCE("));
        assert!(create.contains("ST_SetSRID('MULTIPOLYGON EMPTY'::geometry, 32755)"));
        assert!(!create.contains("FROM study_region a,"));
    }

    #[test]
    fn urban_flags_do_not_change_study_region_plans() {
        let plain = config();
        let mut forced = config();
        forced.not_urban_intersection = true;
        forced.refresh_urban_region = true;

        assert_eq!(
            crate::builder::buffered_plan(&plain),
            crate::builder::buffered_plan(&forced)
        );
        assert_eq!(
            liveability_boundary::plan::study_region_from_staging(&plain),
            liveability_boundary::plan::study_region_from_staging(&forced)
        );
    }

    #[test]
    fn validity_and_containment_queries() {
        assert_eq!(
            invalid_geometry_query("urban_region"),
            "SELECT COUNT(*) AS count FROM urban_region WHERE NOT ST_IsValid(geom)"
        );
        let sql = containment_query(&config());
        assert!(sql.contains("FROM urban_study_region u"));
        assert!(sql.contains("FROM study_region s"));
    }

    #[derive(Default)]
    struct FakeStore {
        tables: RefCell<BTreeSet<String>>,
        invalid: BTreeMap<String, u64>,
        log: RefCell<Vec<String>>,
    }

    impl FakeStore {
        fn with_tables(tables: &[&str]) -> Self {
            Self {
                tables: RefCell::new(tables.iter().map(ToString::to_string).collect()),
                ..Self::default()
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.borrow().clone()
        }
    }

    #[async_trait(?Send)]
    impl UrbanStore for FakeStore {
        async fn table_exists(&self, table: &str) -> Result<bool, RegionError> {
            Ok(self.tables.borrow().contains(table))
        }

        async fn drop_table(&self, table: &str) -> Result<(), RegionError> {
            self.log.borrow_mut().push(format!("drop {table}"));
            self.tables.borrow_mut().remove(table);
            Ok(())
        }

        async fn apply(&self, plan: &TablePlan) -> Result<(), RegionError> {
            self.log.borrow_mut().push(format!("apply {}", plan.table));
            self.tables.borrow_mut().insert(plan.table.clone());
            Ok(())
        }

        async fn invalid_geometries(&self, table: &str) -> Result<u64, RegionError> {
            Ok(self.invalid.get(table).copied().unwrap_or(0))
        }
    }

    #[derive(Default)]
    struct RecordingImporter {
        requests: RefCell<Vec<ImportRequest>>,
        fail: bool,
    }

    impl VectorImporter for RecordingImporter {
        fn import(&self, request: &ImportRequest) -> Result<String, ImportError> {
            self.requests.borrow_mut().push(request.clone());
            if self.fail {
                return Err(ImportError::Failed {
                    table: request.table.clone(),
                    command: "ogr2ogr".to_string(),
                    status: "exit status: 1".to_string(),
                    output: "unable to open datasource".to_string(),
                });
            }
            Ok(request.table.clone())
        }
    }

    /// Config whose urban extent file exists in a scratch directory.
    fn config_with_extent(name: &str) -> RegionConfig {
        let dir = std::env::temp_dir().join(format!("liveability_urban_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("ghs.gpkg"), b"").unwrap();

        let mut config = config();
        config.data_dir = dir;
        config
    }

    #[tokio::test]
    async fn imports_and_clips_when_urban_region_is_missing() {
        let config = config_with_extent("import");
        let store = FakeStore::default();
        let importer = RecordingImporter::default();

        resolve_intersection(&store, &config, &importer).await.unwrap();

        let requests = importer.requests.borrow();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].table, FULL_URBAN_REGION);
        assert!(requests[0].source.ends_with("ghs.gpkg"));
        assert_eq!(store.log(), ["apply urban_region", "apply urban_study_region"]);
    }

    #[tokio::test]
    async fn existing_urban_region_skips_the_import() {
        let config = config_with_extent("reuse");
        let store = FakeStore::with_tables(&["urban_region"]);
        let importer = RecordingImporter::default();

        resolve_intersection(&store, &config, &importer).await.unwrap();

        assert!(importer.requests.borrow().is_empty());
        assert_eq!(store.log(), ["apply urban_study_region"]);
    }

    #[tokio::test]
    async fn existing_urban_study_region_is_kept() {
        let config = config_with_extent("keep");
        let store = FakeStore::with_tables(&["urban_region", "urban_study_region"]);
        let importer = RecordingImporter::default();

        resolve_intersection(&store, &config, &importer).await.unwrap();

        assert!(importer.requests.borrow().is_empty());
        assert!(store.log().is_empty());
    }

    #[tokio::test]
    async fn refresh_drops_both_tables_and_rebuilds() {
        let mut config = config_with_extent("refresh");
        config.refresh_urban_region = true;
        let store = FakeStore::with_tables(&["urban_region", "urban_study_region"]);
        let importer = RecordingImporter::default();

        resolve_intersection(&store, &config, &importer).await.unwrap();

        assert_eq!(importer.requests.borrow().len(), 1);
        assert_eq!(
            store.log(),
            [
                "drop urban_study_region",
                "drop urban_region",
                "apply urban_region",
                "apply urban_study_region",
            ]
        );
    }

    #[tokio::test]
    async fn no_extent_and_no_urban_region_is_an_error() {
        let mut config = config();
        config.urban_extent = None;
        let store = FakeStore::default();
        let importer = RecordingImporter::default();

        let err = resolve_intersection(&store, &config, &importer)
            .await
            .unwrap_err();

        assert!(matches!(err, RegionError::MissingUrbanRegion { ref table } if table == "urban_region"));
        assert!(importer.requests.borrow().is_empty());
        assert!(store.log().is_empty());
    }

    #[tokio::test]
    async fn failed_import_drops_the_staging_table() {
        let config = config_with_extent("failed");
        let store = FakeStore::default();
        let importer = RecordingImporter {
            fail: true,
            ..RecordingImporter::default()
        };

        let err = resolve_intersection(&store, &config, &importer)
            .await
            .unwrap_err();

        assert!(matches!(err, RegionError::Import(_)));
        assert_eq!(store.log(), ["drop full_urban_region"]);
    }

    #[tokio::test]
    async fn missing_extent_file_is_reported_before_importing() {
        let mut config = config_with_extent("absent");
        if let Some(extent) = config.urban_extent.as_mut() {
            extent.path = "absent.gpkg".to_string();
        }
        let store = FakeStore::default();
        let importer = RecordingImporter::default();

        let err = resolve_intersection(&store, &config, &importer)
            .await
            .unwrap_err();

        assert!(matches!(err, RegionError::MissingInput { ref path } if path.ends_with("absent.gpkg")));
        assert!(importer.requests.borrow().is_empty());
    }

    #[tokio::test]
    async fn invalid_urban_geometry_stops_the_intersection() {
        let config = config_with_extent("invalid");
        let store = FakeStore {
            invalid: BTreeMap::from([("urban_region".to_string(), 2)]),
            ..FakeStore::with_tables(&["urban_region"])
        };
        let importer = RecordingImporter::default();

        let err = resolve_intersection(&store, &config, &importer)
            .await
            .unwrap_err();

        assert!(matches!(err, RegionError::InvalidGeometry { count: 2, .. }));
        assert!(store.log().is_empty());
    }
}
