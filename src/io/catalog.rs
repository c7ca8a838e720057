//! Sentinel-2 scene catalogs
//!
//! A catalog answers two queries over the same AOI and date window: the
//! surface-reflectance scenes and their cloud-probability layers. The two are
//! joined later on identifier equality.

use chrono::{DateTime, NaiveDate, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::io::store::RasterStore;
use crate::types::{BoundingBox, CloudProbability, MosaicError, MosaicResult, Raster, Scene};

/// Catalog filter for one composite period
#[derive(Debug, Clone, PartialEq)]
pub struct SceneQuery {
    pub aoi: BoundingBox,
    /// Inclusive start date
    pub start: NaiveDate,
    /// Exclusive end date
    pub end: NaiveDate,
    /// Scenes above this CLOUDY_PIXEL_PERCENTAGE are dropped; probability layers ignore it
    pub max_cloudy_pixel_percentage: f64,
}

impl SceneQuery {
    pub fn new(aoi: BoundingBox, start: NaiveDate, end: NaiveDate, max_cloudy_pixel_percentage: f64) -> Self {
        Self {
            aoi,
            start,
            end,
            max_cloudy_pixel_percentage,
        }
    }

    /// Footprint and acquisition time filter shared by both collections
    pub fn covers(&self, footprint: &BoundingBox, acquired: &DateTime<Utc>) -> bool {
        let day = acquired.date_naive();
        footprint.intersects(&self.aoi) && day >= self.start && day < self.end
    }

    pub fn accepts_scene(&self, footprint: &BoundingBox, acquired: &DateTime<Utc>, cloudy_pct: f64) -> bool {
        self.covers(footprint, acquired) && cloudy_pct <= self.max_cloudy_pixel_percentage
    }
}

/// Source of Sentinel-2 scenes and s2cloudless probability layers
pub trait SceneCatalog: Send + Sync {
    /// Scenes matching the query, ordered by acquisition time
    fn query_scenes(&self, query: &SceneQuery) -> MosaicResult<Vec<Scene>>;

    /// Probability layers over the same AOI and dates
    fn query_cloud_probability(&self, query: &SceneQuery) -> MosaicResult<Vec<CloudProbability>>;

    /// XYZ tile URL template for previewing the composite, if the catalog serves one
    fn tile_url(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
struct ProbabilityRecord {
    layer: CloudProbability,
    footprint: BoundingBox,
    acquired: DateTime<Utc>,
}

/// Catalog over scenes already held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    scenes: Vec<Scene>,
    probabilities: Vec<ProbabilityRecord>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scene(&mut self, scene: Scene) {
        self.scenes.push(scene);
    }

    /// Register a probability layer with the footprint and time it was captured at
    pub fn add_probability(&mut self, layer: CloudProbability, footprint: BoundingBox, acquired: DateTime<Utc>) {
        self.probabilities.push(ProbabilityRecord {
            layer,
            footprint,
            acquired,
        });
    }

    /// Add a scene together with its probability layer
    pub fn add_pair(&mut self, scene: Scene, probability: Array2<f32>) {
        let layer = CloudProbability {
            id: scene.id.clone(),
            probability,
        };
        self.add_probability(layer, scene.footprint, scene.acquired);
        self.add_scene(scene);
    }
}

impl SceneCatalog for MemoryCatalog {
    fn query_scenes(&self, query: &SceneQuery) -> MosaicResult<Vec<Scene>> {
        let mut scenes: Vec<Scene> = self
            .scenes
            .iter()
            .filter(|s| query.accepts_scene(&s.footprint, &s.acquired, s.cloudy_pixel_percentage))
            .cloned()
            .collect();
        scenes.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));
        Ok(scenes)
    }

    fn query_cloud_probability(&self, query: &SceneQuery) -> MosaicResult<Vec<CloudProbability>> {
        let mut records: Vec<&ProbabilityRecord> = self
            .probabilities
            .iter()
            .filter(|r| query.covers(&r.footprint, &r.acquired))
            .collect();
        records.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.layer.id.cmp(&b.layer.id)));
        Ok(records.into_iter().map(|r| r.layer.clone()).collect())
    }
}

/// One scene entry of a JSON catalog manifest.
///
/// Raster paths are relative to the manifest directory. The reflectance file
/// holds B4, B3, B2, B8 in that band order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestScene {
    pub id: String,
    pub acquired: DateTime<Utc>,
    pub footprint: BoundingBox,
    #[serde(default)]
    pub mean_solar_azimuth_deg: Option<f64>,
    pub cloudy_pixel_percentage: f64,
    pub reflectance: PathBuf,
    pub scene_class: PathBuf,
    #[serde(default)]
    pub cloud_probability: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogManifest {
    pub scenes: Vec<ManifestScene>,
    /// Optional XYZ tile URL template for previews
    #[serde(default)]
    pub tile_url: Option<String>,
}

/// Catalog described by a JSON manifest, rasters read through a `RasterStore`
pub struct ManifestCatalog<'a> {
    manifest: CatalogManifest,
    root: PathBuf,
    store: &'a dyn RasterStore,
}

impl<'a> ManifestCatalog<'a> {
    pub fn new(manifest: CatalogManifest, root: PathBuf, store: &'a dyn RasterStore) -> Self {
        Self { manifest, root, store }
    }

    pub fn from_file<P: AsRef<Path>>(path: P, store: &'a dyn RasterStore) -> MosaicResult<Self> {
        let path = path.as_ref();
        log::info!("Loading scene manifest: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            MosaicError::MissingInput(format!("Cannot read manifest {}: {}", path.display(), e))
        })?;
        let manifest: CatalogManifest = serde_json::from_str(&content)?;
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        log::debug!("Manifest lists {} scenes", manifest.scenes.len());
        Ok(Self::new(manifest, root, store))
    }

    fn read_single_band(&self, relative: &Path) -> MosaicResult<(Raster, Array2<f32>)> {
        let raster = self.store.read(&self.root.join(relative))?;
        if raster.band_count() != 1 {
            return Err(MosaicError::InvalidFormat(format!(
                "{} has {} bands, expected 1",
                relative.display(),
                raster.band_count()
            )));
        }
        let band = raster.band(0).to_owned();
        Ok((raster, band))
    }

    fn load_scene(&self, entry: &ManifestScene) -> MosaicResult<Scene> {
        let reflectance = self.store.read(&self.root.join(&entry.reflectance))?;
        if reflectance.band_count() != 4 {
            return Err(MosaicError::InvalidFormat(format!(
                "Scene {} reflectance has {} bands, expected B4 B3 B2 B8",
                entry.id,
                reflectance.band_count()
            )));
        }
        let (_, scl) = self.read_single_band(&entry.scene_class)?;
        let scene_class = scl.mapv(|v| if v.is_finite() { v.clamp(0.0, 255.0) as u8 } else { 0 });

        Ok(Scene {
            id: entry.id.clone(),
            acquired: entry.acquired,
            footprint: entry.footprint,
            solar_azimuth_deg: entry.mean_solar_azimuth_deg,
            cloudy_pixel_percentage: entry.cloudy_pixel_percentage,
            reflectance,
            scene_class,
        })
    }
}

impl SceneCatalog for ManifestCatalog<'_> {
    fn query_scenes(&self, query: &SceneQuery) -> MosaicResult<Vec<Scene>> {
        let mut entries: Vec<&ManifestScene> = self
            .manifest
            .scenes
            .iter()
            .filter(|e| query.accepts_scene(&e.footprint, &e.acquired, e.cloudy_pixel_percentage))
            .collect();
        entries.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));

        entries.into_iter().map(|e| self.load_scene(e)).collect()
    }

    fn query_cloud_probability(&self, query: &SceneQuery) -> MosaicResult<Vec<CloudProbability>> {
        let mut entries: Vec<&ManifestScene> = self
            .manifest
            .scenes
            .iter()
            .filter(|e| e.cloud_probability.is_some() && query.covers(&e.footprint, &e.acquired))
            .collect();
        entries.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));

        let mut layers = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(path) = &entry.cloud_probability {
                let (_, probability) = self.read_single_band(path)?;
                layers.push(CloudProbability {
                    id: entry.id.clone(),
                    probability,
                });
            }
        }
        Ok(layers)
    }

    fn tile_url(&self) -> Option<String> {
        self.manifest.tile_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::MemoryStore;
    use crate::types::{Crs, GeoTransform};
    use chrono::TimeZone;

    fn scene(id: &str, month: u32, cloudy: f64, footprint: BoundingBox) -> Scene {
        let transform = GeoTransform::north_up(0.0, 2.0, 1.0, 1.0);
        Scene {
            id: id.to_string(),
            acquired: Utc.with_ymd_and_hms(2021, month, 10, 2, 0, 0).unwrap(),
            footprint,
            solar_azimuth_deg: Some(120.0),
            cloudy_pixel_percentage: cloudy,
            reflectance: Raster::filled(4, 2, 2, 100.0, transform, Crs::Geographic),
            scene_class: Array2::from_elem((2, 2), 4),
        }
    }

    fn query() -> SceneQuery {
        SceneQuery::new(
            BoundingBox::new(120.4, 16.0, 121.6, 18.6),
            NaiveDate::from_ymd_opt(2021, 4, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 2, 1).unwrap(),
            80.0,
        )
    }

    #[test]
    fn test_memory_catalog_filters_and_orders() {
        let inside = BoundingBox::new(120.0, 16.5, 121.0, 17.5);
        let outside = BoundingBox::new(10.0, 10.0, 11.0, 11.0);

        let mut catalog = MemoryCatalog::new();
        catalog.add_pair(scene("late", 9, 10.0, inside), Array2::zeros((2, 2)));
        catalog.add_pair(scene("early", 5, 10.0, inside), Array2::zeros((2, 2)));
        catalog.add_pair(scene("cloudy", 6, 95.0, inside), Array2::zeros((2, 2)));
        catalog.add_pair(scene("elsewhere", 6, 5.0, outside), Array2::zeros((2, 2)));
        catalog.add_pair(scene("march", 3, 5.0, inside), Array2::zeros((2, 2)));

        let ids: Vec<String> = catalog.query_scenes(&query()).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["early", "late"]);

        // Probability layers ignore the cloudy-pixel ceiling
        let layers: Vec<String> = catalog
            .query_cloud_probability(&query())
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(layers, vec!["early", "cloudy", "late"]);
    }

    #[test]
    fn test_end_date_is_exclusive() {
        let q = query();
        let footprint = BoundingBox::new(120.0, 16.5, 121.0, 17.5);
        let on_end = Utc.with_ymd_and_hms(2022, 2, 1, 0, 0, 0).unwrap();
        let on_start = Utc.with_ymd_and_hms(2021, 4, 1, 0, 0, 0).unwrap();
        assert!(!q.covers(&footprint, &on_end));
        assert!(q.covers(&footprint, &on_start));
    }

    #[test]
    fn test_manifest_catalog_reads_rasters_from_store() {
        let store = MemoryStore::new();
        let transform = GeoTransform::north_up(0.0, 2.0, 1.0, 1.0);
        store
            .insert("cat/a_refl.tif", Raster::filled(4, 2, 2, 500.0, transform, Crs::Geographic))
            .unwrap();
        store
            .insert("cat/a_scl.tif", Raster::filled(1, 2, 2, 6.0, transform, Crs::Geographic))
            .unwrap();
        store
            .insert("cat/a_prob.tif", Raster::filled(1, 2, 2, 12.0, transform, Crs::Geographic))
            .unwrap();

        let manifest: CatalogManifest = serde_json::from_str(
            r#"{
                "scenes": [{
                    "id": "a",
                    "acquired": "2021-06-01T02:30:00Z",
                    "footprint": {"min_lon": 120.5, "max_lon": 121.0, "min_lat": 16.5, "max_lat": 17.0},
                    "mean_solar_azimuth_deg": 75.0,
                    "cloudy_pixel_percentage": 20.0,
                    "reflectance": "a_refl.tif",
                    "scene_class": "a_scl.tif",
                    "cloud_probability": "a_prob.tif"
                }]
            }"#,
        )
        .unwrap();
        let catalog = ManifestCatalog::new(manifest, PathBuf::from("cat"), &store);

        let scenes = catalog.query_scenes(&query()).unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].scene_class[[0, 0]], 6);
        assert_eq!(scenes[0].solar_azimuth_deg, Some(75.0));

        let layers = catalog.query_cloud_probability(&query()).unwrap();
        assert_eq!(layers[0].probability[[1, 1]], 12.0);
    }
}
