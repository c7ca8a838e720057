//! Administrative boundary polygons used as clip cutlines

use geojson::{GeoJson, Geometry, JsonObject, Value as GeoValue};
use ndarray::{Array2, Axis};
use std::path::Path;

use crate::core::projection::CrsTransform;
use crate::types::{Crs, Extent, GeoTransform, Mask, MosaicError, MosaicResult};

/// Polygon with an outer ring followed by holes, vertices as (x, y)
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub rings: Vec<Vec<(f64, f64)>>,
}

impl Polygon {
    /// Even-odd test over all rings, so holes are excluded
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let mut inside = false;
        for ring in &self.rings {
            let n = ring.len();
            for i in 0..n {
                let (x1, y1) = ring[i];
                let (x2, y2) = ring[(i + 1) % n];
                if (y1 > y) != (y2 > y) && x < x1 + (y - y1) * (x2 - x1) / (y2 - y1) {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Sorted x positions where the rings cross the horizontal line at `y`
    fn crossings(&self, y: f64, out: &mut Vec<f64>) {
        out.clear();
        for ring in &self.rings {
            let n = ring.len();
            for i in 0..n {
                let (x1, y1) = ring[i];
                let (x2, y2) = ring[(i + 1) % n];
                if (y1 > y) != (y2 > y) {
                    out.push(x1 + (y - y1) * (x2 - x1) / (y2 - y1));
                }
            }
        }
        out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    }
}

/// Clip geometry: a union of polygons in one CRS
#[derive(Debug, Clone, PartialEq)]
pub struct Cutline {
    pub polygons: Vec<Polygon>,
    pub crs: Crs,
}

impl Cutline {
    /// Load a boundary file; GeoJSON is read natively, other formats need GDAL
    pub fn load<P: AsRef<Path>>(path: P) -> MosaicResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MosaicError::MissingInput(format!("Boundary file {} does not exist", path.display())));
        }
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "geojson" | "json" => Self::from_geojson_str(&std::fs::read_to_string(path)?),
            #[cfg(feature = "gdal")]
            _ => Self::from_ogr(path),
            #[cfg(not(feature = "gdal"))]
            other => Err(MosaicError::Config(format!(
                "Boundary format '{}' needs the gdal feature; convert {} to GeoJSON",
                other,
                path.display()
            ))),
        }
    }

    /// Parse Polygon/MultiPolygon geometries from a GeoJSON document.
    ///
    /// Features, feature collections and geometry collections are walked;
    /// other geometry types are ignored.
    pub fn from_geojson_str(content: &str) -> MosaicResult<Self> {
        let geojson = content.parse::<GeoJson>()?;
        let polygons = collect_polygons(&geojson)?;
        if polygons.is_empty() {
            return Err(MosaicError::InvalidFormat("Boundary contains no polygons".to_string()));
        }
        let crs = match crs_name(&geojson) {
            Some(name) => parse_crs_name(name)?,
            None => Crs::Geographic,
        };
        Ok(Self { polygons, crs })
    }

    #[cfg(feature = "gdal")]
    fn from_ogr(path: &Path) -> MosaicResult<Self> {
        use gdal::vector::LayerAccess;

        log::debug!("Reading boundary through OGR: {}", path.display());
        let dataset = gdal::Dataset::open(path)?;
        let mut layer = dataset.layer(0)?;
        let crs = match layer.spatial_ref() {
            Some(srs) => match srs.auth_code() {
                Ok(code) => Crs::from_epsg(code as u32)?,
                Err(_) => Crs::Geographic,
            },
            None => Crs::Geographic,
        };

        let mut polygons = Vec::new();
        for feature in layer.features() {
            if let Some(geometry) = feature.geometry() {
                let geojson = geometry.json()?.parse::<GeoJson>()?;
                polygons.extend(collect_polygons(&geojson)?);
            }
        }
        if polygons.is_empty() {
            return Err(MosaicError::InvalidFormat(format!("{} contains no polygons", path.display())));
        }
        Ok(Self { polygons, crs })
    }

    pub fn extent(&self) -> Extent {
        let mut extent = Extent::empty();
        for (x, y) in self.polygons.iter().flat_map(|p| p.rings.iter().flatten()) {
            extent.include(*x, *y);
        }
        extent
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.polygons.iter().any(|p| p.contains(x, y))
    }

    /// Reproject every vertex into `target`
    pub fn to_crs(&self, target: Crs) -> MosaicResult<Cutline> {
        if self.crs == target {
            return Ok(self.clone());
        }
        log::debug!("Reprojecting boundary from {} to {}", self.crs, target);
        let to_target = CrsTransform::new(self.crs, target)?;
        let polygons = self
            .polygons
            .iter()
            .map(|p| {
                let rings = p
                    .rings
                    .iter()
                    .map(|ring| {
                        ring.iter()
                            .map(|&(x, y)| to_target.transform(x, y))
                            .collect::<MosaicResult<Vec<_>>>()
                    })
                    .collect::<MosaicResult<Vec<_>>>()?;
                Ok(Polygon { rings })
            })
            .collect::<MosaicResult<Vec<_>>>()?;
        Ok(Cutline { polygons, crs: target })
    }

    /// Pixels of a grid whose centres fall inside the cutline.
    ///
    /// Scanline fill per row, one crossing list per polygon.
    pub fn rasterize(&self, transform: &GeoTransform, rows: usize, cols: usize) -> Mask {
        let mut mask = Array2::from_elem((rows, cols), false);
        let pw = transform.pixel_width;
        let mut crossings = Vec::new();

        for (row, mut mask_row) in mask.axis_iter_mut(Axis(0)).enumerate() {
            let (_, y) = transform.pixel_center(row, 0);
            for polygon in &self.polygons {
                polygon.crossings(y, &mut crossings);
                for span in crossings.chunks_exact(2) {
                    let start = ((span[0] - transform.top_left_x) / pw - 0.5).ceil().max(0.0) as usize;
                    let end = (((span[1] - transform.top_left_x) / pw - 0.5).ceil().max(0.0) as usize).min(cols);
                    for c in start.min(end)..end {
                        mask_row[c] = true;
                    }
                }
            }
        }
        mask
    }
}

fn parse_crs_name(name: &str) -> MosaicResult<Crs> {
    if name.contains("CRS84") {
        return Ok(Crs::Geographic);
    }
    let code = name
        .rsplit(':')
        .next()
        .and_then(|c| c.parse::<u32>().ok())
        .ok_or_else(|| MosaicError::InvalidFormat(format!("Unrecognised boundary CRS: {}", name)))?;
    Crs::from_epsg(code)
}

/// Legacy named `crs` member of the top-level object
fn crs_name(geojson: &GeoJson) -> Option<&str> {
    let members: &JsonObject = match geojson {
        GeoJson::Geometry(g) => g.foreign_members.as_ref()?,
        GeoJson::Feature(f) => f.foreign_members.as_ref()?,
        GeoJson::FeatureCollection(fc) => fc.foreign_members.as_ref()?,
    };
    members.get("crs")?.pointer("/properties/name")?.as_str()
}

fn to_polygon(rings: &[Vec<Vec<f64>>]) -> MosaicResult<Polygon> {
    let rings = rings
        .iter()
        .map(|ring| {
            ring.iter()
                .map(|position| match position.as_slice() {
                    [x, y, ..] => Ok((*x, *y)),
                    _ => Err(MosaicError::InvalidFormat(format!("Bad coordinate: {:?}", position))),
                })
                .collect::<MosaicResult<Vec<_>>>()
        })
        .collect::<MosaicResult<Vec<_>>>()?;
    Ok(Polygon { rings })
}

fn geometry_polygons(geometry: &Geometry, out: &mut Vec<Polygon>) -> MosaicResult<()> {
    match &geometry.value {
        GeoValue::Polygon(rings) => out.push(to_polygon(rings)?),
        GeoValue::MultiPolygon(polygons) => {
            for rings in polygons {
                out.push(to_polygon(rings)?);
            }
        }
        GeoValue::GeometryCollection(geometries) => {
            for inner in geometries {
                geometry_polygons(inner, out)?;
            }
        }
        _ => log::debug!("Ignoring non-polygon geometry in boundary"),
    }
    Ok(())
}

fn collect_polygons(geojson: &GeoJson) -> MosaicResult<Vec<Polygon>> {
    let mut polygons = Vec::new();
    match geojson {
        GeoJson::Geometry(geometry) => geometry_polygons(geometry, &mut polygons)?,
        GeoJson::Feature(feature) => {
            if let Some(geometry) = &feature.geometry {
                geometry_polygons(geometry, &mut polygons)?;
            }
        }
        GeoJson::FeatureCollection(collection) => {
            for geometry in collection.features.iter().filter_map(|f| f.geometry.as_ref()) {
                geometry_polygons(geometry, &mut polygons)?;
            }
        }
    }
    Ok(polygons)
}
