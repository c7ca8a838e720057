use chrono::{DateTime, Utc};
use ndarray::{s, Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::projection::CrsTransform;

/// Surface reflectance value (scaled integer reflectance stored as float)
pub type Reflectance = f32;

/// Per-pixel cloud/shadow mask, true where a pixel is cloud or shadow
pub type Mask = Array2<bool>;

/// No-data sentinel used by every raster in the pipeline
pub const NODATA: f32 = f32::NAN;

/// Approximate ground distance of one degree of longitude (km)
pub const KM_PER_DEG_LON: f64 = 111.32;

/// Approximate ground distance of one degree of latitude (km)
pub const KM_PER_DEG_LAT: f64 = 110.57;

/// Sentinel-2 spectral bands carried through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpectralBand {
    /// B2, blue
    Blue,
    /// B3, green
    Green,
    /// B4, red
    Red,
    /// B8, near-infrared
    Nir,
}

impl SpectralBand {
    /// Band order of scene reflectance rasters and of the exported composite
    pub const EXPORT_ORDER: [SpectralBand; 4] = [
        SpectralBand::Red,
        SpectralBand::Green,
        SpectralBand::Blue,
        SpectralBand::Nir,
    ];

    /// Position of the band inside a reflectance raster
    pub fn index(self) -> usize {
        match self {
            SpectralBand::Red => 0,
            SpectralBand::Green => 1,
            SpectralBand::Blue => 2,
            SpectralBand::Nir => 3,
        }
    }
}

impl fmt::Display for SpectralBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpectralBand::Blue => write!(f, "B2"),
            SpectralBand::Green => write!(f, "B3"),
            SpectralBand::Red => write!(f, "B4"),
            SpectralBand::Nir => write!(f, "B8"),
        }
    }
}

/// Coordinate reference system of a raster grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// WGS84 longitude/latitude (EPSG:4326)
    Geographic,
    /// WGS84 / UTM (EPSG:326zz north, EPSG:327zz south)
    Utm { zone: u8, north: bool },
}

impl Crs {
    /// EPSG code of the reference system
    pub fn epsg(&self) -> u32 {
        match *self {
            Crs::Geographic => 4326,
            Crs::Utm { zone, north: true } => 32600 + zone as u32,
            Crs::Utm { zone, north: false } => 32700 + zone as u32,
        }
    }

    /// Build from an EPSG code
    pub fn from_epsg(code: u32) -> MosaicResult<Self> {
        match code {
            4326 => Ok(Crs::Geographic),
            32601..=32660 => Ok(Crs::Utm { zone: (code - 32600) as u8, north: true }),
            32701..=32760 => Ok(Crs::Utm { zone: (code - 32700) as u8, north: false }),
            _ => Err(MosaicError::Config(format!("Unsupported CRS: EPSG:{}", code))),
        }
    }

    /// True when map units are metres
    pub fn is_projected(&self) -> bool {
        !matches!(self, Crs::Geographic)
    }

    /// Project a WGS84 longitude/latitude into this CRS
    pub fn project_lon_lat(&self, lon: f64, lat: f64) -> MosaicResult<(f64, f64)> {
        CrsTransform::new(Crs::Geographic, *self)?.transform(lon, lat)
    }

    /// Map extent of a lon/lat bounding box in this CRS.
    ///
    /// Edges are densified so the projected box encloses the curved outline.
    pub fn project_bbox(&self, bbox: &BoundingBox) -> MosaicResult<Extent> {
        const STEPS: usize = 8;
        let to_map = CrsTransform::new(Crs::Geographic, *self)?;
        let mut extent = Extent::empty();
        for k in 0..=STEPS {
            let t = k as f64 / STEPS as f64;
            let lon = bbox.min_lon + t * bbox.width();
            let lat = bbox.min_lat + t * bbox.height();
            for (x, y) in [
                (lon, bbox.min_lat),
                (lon, bbox.max_lat),
                (bbox.min_lon, lat),
                (bbox.max_lon, lat),
            ] {
                let (px, py) = to_map.transform(x, y)?;
                extent.include(px, py);
            }
        }
        Ok(extent)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s
            .trim()
            .to_uppercase()
            .strip_prefix("EPSG:")
            .and_then(|c| c.parse::<u32>().ok())
            .ok_or_else(|| MosaicError::Config(format!("Invalid CRS identifier: {}", s)))?;
        Crs::from_epsg(code)
    }
}

impl Serialize for Crs {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Crs {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Geospatial bounding box (WGS84 degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, max_lon, min_lat, max_lat }
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Finite, non-empty, and within WGS84 limits
    pub fn is_valid(&self) -> bool {
        [self.min_lon, self.max_lon, self.min_lat, self.max_lat]
            .iter()
            .all(|v| v.is_finite())
            && self.min_lon < self.max_lon
            && self.min_lat < self.max_lat
            && self.min_lon >= -180.0
            && self.max_lon <= 180.0
            && self.min_lat >= -90.0
            && self.max_lat <= 90.0
    }

    /// Closed-interval intersection test; boxes touching along an edge intersect
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    /// (lat, lon) of the box centre
    pub fn centroid(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Approximate size in kilometres using the fixed degree conversion factors
    pub fn size_km(&self) -> (f64, f64) {
        (self.width() * KM_PER_DEG_LON, self.height() * KM_PER_DEG_LAT)
    }
}

/// Axis-aligned extent in map units of some CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Inverted extent that any `include` call replaces
    pub fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    pub fn include(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn is_empty(&self) -> bool {
        !(self.min_x < self.max_x && self.min_y < self.max_y)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        let extent = Extent {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        };
        if extent.is_empty() {
            None
        } else {
            Some(extent)
        }
    }

    pub fn union(&self, other: &Extent) -> Extent {
        Extent {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn contains(&self, other: &Extent) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square or rectangular pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinate of a pixel centre
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.top_left_x + (col as f64 + 0.5) * self.pixel_width,
            self.top_left_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Same origin and pixel size within a relative tolerance
    pub fn aligned_with(&self, other: &GeoTransform) -> bool {
        approx_same(self.top_left_x, other.top_left_x, self.pixel_width)
            && approx_same(self.top_left_y, other.top_left_y, self.pixel_width)
            && self.same_resolution(other)
    }

    pub fn same_resolution(&self, other: &GeoTransform) -> bool {
        approx_same(self.pixel_width, other.pixel_width, self.pixel_width)
            && approx_same(self.pixel_height, other.pixel_height, self.pixel_width)
    }
}

fn approx_same(a: f64, b: f64, scale: f64) -> bool {
    (a - b).abs() <= 1e-6 * scale.abs().max(1e-12)
}

/// Multi-band raster held in memory, `(band, row, col)` with NaN no-data
#[derive(Debug, Clone)]
pub struct Raster {
    pub data: Array3<f32>,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl Raster {
    pub fn new(data: Array3<f32>, transform: GeoTransform, crs: Crs) -> Self {
        Self { data, transform, crs }
    }

    /// Raster of the given shape filled with one value
    pub fn filled(bands: usize, rows: usize, cols: usize, value: f32, transform: GeoTransform, crs: Crs) -> Self {
        Self::new(Array3::from_elem((bands, rows, cols), value), transform, crs)
    }

    pub fn band_count(&self) -> usize {
        self.data.dim().0
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.data.dim();
        (rows, cols)
    }

    pub fn band(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.slice(s![index, .., ..])
    }

    pub fn extent(&self) -> Extent {
        let (rows, cols) = self.shape();
        let gt = &self.transform;
        let x0 = gt.top_left_x;
        let x1 = gt.top_left_x + cols as f64 * gt.pixel_width;
        let y0 = gt.top_left_y;
        let y1 = gt.top_left_y + rows as f64 * gt.pixel_height;
        Extent::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Ground size of a pixel in metres, using the fixed degree conversion for geographic grids
    pub fn pixel_size_m(&self) -> f64 {
        let width = self.transform.pixel_width.abs();
        if self.crs.is_projected() {
            width
        } else {
            width * KM_PER_DEG_LON * 1000.0
        }
    }

    /// Same shape, transform, and CRS
    pub fn same_grid(&self, other: &Raster) -> bool {
        self.shape() == other.shape()
            && self.crs == other.crs
            && self.transform.aligned_with(&other.transform)
    }

    /// Pixels where the first band holds a valid observation
    pub fn valid_pixel_count(&self) -> usize {
        if self.band_count() == 0 {
            return 0;
        }
        self.band(0).iter().filter(|v| v.is_finite()).count()
    }

    /// Sub-raster covering every pixel that touches `extent`, or None when disjoint
    pub fn window(&self, extent: &Extent) -> Option<Raster> {
        let (rows, cols) = self.shape();
        let gt = &self.transform;
        let pw = gt.pixel_width;
        let ph = gt.pixel_height.abs();

        let col0 = ((extent.min_x - gt.top_left_x) / pw + 1e-9).floor().max(0.0) as usize;
        let col1 = (((extent.max_x - gt.top_left_x) / pw - 1e-9).ceil().max(0.0) as usize).min(cols);
        let row0 = ((gt.top_left_y - extent.max_y) / ph + 1e-9).floor().max(0.0) as usize;
        let row1 = (((gt.top_left_y - extent.min_y) / ph - 1e-9).ceil().max(0.0) as usize).min(rows);

        if col0 >= col1 || row0 >= row1 {
            return None;
        }

        let data = self.data.slice(s![.., row0..row1, col0..col1]).to_owned();
        let transform = GeoTransform {
            top_left_x: gt.top_left_x + col0 as f64 * pw,
            top_left_y: gt.top_left_y + row0 as f64 * gt.pixel_height,
            ..*gt
        };
        Some(Raster::new(data, transform, self.crs))
    }

    /// Output (rows, cols) of `resample_nearest` at `pixel_size`
    pub fn resampled_shape(&self, pixel_size: f64) -> (usize, usize) {
        resampled_shape(&self.extent(), pixel_size)
    }

    /// Nearest-neighbour resampling to a new square pixel size (map units)
    pub fn resample_nearest(&self, pixel_size: f64) -> Raster {
        let (out_rows, out_cols) = self.resampled_shape(pixel_size);
        let (rows, cols) = self.shape();
        let gt = &self.transform;
        let transform = GeoTransform::north_up(gt.top_left_x, gt.top_left_y, pixel_size, pixel_size);

        let mut data = Array3::from_elem((self.band_count(), out_rows, out_cols), NODATA);
        for r in 0..out_rows {
            let (_, y) = transform.pixel_center(r, 0);
            let src_r = ((gt.top_left_y - y) / gt.pixel_height.abs()).floor();
            if src_r < 0.0 || src_r as usize >= rows {
                continue;
            }
            for c in 0..out_cols {
                let (x, _) = transform.pixel_center(r, c);
                let src_c = ((x - gt.top_left_x) / gt.pixel_width).floor();
                if src_c < 0.0 || src_c as usize >= cols {
                    continue;
                }
                for b in 0..self.band_count() {
                    data[[b, r, c]] = self.data[[b, src_r as usize, src_c as usize]];
                }
            }
        }
        Raster::new(data, transform, self.crs)
    }

    /// Nearest-neighbour warp onto `grid`, reprojecting when the CRS differs.
    ///
    /// Grid pixels outside this raster's coverage are NaN.
    pub fn warp_nearest(&self, grid: &PixelGrid) -> MosaicResult<Raster> {
        if grid.matches(self) {
            return Ok(self.clone());
        }

        let to_source = CrsTransform::new(grid.crs, self.crs)?;
        let (rows, cols) = self.shape();
        let gt = &self.transform;
        let mut data = Array3::from_elem((self.band_count(), grid.rows, grid.cols), NODATA);
        for r in 0..grid.rows {
            for c in 0..grid.cols {
                let (x, y) = grid.transform.pixel_center(r, c);
                let Ok((sx, sy)) = to_source.transform(x, y) else {
                    continue;
                };
                let src_c = ((sx - gt.top_left_x) / gt.pixel_width).floor();
                let src_r = ((gt.top_left_y - sy) / gt.pixel_height.abs()).floor();
                if src_c < 0.0 || src_r < 0.0 || src_c as usize >= cols || src_r as usize >= rows {
                    continue;
                }
                for b in 0..self.band_count() {
                    data[[b, r, c]] = self.data[[b, src_r as usize, src_c as usize]];
                }
            }
        }
        Ok(Raster::new(data, grid.transform, grid.crs))
    }
}

fn resampled_shape(extent: &Extent, pixel_size: f64) -> (usize, usize) {
    let cols = ((extent.width() / pixel_size).round() as usize).max(1);
    let rows = ((extent.height() / pixel_size).round() as usize).max(1);
    (rows, cols)
}

/// North-up pixel grid every composited scene is warped onto
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelGrid {
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
    pub crs: Crs,
}

impl PixelGrid {
    /// Grid of an existing raster
    pub fn of(raster: &Raster) -> Self {
        let (rows, cols) = raster.shape();
        Self {
            transform: raster.transform,
            rows,
            cols,
            crs: raster.crs,
        }
    }

    /// Grid in `crs` covering a lon/lat box, snapped to multiples of the pixel size
    pub fn covering(bbox: &BoundingBox, crs: Crs, pixel_size_m: f64) -> MosaicResult<Self> {
        if !(pixel_size_m > 0.0) {
            return Err(MosaicError::Config(format!("Pixel size must be positive, got {}", pixel_size_m)));
        }
        let pixel = if crs.is_projected() {
            pixel_size_m
        } else {
            pixel_size_m / (KM_PER_DEG_LON * 1000.0)
        };

        let extent = crs.project_bbox(bbox)?;
        let x0 = (extent.min_x / pixel).floor() * pixel;
        let y0 = (extent.max_y / pixel).ceil() * pixel;
        let cols = (((extent.max_x - x0) / pixel).ceil() as usize).max(1);
        let rows = (((y0 - extent.min_y) / pixel).ceil() as usize).max(1);
        Ok(Self {
            transform: GeoTransform::north_up(x0, y0, pixel, pixel),
            rows,
            cols,
            crs,
        })
    }

    /// Raster already sits on this grid
    pub fn matches(&self, raster: &Raster) -> bool {
        raster.shape() == (self.rows, self.cols)
            && raster.crs == self.crs
            && raster.transform.aligned_with(&self.transform)
    }
}

/// One Sentinel-2 surface-reflectance acquisition
#[derive(Debug, Clone)]
pub struct Scene {
    /// Catalog identifier shared with the paired cloud-probability layer
    pub id: String,
    pub acquired: DateTime<Utc>,
    /// Footprint in WGS84 degrees
    pub footprint: BoundingBox,
    /// MEAN_SOLAR_AZIMUTH_ANGLE in degrees clockwise from north
    pub solar_azimuth_deg: Option<f64>,
    /// CLOUDY_PIXEL_PERCENTAGE scene metadata
    pub cloudy_pixel_percentage: f64,
    /// Reflectance bands in `SpectralBand::EXPORT_ORDER`
    pub reflectance: Raster,
    /// Scene classification layer (SCL)
    pub scene_class: Array2<u8>,
}

/// Cloud probability layer (s2cloudless), values in [0, 100]
#[derive(Debug, Clone)]
pub struct CloudProbability {
    pub id: String,
    pub probability: Array2<f32>,
}

/// Error types for mosaic processing
#[derive(Debug, thiserror::Error)]
pub enum MosaicError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Transient service failure: {0}")]
    Transient(String),

    #[error("Clip produced no valid pixels: {0}")]
    EmptyClip(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl MosaicError {
    /// Failures worth resubmitting after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, MosaicError::Transient(_))
    }
}

/// Result type for mosaic operations
pub type MosaicResult<T> = Result<T, MosaicError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn raster_10x10() -> Raster {
        let data = Array3::from_shape_fn((1, 10, 10), |(_, r, c)| (r * 10 + c) as f32);
        Raster::new(data, GeoTransform::north_up(0.0, 100.0, 10.0, 10.0), Crs::Utm { zone: 51, north: true })
    }

    #[test]
    fn test_crs_parsing() {
        assert_eq!("EPSG:32651".parse::<Crs>().unwrap(), Crs::Utm { zone: 51, north: true });
        assert_eq!("epsg:4326".parse::<Crs>().unwrap(), Crs::Geographic);
        assert_eq!(Crs::Utm { zone: 33, north: false }.to_string(), "EPSG:32733");
        assert!("EPSG:3857".parse::<Crs>().is_err());
        assert!("32651".parse::<Crs>().is_err());
    }

    #[test]
    fn test_bbox_intersection_includes_shared_edge() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let b = BoundingBox::new(1.0, 0.0, 2.0, 1.0);
        let c = BoundingBox::new(1.5, 1.5, 2.0, 2.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_window_snaps_to_pixels() {
        let raster = raster_10x10();
        let window = raster.window(&Extent::new(15.0, 45.0, 40.0, 80.0)).unwrap();
        assert_eq!(window.shape(), (4, 3));
        assert_eq!(window.transform.top_left_x, 10.0);
        assert_eq!(window.transform.top_left_y, 80.0);
        assert_eq!(window.data[[0, 0, 0]], 21.0);

        assert!(raster.window(&Extent::new(200.0, 0.0, 300.0, 50.0)).is_none());
    }

    #[test]
    fn test_resample_nearest_doubles_pixels() {
        let raster = raster_10x10();
        let fine = raster.resample_nearest(5.0);
        assert_eq!(fine.shape(), (20, 20));
        assert_eq!(fine.data[[0, 0, 0]], 0.0);
        assert_eq!(fine.data[[0, 1, 1]], 0.0);
        assert_eq!(fine.data[[0, 19, 19]], 99.0);
    }

    #[test]
    fn test_warp_places_scene_on_wider_grid() {
        let crs = Crs::Utm { zone: 51, north: true };
        let scene = Raster::filled(1, 4, 4, 7.0, GeoTransform::north_up(300040.0, 2000000.0, 20.0, 20.0), crs);
        let grid = PixelGrid {
            transform: GeoTransform::north_up(300000.0, 2000000.0, 20.0, 20.0),
            rows: 4,
            cols: 8,
            crs,
        };

        let warped = scene.warp_nearest(&grid).unwrap();
        assert_eq!(warped.shape(), (4, 8));
        assert_eq!(warped.transform, grid.transform);
        assert!(warped.data[[0, 0, 1]].is_nan());
        assert_eq!(warped.data[[0, 0, 2]], 7.0);
        assert_eq!(warped.data[[0, 3, 5]], 7.0);
        assert!(warped.data[[0, 3, 6]].is_nan());
    }

    #[test]
    fn test_warp_on_own_grid_is_unchanged() {
        let raster = raster_10x10();
        let warped = raster.warp_nearest(&PixelGrid::of(&raster)).unwrap();
        assert_eq!(warped.data, raster.data);
    }

    #[test]
    fn test_covering_grid_snaps_to_pixel_size() {
        let bbox = BoundingBox::new(121.0, 17.0, 121.01, 17.01);
        let grid = PixelGrid::covering(&bbox, Crs::Utm { zone: 51, north: true }, 20.0).unwrap();
        assert_eq!(grid.transform.top_left_x % 20.0, 0.0);
        assert_eq!(grid.transform.top_left_y % 20.0, 0.0);
        assert_eq!(grid.transform.pixel_width, 20.0);
        // About 1.07 x 1.1 km
        assert!(grid.cols > 50 && grid.cols < 60, "cols {}", grid.cols);
        assert!(grid.rows > 50 && grid.rows < 60, "rows {}", grid.rows);
    }
}
