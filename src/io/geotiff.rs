//! GeoTIFF access through GDAL

use gdal::raster::{Buffer, RasterCreationOption};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array3;
use std::path::{Path, PathBuf};

use crate::io::store::{list_directory, RasterInfo, RasterStore, WriteOptions};
use crate::types::{Crs, GeoTransform, MosaicError, MosaicResult, Raster};

/// Raster store backed by GeoTIFF files on the local filesystem
#[derive(Debug, Clone, Default)]
pub struct GdalStore;

impl GdalStore {
    pub fn new() -> Self {
        Self
    }

    fn dataset_crs(dataset: &Dataset) -> MosaicResult<Crs> {
        let srs = dataset.spatial_ref()?;
        let code = srs.auth_code().map_err(|_| {
            MosaicError::InvalidFormat("Raster CRS has no EPSG authority code".to_string())
        })?;
        Crs::from_epsg(code as u32)
    }
}

impl RasterStore for GdalStore {
    fn describe(&self, path: &Path) -> MosaicResult<RasterInfo> {
        if !path.exists() {
            return Err(MosaicError::MissingInput(format!("{} does not exist", path.display())));
        }
        let dataset = Dataset::open(path)?;
        let (width, height) = dataset.raster_size();
        Ok(RasterInfo {
            path: path.to_path_buf(),
            width,
            height,
            band_count: dataset.raster_count() as usize,
            transform: GeoTransform::from_gdal(dataset.geo_transform()?),
            crs: Self::dataset_crs(&dataset)?,
        })
    }

    fn read(&self, path: &Path) -> MosaicResult<Raster> {
        if !path.exists() {
            return Err(MosaicError::MissingInput(format!("{} does not exist", path.display())));
        }
        log::debug!("Reading raster: {}", path.display());

        let dataset = Dataset::open(path)?;
        let (width, height) = dataset.raster_size();
        let bands = dataset.raster_count() as usize;

        let mut values = Vec::with_capacity(bands * width * height);
        for b in 1..=bands {
            let rasterband = dataset.rasterband(b as isize)?;
            let nodata = rasterband.no_data_value();
            let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
            values.extend(band_data.data.into_iter().map(|v| match nodata {
                Some(nd) if !nd.is_nan() && (v as f64) == nd => f32::NAN,
                _ => v,
            }));
        }

        let data = Array3::from_shape_vec((bands, height, width), values)
            .map_err(|e| MosaicError::Processing(format!("Failed to reshape raster data: {}", e)))?;

        Ok(Raster::new(
            data,
            GeoTransform::from_gdal(dataset.geo_transform()?),
            Self::dataset_crs(&dataset)?,
        ))
    }

    fn write(&self, path: &Path, raster: &Raster, options: &WriteOptions) -> MosaicResult<()> {
        log::debug!("Writing GeoTIFF: {}", path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = raster.shape();
        let bands = raster.band_count();

        let mut creation = vec![RasterCreationOption { key: "TILED", value: "YES" }];
        if let Some(compress) = options.compression.gdal_name() {
            creation.push(RasterCreationOption { key: "COMPRESS", value: compress });
        }
        if options.big_tiff {
            creation.push(RasterCreationOption { key: "BIGTIFF", value: "YES" });
        }

        let mut dataset = driver.create_with_band_type_with_options::<f32, _>(
            path,
            width as isize,
            height as isize,
            bands as isize,
            &creation,
        )?;

        dataset.set_geo_transform(&raster.transform.to_gdal())?;
        dataset.set_spatial_ref(&SpatialRef::from_epsg(raster.crs.epsg())?)?;

        for b in 0..bands {
            let mut rasterband = dataset.rasterband((b + 1) as isize)?;
            let flat_data: Vec<f32> = raster.band(b).iter().cloned().collect();
            let buffer = Buffer::new((width, height), flat_data);
            rasterband.write((0, 0), (width, height), &buffer)?;
            rasterband.set_no_data_value(Some(f64::NAN))?;
        }

        Ok(())
    }

    fn list(&self, dir: &Path, extension: &str) -> MosaicResult<Vec<PathBuf>> {
        list_directory(dir, extension)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn remove(&self, path: &Path) -> MosaicResult<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }
}
