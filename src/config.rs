//! Run configuration
//!
//! Every threshold, path and export parameter of one yearly run lives in
//! `PipelineConfig`. Defaults reproduce the Cordillera Administrative Region
//! (Philippines) setup; load a JSON file to override any subset of fields.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::cloud_mask::CloudMaskParams;
use crate::core::grid::TileSize;
use crate::core::tile_export::{ExportSettings, RetryPolicy};
use crate::io::catalog::SceneQuery;
use crate::types::{BoundingBox, MosaicError, MosaicResult};

/// Directory layout of the run, relative to `root`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputPaths {
    pub root: PathBuf,
    /// Downloaded tile exports
    pub tiles: PathBuf,
    /// Scratch files such as the VRT index
    pub temp: PathBuf,
    /// Merged mosaic before clipping
    pub final_rasters: PathBuf,
    pub clipped_rasters: PathBuf,
    pub preview: PathBuf,
    /// Boundary polygons used as the clip cutline
    pub boundary: PathBuf,
    /// Scene catalog manifest
    pub catalog: PathBuf,
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            tiles: PathBuf::from("tiles"),
            temp: PathBuf::from("temp"),
            final_rasters: PathBuf::from("final_rasters"),
            clipped_rasters: PathBuf::from("clipped_rasters"),
            preview: PathBuf::from("preview"),
            boundary: PathBuf::from("boundary/boundary.geojson"),
            catalog: PathBuf::from("catalog/manifest.json"),
        }
    }
}

/// Parameters of one yearly mosaic run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub year: i32,
    /// Defaults to April 1st of `year`
    pub start_date: Option<NaiveDate>,
    /// Exclusive; defaults to February 1st of the following year
    pub end_date: Option<NaiveDate>,
    pub aoi: BoundingBox,
    /// Scenes with a higher CLOUDY_PIXEL_PERCENTAGE are not queried
    pub cloud_filter_pct: f64,
    pub masking: CloudMaskParams,
    pub tiling: TileSize,
    pub export: ExportSettings,
    pub retry: RetryPolicy,
    /// Interval between export status polls
    pub export_poll_interval_s: u64,
    /// Give up waiting for exports after this long
    pub export_timeout_s: u64,
    /// Leave the merged mosaic in place after a successful clip
    pub keep_unclipped_mosaic: bool,
    pub paths: OutputPaths,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            year: 2021,
            start_date: None,
            end_date: None,
            aoi: BoundingBox::new(120.4, 16.0, 121.6, 18.6),
            cloud_filter_pct: 80.0,
            masking: CloudMaskParams::default(),
            tiling: TileSize::default(),
            export: ExportSettings::default(),
            retry: RetryPolicy::default(),
            export_poll_interval_s: 30,
            export_timeout_s: 24 * 60 * 60,
            keep_unclipped_mosaic: false,
            paths: OutputPaths::default(),
        }
    }
}

impl PipelineConfig {
    /// Default configuration for another year
    pub fn for_year(year: i32) -> Self {
        Self {
            year,
            ..Self::default()
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> MosaicResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MosaicError::Config(format!("Cannot read configuration {}: {}", path.display(), e))
        })?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> MosaicResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Composite period, start inclusive and end exclusive
    pub fn date_range(&self) -> MosaicResult<(NaiveDate, NaiveDate)> {
        let start = match self.start_date {
            Some(date) => date,
            None => NaiveDate::from_ymd_opt(self.year, 4, 1)
                .ok_or_else(|| MosaicError::Config(format!("Invalid year {}", self.year)))?,
        };
        let end = match self.end_date {
            Some(date) => date,
            None => NaiveDate::from_ymd_opt(self.year + 1, 2, 1)
                .ok_or_else(|| MosaicError::Config(format!("Invalid year {}", self.year)))?,
        };
        Ok((start, end))
    }

    pub fn scene_query(&self) -> MosaicResult<SceneQuery> {
        let (start, end) = self.date_range()?;
        Ok(SceneQuery::new(self.aoi, start, end, self.cloud_filter_pct))
    }

    /// Reject configurations no stage could run with
    pub fn validate(&self) -> MosaicResult<()> {
        if !(1000..=9999).contains(&self.year) {
            return Err(MosaicError::Config(format!("Year must have four digits, got {}", self.year)));
        }
        if !self.aoi.is_valid() {
            return Err(MosaicError::Config(format!("Invalid AOI: {:?}", self.aoi)));
        }

        let (start, end) = self.date_range()?;
        if start >= end {
            return Err(MosaicError::Config(format!("Start date {} is not before end date {}", start, end)));
        }
        if start.year() > self.year + 1 || end.year() < self.year {
            log::warn!("⚠️  Date range {} to {} does not overlap year {}", start, end, self.year);
        }

        if !(0.0..=100.0).contains(&self.cloud_filter_pct) {
            return Err(MosaicError::Config(format!(
                "Cloud filter must be a percentage, got {}",
                self.cloud_filter_pct
            )));
        }
        if !(0.0..=100.0).contains(&self.masking.cloud_probability_threshold) {
            return Err(MosaicError::Config(format!(
                "Cloud probability threshold must be in [0, 100], got {}",
                self.masking.cloud_probability_threshold
            )));
        }
        if !(self.masking.nir_dark_threshold > 0.0) || !(self.masking.buffer_m >= 0.0) {
            return Err(MosaicError::Config("Shadow thresholds must be positive".to_string()));
        }
        if !(self.tiling.width_km > 0.0 && self.tiling.height_km > 0.0) {
            return Err(MosaicError::Config(format!(
                "Tile size must be positive, got {} x {} km",
                self.tiling.width_km, self.tiling.height_km
            )));
        }

        if !(self.export.scale_m > 0.0) {
            return Err(MosaicError::Config(format!("Export scale must be positive, got {}", self.export.scale_m)));
        }
        let (width_km, height_km) = self.aoi.size_km();
        if width_km * 1000.0 < self.export.scale_m || height_km * 1000.0 < self.export.scale_m {
            return Err(MosaicError::Config(format!(
                "AOI ({:.3} x {:.3} km) is smaller than one {} m pixel",
                width_km, height_km, self.export.scale_m
            )));
        }
        if self.export.max_pixels == 0 {
            return Err(MosaicError::Config("Max pixel cap must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(MosaicError::Config("Retry policy needs at least one attempt".to_string()));
        }
        Ok(())
    }

    fn under_root(&self, path: &Path) -> PathBuf {
        self.paths.root.join(path)
    }

    pub fn tiles_dir(&self) -> PathBuf {
        self.under_root(&self.paths.tiles)
    }

    /// Virtual mosaic index, `temp/{year}.vrt`
    pub fn vrt_path(&self) -> PathBuf {
        self.under_root(&self.paths.temp).join(format!("{}.vrt", self.year))
    }

    /// Merged mosaic, `final_rasters/{year}.tif`
    pub fn mosaic_path(&self) -> PathBuf {
        self.under_root(&self.paths.final_rasters).join(format!("{}.tif", self.year))
    }

    /// Clipped result, `clipped_rasters/{year}.tif`
    pub fn clipped_path(&self) -> PathBuf {
        self.under_root(&self.paths.clipped_rasters).join(format!("{}.tif", self.year))
    }

    /// Preview document, `preview/{year}_preview.html`
    pub fn preview_path(&self) -> PathBuf {
        self.under_root(&self.paths.preview).join(format!("{}_preview.html", self.year))
    }

    pub fn boundary_path(&self) -> PathBuf {
        self.under_root(&self.paths.boundary)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.under_root(&self.paths.catalog)
    }
}
