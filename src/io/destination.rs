use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::io::store::{RasterStore, WriteOptions};
use crate::types::{BoundingBox, Crs, MosaicError, MosaicResult, Raster, KM_PER_DEG_LON};

/// Request to export a region of an image at a fixed scale and CRS
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub image: Arc<Raster>,
    /// Task description, also used as the file name
    pub description: String,
    pub folder: String,
    pub file_name_prefix: String,
    /// Region in WGS84 degrees
    pub region: BoundingBox,
    /// Output pixel size in metres
    pub scale_m: f64,
    pub crs: Crs,
    pub max_pixels: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Submitted,
    Running,
    Completed,
    Failed(String),
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed(_))
    }
}

/// Handle of an initiated export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportTask {
    pub id: String,
    pub description: String,
    /// Where the file lands once the task completes
    pub target: PathBuf,
    pub state: TaskState,
}

/// Long-running export service
pub trait ExportDestination: Send + Sync {
    /// Initiate an export; completion is reported through `status`
    fn submit(&self, request: &ExportRequest) -> MosaicResult<ExportTask>;

    fn status(&self, task: &ExportTask) -> MosaicResult<TaskState> {
        Ok(task.state.clone())
    }
}

/// Destination writing GeoTIFFs under a local root directory, synchronously
pub struct LocalDirectoryDestination<'a> {
    root: PathBuf,
    store: &'a dyn RasterStore,
    options: WriteOptions,
}

impl<'a> LocalDirectoryDestination<'a> {
    pub fn new<P: AsRef<Path>>(root: P, store: &'a dyn RasterStore) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            store,
            options: WriteOptions::default(),
        }
    }

    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn target_path(&self, request: &ExportRequest) -> PathBuf {
        self.root
            .join(&request.folder)
            .join(format!("{}.tif", request.file_name_prefix))
    }

    /// Cut, resample and check the image for one request
    pub fn render(&self, request: &ExportRequest) -> MosaicResult<Raster> {
        let image = request.image.as_ref();
        if request.crs != image.crs {
            return Err(MosaicError::Config(format!(
                "Cannot export {} in {}: composite is in {}",
                request.description, request.crs, image.crs
            )));
        }
        if !(request.scale_m > 0.0) {
            return Err(MosaicError::Config(format!("Export scale must be positive, got {}", request.scale_m)));
        }

        let extent = image.crs.project_bbox(&request.region)?;
        let window = image.window(&extent).ok_or_else(|| {
            MosaicError::Processing(format!(
                "Region of {} does not overlap the composite",
                request.description
            ))
        })?;

        let pixel_size = if image.crs.is_projected() {
            request.scale_m
        } else {
            request.scale_m / (KM_PER_DEG_LON * 1000.0)
        };
        let current = window.transform.pixel_width.abs();
        let resample = (current - pixel_size).abs() > pixel_size * 1e-9;

        let (rows, cols) = if resample {
            window.resampled_shape(pixel_size)
        } else {
            window.shape()
        };
        let pixels = (rows as u64).saturating_mul(cols as u64);
        if pixels > request.max_pixels {
            return Err(MosaicError::Config(format!(
                "Export {} needs {} pixels, above the cap of {}",
                request.description, pixels, request.max_pixels
            )));
        }

        if resample {
            log::debug!("Resampling {} from {} to {} map units", request.description, current, pixel_size);
            Ok(window.resample_nearest(pixel_size))
        } else {
            Ok(window)
        }
    }
}

impl ExportDestination for LocalDirectoryDestination<'_> {
    fn submit(&self, request: &ExportRequest) -> MosaicResult<ExportTask> {
        let target = self.target_path(request);
        let output = self.render(request)?;
        self.store.write(&target, &output, &self.options)?;

        let (rows, cols) = output.shape();
        log::debug!("Wrote {} ({} x {})", target.display(), cols, rows);

        Ok(ExportTask {
            id: format!("local:{}", request.description),
            description: request.description.clone(),
            target,
            state: TaskState::Completed,
        })
    }
}
