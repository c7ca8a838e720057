use ndarray::{Axis, Zip};
use std::path::{Path, PathBuf};

use crate::io::cutline::Cutline;
use crate::io::store::{RasterStore, WriteOptions};
use crate::types::{MosaicError, MosaicResult, Raster, NODATA};

/// Result of a boundary clip
#[derive(Debug, Clone)]
pub struct ClipSummary {
    pub output_path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub valid_pixels: usize,
    /// The unclipped source was deleted
    pub source_removed: bool,
}

/// Crop to the cutline's bounding box and blank pixels outside it.
///
/// Fails with `EmptyClip` when the cutline misses the raster or no valid
/// pixel remains inside it.
pub fn clip_raster(raster: &Raster, cutline: &Cutline) -> MosaicResult<Raster> {
    let cutline = cutline.to_crs(raster.crs)?;
    let extent = cutline
        .extent()
        .intersection(&raster.extent())
        .ok_or_else(|| MosaicError::EmptyClip("Boundary does not overlap the mosaic".to_string()))?;

    let mut clipped = raster
        .window(&extent)
        .ok_or_else(|| MosaicError::EmptyClip("Boundary does not overlap any mosaic pixel".to_string()))?;

    let (rows, cols) = clipped.shape();
    let inside = cutline.rasterize(&clipped.transform, rows, cols);
    for mut band in clipped.data.axis_iter_mut(Axis(0)) {
        Zip::from(&mut band).and(&inside).for_each(|v, &keep| {
            if !keep {
                *v = NODATA;
            }
        });
    }

    if clipped.valid_pixel_count() == 0 {
        return Err(MosaicError::EmptyClip(
            "No valid mosaic pixels inside the boundary".to_string(),
        ));
    }
    Ok(clipped)
}

/// Clips the merged mosaic to an administrative boundary
pub struct BoundaryClipper<'a> {
    store: &'a dyn RasterStore,
    options: WriteOptions,
    remove_source: bool,
}

impl<'a> BoundaryClipper<'a> {
    pub fn new(store: &'a dyn RasterStore) -> Self {
        Self {
            store,
            options: WriteOptions::mosaic(),
            remove_source: true,
        }
    }

    /// Keep the unclipped mosaic after a successful clip
    pub fn keep_source(mut self) -> Self {
        self.remove_source = false;
        self
    }

    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    /// Clip `input` to the boundary file and write `output`.
    ///
    /// The input is deleted only once the output exists; any error leaves it in place.
    pub fn clip(&self, input: &Path, boundary: &Path, output: &Path) -> MosaicResult<ClipSummary> {
        log::info!("✂️  Clipping {} to {}", input.display(), boundary.display());
        if !self.store.exists(input) {
            return Err(MosaicError::MissingInput(format!("Mosaic {} does not exist", input.display())));
        }

        let cutline = Cutline::load(boundary)?;
        log::debug!("Boundary: {} polygons in {}", cutline.polygons.len(), cutline.crs);

        let raster = self.store.read(input)?;
        let clipped = clip_raster(&raster, &cutline)?;
        drop(raster);

        self.store.write(output, &clipped, &self.options)?;
        if !self.store.exists(output) {
            return Err(MosaicError::Processing(format!(
                "Clipped raster {} was not created",
                output.display()
            )));
        }

        let (height, width) = clipped.shape();
        let valid_pixels = clipped.valid_pixel_count();
        log::info!("Clipped raster: {} ({} x {} px, {} valid)", output.display(), width, height, valid_pixels);

        if self.remove_source {
            self.store.remove(input)?;
            log::info!("🗑️  Removed unclipped mosaic {}", input.display());
        }

        Ok(ClipSummary {
            output_path: output.to_path_buf(),
            width,
            height,
            valid_pixels,
            source_removed: self.remove_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform};

    fn raster() -> Raster {
        Raster::filled(1, 10, 10, 1.0, GeoTransform::north_up(0.0, 10.0, 1.0, 1.0), Crs::Geographic)
    }

    fn square(min: f64, max: f64) -> Cutline {
        Cutline::from_geojson_str(&format!(
            r#"{{"type": "Polygon", "coordinates": [[[{0}, {0}], [{1}, {0}], [{1}, {1}], [{0}, {1}], [{0}, {0}]]]}}"#,
            min, max
        ))
        .unwrap()
    }

    #[test]
    fn test_enclosing_boundary_keeps_everything() {
        let clipped = clip_raster(&raster(), &square(-5.0, 15.0)).unwrap();
        assert_eq!(clipped.shape(), (10, 10));
        assert_eq!(clipped.valid_pixel_count(), 100);
    }

    #[test]
    fn test_crop_to_boundary() {
        let clipped = clip_raster(&raster(), &square(2.0, 5.0)).unwrap();
        assert_eq!(clipped.shape(), (3, 3));
        assert_eq!(clipped.transform.top_left_x, 2.0);
        assert_eq!(clipped.transform.top_left_y, 5.0);
    }

    #[test]
    fn test_disjoint_boundary_is_empty_clip() {
        assert!(matches!(
            clip_raster(&raster(), &square(20.0, 30.0)),
            Err(MosaicError::EmptyClip(_))
        ));
    }
}
