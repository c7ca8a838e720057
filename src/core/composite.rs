use ndarray::{Array3, ArrayViewMut2, Axis, Zip};
use num_traits::Float;

use crate::core::cloud_mask::CloudMaskBuilder;
use crate::types::{BoundingBox, CloudProbability, Mask, MosaicError, MosaicResult, PixelGrid, Raster, Scene, NODATA};

/// Scene after cloud/shadow pixels were set to no-data
#[derive(Debug, Clone)]
pub struct MaskedScene {
    pub id: String,
    pub footprint: BoundingBox,
    pub reflectance: Raster,
    /// Share of pixels removed by the mask, 0-100
    pub masked_percentage: f64,
}

/// Summary of a compositing run
#[derive(Debug, Clone, Default)]
pub struct CompositeStats {
    pub scenes_used: usize,
    pub scenes_skipped: usize,
    pub valid_pixels: usize,
    pub nodata_pixels: usize,
}

/// Set masked pixels to no-data in every band, leaving the rest untouched
pub fn apply_mask(raster: &mut Raster, mask: &Mask) -> MosaicResult<usize> {
    if raster.shape() != mask.dim() {
        return Err(MosaicError::Processing(format!(
            "Mask shape {:?} does not match raster {:?}",
            mask.dim(),
            raster.shape()
        )));
    }

    for mut band in raster.data.axis_iter_mut(Axis(0)) {
        Zip::from(&mut band).and(mask).for_each(|v, &m| {
            if m {
                *v = NODATA;
            }
        });
    }
    Ok(mask.iter().filter(|&&m| m).count())
}

/// Median of the finite values, averaging the middle pair for even counts
pub fn median_of<T: Float>(values: &mut [T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        let two = T::one() + T::one();
        Some((values[mid - 1] + values[mid]) / two)
    }
}

/// Per-pixel temporal median of masked scenes, ignoring no-data.
///
/// A pixel with no valid observation stays no-data.
pub fn median_composite(rasters: &[&Raster]) -> MosaicResult<Raster> {
    let first = rasters.first().ok_or_else(|| {
        MosaicError::Config("No scenes available to composite for this period".to_string())
    })?;

    for (i, raster) in rasters.iter().enumerate().skip(1) {
        if !raster.same_grid(first) || raster.band_count() != first.band_count() {
            return Err(MosaicError::Processing(format!(
                "Scene {} is not on the composite grid ({:?} {} vs {:?} {})",
                i,
                raster.shape(),
                raster.crs,
                first.shape(),
                first.crs
            )));
        }
    }

    let bands = first.band_count();
    let (rows, cols) = first.shape();
    let mut out = Array3::from_elem((bands, rows, cols), NODATA);

    let fill_row = |(row, mut out_row): (usize, ArrayViewMut2<'_, f32>)| {
        let mut values = Vec::with_capacity(rasters.len());
        for b in 0..bands {
            for c in 0..cols {
                values.clear();
                values.extend(
                    rasters
                        .iter()
                        .map(|r| r.data[[b, row, c]])
                        .filter(|v| v.is_finite()),
                );
                if let Some(m) = median_of(&mut values) {
                    out_row[[b, c]] = m;
                }
            }
        }
    };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        out.axis_iter_mut(Axis(1))
            .into_par_iter()
            .enumerate()
            .for_each(fill_row);
    }

    #[cfg(not(feature = "parallel"))]
    out.axis_iter_mut(Axis(1)).enumerate().for_each(fill_row);

    Ok(Raster::new(out, first.transform, first.crs))
}

/// Masks each paired scene and reduces the collection to one composite
#[derive(Debug, Clone)]
pub struct Compositor {
    builder: CloudMaskBuilder,
    grid: Option<PixelGrid>,
}

impl Compositor {
    pub fn new(builder: CloudMaskBuilder) -> Self {
        Self { builder, grid: None }
    }

    /// Warp every masked scene onto `grid`; defaults to the first scene's grid
    pub fn with_grid(mut self, grid: PixelGrid) -> Self {
        self.grid = Some(grid);
        self
    }

    /// Build and apply masks, then warp onto the composite grid.
    ///
    /// Scenes that cannot be masked or warped are skipped.
    pub fn mask_scenes(&self, pairs: Vec<(Scene, CloudProbability)>) -> (Vec<MaskedScene>, usize) {
        let total = pairs.len();
        let grid = match (self.grid, pairs.first()) {
            (Some(grid), _) => grid,
            (None, Some((scene, _))) => PixelGrid::of(&scene.reflectance),
            (None, None) => return (Vec::new(), 0),
        };
        log::debug!(
            "Composite grid: {} x {} px at {} in {}",
            grid.cols,
            grid.rows,
            grid.transform.pixel_width,
            grid.crs
        );

        let mask_one = |(scene, probability): (Scene, CloudProbability)| -> Option<MaskedScene> {
            let mask = match self.builder.build(&scene, &probability) {
                Ok(mask) => mask,
                Err(e) => {
                    log::warn!("⚠️  Skipping scene {}: {}", scene.id, e);
                    return None;
                }
            };
            let mut reflectance = scene.reflectance;
            if let Err(e) = apply_mask(&mut reflectance, &mask.mask) {
                log::warn!("⚠️  Skipping scene {}: {}", scene.id, e);
                return None;
            }
            if !grid.matches(&reflectance) {
                log::debug!("Warping scene {} onto the composite grid", scene.id);
                reflectance = match reflectance.warp_nearest(&grid) {
                    Ok(warped) => warped,
                    Err(e) => {
                        log::warn!("⚠️  Skipping scene {}: cannot warp onto the composite grid: {}", scene.id, e);
                        return None;
                    }
                };
            }
            log::debug!("Scene {}: {:.1}% cloud/shadow", scene.id, mask.masked_percentage());
            Some(MaskedScene {
                id: scene.id,
                footprint: scene.footprint,
                reflectance,
                masked_percentage: mask.masked_percentage(),
            })
        };

        #[cfg(feature = "parallel")]
        let masked: Vec<MaskedScene> = {
            use rayon::prelude::*;
            pairs.into_par_iter().filter_map(mask_one).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let masked: Vec<MaskedScene> = pairs.into_iter().filter_map(mask_one).collect();

        let skipped = total - masked.len();
        (masked, skipped)
    }

    /// Mask every scene and compute the median composite
    pub fn composite(&self, pairs: Vec<(Scene, CloudProbability)>) -> MosaicResult<(Raster, Vec<MaskedScene>, CompositeStats)> {
        log::info!("☁️  Masking clouds and shadows in {} scenes", pairs.len());
        let (masked, skipped) = self.mask_scenes(pairs);

        log::info!("🧮 Computing median composite of {} masked scenes", masked.len());
        let rasters: Vec<&Raster> = masked.iter().map(|m| &m.reflectance).collect();
        let composite = median_composite(&rasters)?;

        let valid_pixels = composite.valid_pixel_count();
        let (rows, cols) = composite.shape();
        let stats = CompositeStats {
            scenes_used: masked.len(),
            scenes_skipped: skipped,
            valid_pixels,
            nodata_pixels: rows * cols - valid_pixels,
        };

        log::info!(
            "✅ Composite ready: {} valid pixels, {} without a clear observation",
            stats.valid_pixels,
            stats.nodata_pixels
        );
        Ok((composite, masked, stats))
    }
}
